use std::hash::Hasher;

use fnv::FnvHasher;

use crate::event::Labels;

const SEPARATOR: u8 = 0xff;

/// Computes a 64-bit FNV-1a digest of a metric name and its labels.
///
/// The digest covers the name and every label name and value, separated by a byte that cannot
/// occur in UTF-8. Labels are hashed in sorted order, so the result does not depend on the order
/// in which they were inserted.
///
/// Each call uses its own hasher, so this is safe to call from any thread. Two different
/// identities may still collide. At 64 bits this is unlikely enough that it is not checked.
pub fn fingerprint(name: &str, labels: &Labels) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    hasher.write_u8(SEPARATOR);

    for (key, value) in labels {
        hasher.write(key.as_bytes());
        hasher.write_u8(SEPARATOR);
        hasher.write(value.as_bytes());
        hasher.write_u8(SEPARATOR);
    }

    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_deterministic() {
        let labels = labels(&[("env", "prod")]);
        assert_eq!(fingerprint("foo", &labels), fingerprint("foo", &labels));
    }

    #[test]
    fn test_label_order_independent() {
        let a = labels(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let b = labels(&[("c", "3"), ("a", "1"), ("b", "2")]);
        assert_eq!(fingerprint("foo", &a), fingerprint("foo", &b));
    }

    #[test]
    fn test_sensitive_to_name_and_labels() {
        let base = fingerprint("foo", &labels(&[("a", "1")]));

        assert_ne!(base, fingerprint("bar", &labels(&[("a", "1")])));
        assert_ne!(base, fingerprint("foo", &labels(&[("a", "2")])));
        assert_ne!(base, fingerprint("foo", &labels(&[("b", "1")])));
        assert_ne!(base, fingerprint("foo", &labels(&[("a", "1"), ("b", "1")])));
        assert_ne!(base, fingerprint("foo", &Labels::new()));
    }

    #[test]
    fn test_single_stream_layout() {
        let mut hasher = FnvHasher::default();
        hasher.write(b"foo\xffa\xff1\xffb\xff2\xff");

        let labels = labels(&[("b", "2"), ("a", "1")]);
        assert_eq!(fingerprint("foo", &labels), hasher.finish());
    }

    #[test]
    fn test_separators_prevent_ambiguity() {
        assert_ne!(
            fingerprint("foo", &labels(&[("ab", "c")])),
            fingerprint("foo", &labels(&[("a", "bc")]))
        );
        assert_ne!(
            fingerprint("fooa", &labels(&[("b", "c")])),
            fingerprint("foo", &labels(&[("ab", "c")]))
        );
    }
}
