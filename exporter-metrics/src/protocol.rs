//! Decoding of the StatsD line protocol.
//!
//! A line consists of a metric name and one or more samples:
//!
//! ```text
//! <name>:<value>|<type>[|@<sample_rate>][|#<tag>,<tag>...][:<value>|<type>...]
//! ```
//!
//! Supported types are `c` (counter), `g` (gauge), `ms` and `h` (timer). A leading `+` or `-` on a
//! gauge value marks a relative update. The DogStatsD tag section `#key:value,...` turns into
//! labels; its presence disables the `:`-separated multi-sample shorthand for the whole line.

use exporter_log::debug;
use exporter_telemetry::metric;

use crate::event::{Event, Labels};
use crate::statsd::MetricCounters;

/// Upper bound for the number of events a single sampled timer expands into.
///
/// A timer sent with `@0.001` repeats 1000 times. Smaller rates are clamped to this count.
pub const MAX_TIMER_REPEAT: usize = 1000;

/// The reason a sample or one of its components was rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SampleError {
    /// The line has no `:`, an empty name, or is not valid UTF-8.
    MalformedLine,
    /// A sample has too few or too many `|` components, or an empty optional component.
    MalformedComponent,
    /// The value is not a number.
    MalformedValue,
    /// A sampling factor was sent for a type that does not support it. The factor is ignored.
    IllegalSampleFactor,
    /// A sampling factor could not be parsed, or an optional component is neither a factor nor a
    /// tag section.
    InvalidSampleFactor,
    /// StatsD sets are not supported.
    UnsupportedSet,
    /// The type of the sample is unknown.
    IllegalEvent,
}

impl SampleError {
    /// Returns the reason tag used in telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedLine => "malformed_line",
            Self::MalformedComponent => "malformed_component",
            Self::MalformedValue => "malformed_value",
            Self::IllegalSampleFactor => "illegal_sample_factor",
            Self::InvalidSampleFactor => "invalid_sample_factor",
            Self::UnsupportedSet => "unsupported_set",
            Self::IllegalEvent => "illegal_event",
        }
    }
}

fn count_error(reason: SampleError) {
    metric!(counter(MetricCounters::SampleErrors) += 1, reason = reason.as_str());
}

/// Escapes a metric or label name so it is valid in Prometheus.
///
/// Names starting with a digit get an `_` prepended, every character outside of `[a-zA-Z0-9_]` is
/// replaced with `_`.
///
/// # Example
///
/// ```
/// use exporter_metrics::escape_metric_name;
///
/// assert_eq!(escape_metric_name("9ab.c"), "_9ab_c");
/// assert_eq!(escape_metric_name("http.requests"), "http_requests");
/// ```
pub fn escape_metric_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 1);

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        escaped.push('_');
    }

    escaped.extend(name.chars().map(|c| match c {
        'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => c,
        _ => '_',
    }));

    escaped
}

/// Parses a DogStatsD tag section into labels.
///
/// Tags are separated by `,` and may carry a leading `#`. Each tag is split on its first `:` into
/// key and value. Tags without a key or value are skipped.
fn parse_tags(section: &str) -> Labels {
    metric!(counter(MetricCounters::TagsReceived) += 1);

    let mut labels = Labels::new();

    for tag in section.split(',') {
        let tag = tag.strip_prefix('#').unwrap_or(tag);

        match tag.split_once(':') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                labels.insert(escape_metric_name(key), value.to_owned());
            }
            _ => {
                debug!("malformed or empty dogstatsd tag {tag:?} in component {section:?}");
                metric!(counter(MetricCounters::TagErrors) += 1);
            }
        }
    }

    labels
}

/// Returns the number of events a timer sampled at `factor` expands into.
fn timer_repeat(factor: f64) -> usize {
    // The float-to-int cast saturates, so huge repeat counts are clamped below.
    ((1.0 / factor).round() as usize).clamp(1, MAX_TIMER_REPEAT)
}

/// Parses a sampling factor, falling back to `1` for invalid or zero factors.
fn parse_sample_factor(string: &str, line: &str) -> f64 {
    match string.parse::<f64>() {
        Ok(factor) if factor == 0.0 => 1.0,
        Ok(factor) if factor.is_finite() && factor > 0.0 => factor,
        _ => {
            debug!("invalid sampling factor {string:?} on line {line:?}");
            count_error(SampleError::InvalidSampleFactor);
            1.0
        }
    }
}

/// Parses a single sample of a line and appends the resulting events.
///
/// Recoverable problems with optional components are counted here. The returned error aborts the
/// sample and is counted by the caller.
fn parse_sample(
    name: &str,
    sample: &str,
    line: &str,
    events: &mut Vec<Event>,
) -> Result<(), SampleError> {
    let components: Vec<&str> = sample.split('|').collect();
    let [value_str, ty, optional @ ..] = components.as_slice() else {
        return Err(SampleError::MalformedComponent);
    };

    if optional.len() > 2 {
        return Err(SampleError::MalformedComponent);
    }

    let relative = value_str.starts_with(['+', '-']);
    let mut value = value_str
        .parse::<f64>()
        .map_err(|_| SampleError::MalformedValue)?;

    if optional.iter().any(|component| component.is_empty()) {
        return Err(SampleError::MalformedComponent);
    }

    let mut repeat = 1;
    let mut labels = Labels::new();

    for component in optional {
        if let Some(factor) = component.strip_prefix('@') {
            if *ty != "c" && *ty != "ms" {
                debug!("illegal sampling factor for non-counter metric on line {line:?}");
                count_error(SampleError::IllegalSampleFactor);
                continue;
            }

            let factor = parse_sample_factor(factor, line);
            if *ty == "c" {
                value /= factor;
            } else {
                repeat = timer_repeat(factor);
            }
        } else if component.starts_with('#') {
            labels = parse_tags(component);
        } else {
            debug!("invalid sampling factor or tag section {component:?} on line {line:?}");
            count_error(SampleError::InvalidSampleFactor);
        }
    }

    let event = match *ty {
        "c" => Event::Counter {
            name: name.to_owned(),
            value,
            labels,
        },
        "g" => Event::Gauge {
            name: name.to_owned(),
            value,
            relative,
            labels,
        },
        "ms" | "h" => Event::Timer {
            name: name.to_owned(),
            value,
            labels,
        },
        "s" => return Err(SampleError::UnsupportedSet),
        _ => return Err(SampleError::IllegalEvent),
    };

    events.extend(std::iter::repeat_n(event, repeat));
    Ok(())
}

/// Decodes one protocol line into events.
///
/// This never fails. Malformed input yields fewer or no events and is counted in the
/// `statsd_exporter_sample_errors_total` telemetry counter. A trailing `\r` is ignored.
///
/// # Example
///
/// ```
/// use exporter_metrics::parse_line;
///
/// let events = parse_line(b"requests:5|c|@0.1");
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].value(), 50.0);
/// ```
pub fn parse_line(line: &[u8]) -> Vec<Event> {
    let mut events = Vec::new();

    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.is_empty() {
        return events;
    }

    let parsed = std::str::from_utf8(line)
        .ok()
        .and_then(|line| Some((line, line.split_once(':')?)));

    let (line, name, rest) = match parsed {
        Some((line, (name, rest))) if !name.is_empty() => (line, name, rest),
        _ => {
            debug!("bad line from statsd: {:?}", String::from_utf8_lossy(line));
            count_error(SampleError::MalformedLine);
            return events;
        }
    };

    let mut handle_sample = |sample: &str| {
        metric!(counter(MetricCounters::SamplesReceived) += 1);
        if let Err(error) = parse_sample(name, sample, line, &mut events) {
            debug!("rejected sample {sample:?} on line {line:?}: {}", error.as_str());
            count_error(error);
        }
    };

    // The DogStatsD tag extension disables the multi-sample shorthand.
    if rest.contains("|#") {
        handle_sample(rest);
    } else {
        rest.split(':').for_each(handle_sample);
    }

    events
}

#[cfg(test)]
mod tests {
    use exporter_telemetry::with_capturing_test_client;
    use similar_asserts::assert_eq;

    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn counter(name: &str, value: f64) -> Event {
        Event::Counter {
            name: name.to_owned(),
            value,
            labels: Labels::new(),
        }
    }

    fn timer(name: &str, value: f64) -> Event {
        Event::Timer {
            name: name.to_owned(),
            value,
            labels: Labels::new(),
        }
    }

    fn sample_errors(captures: &[String]) -> Vec<&str> {
        captures
            .iter()
            .filter_map(|capture| {
                capture.strip_prefix("statsd_exporter_sample_errors_total:1|c|#reason:")
            })
            .collect()
    }

    #[test]
    fn test_escape_metric_name() {
        assert_eq!(escape_metric_name("9ab.c"), "_9ab_c");
        assert_eq!(escape_metric_name("foo-bar/baz"), "foo_bar_baz");
        assert_eq!(escape_metric_name("already_valid_1"), "already_valid_1");
        assert_eq!(escape_metric_name("ünïcode"), "_n_code");
        assert_eq!(escape_metric_name(""), "");
    }

    #[test]
    fn test_parse_counter() {
        let events = parse_line(b"foo:2|c");
        insta::assert_debug_snapshot!(events, @r#"
        [
            Counter {
                name: "foo",
                value: 2.0,
                labels: {},
            },
        ]
        "#);
    }

    #[test]
    fn test_parse_gauge() {
        let events = parse_line(b"foo:3|g\r");
        assert_eq!(
            events,
            vec![Event::Gauge {
                name: "foo".to_owned(),
                value: 3.0,
                relative: false,
                labels: Labels::new(),
            }]
        );
    }

    #[test]
    fn test_parse_relative_gauge() {
        let events = parse_line(b"foo:+5|g:-2|g");
        insta::assert_debug_snapshot!(events, @r#"
        [
            Gauge {
                name: "foo",
                value: 5.0,
                relative: true,
                labels: {},
            },
            Gauge {
                name: "foo",
                value: -2.0,
                relative: true,
                labels: {},
            },
        ]
        "#);
    }

    #[test]
    fn test_parse_timers() {
        assert_eq!(parse_line(b"foo:200|ms"), vec![timer("foo", 200.0)]);
        assert_eq!(parse_line(b"foo:320|h"), vec![timer("foo", 320.0)]);
    }

    #[test]
    fn test_parse_multi_sample() {
        let events = parse_line(b"foo:1|c:2|c:3|c");
        assert_eq!(
            events,
            vec![counter("foo", 1.0), counter("foo", 2.0), counter("foo", 3.0)]
        );
    }

    #[test]
    fn test_parse_multi_sample_counts_samples() {
        let captures = with_capturing_test_client(|| {
            parse_line(b"foo:1|c:2|g");
        });

        assert_eq!(
            captures,
            [
                "statsd_exporter_samples_total:1|c",
                "statsd_exporter_samples_total:1|c"
            ]
        );
    }

    #[test]
    fn test_parse_counter_sample_factor() {
        assert_eq!(parse_line(b"foo:5|c|@0.1"), vec![counter("foo", 50.0)]);
    }

    #[test]
    fn test_parse_counter_zero_sample_factor() {
        assert_eq!(parse_line(b"foo:5|c|@0"), vec![counter("foo", 5.0)]);
    }

    #[test]
    fn test_parse_timer_sample_factor() {
        let events = parse_line(b"foo:100|ms|@0.25");
        assert_eq!(events, vec![timer("foo", 100.0); 4]);
    }

    #[test]
    fn test_parse_timer_sample_factor_rounds() {
        // 1 / 0.3 = 3.33 repeats
        assert_eq!(parse_line(b"foo:1|ms|@0.3").len(), 3);
        // 1 / 0.6 = 1.67 repeats
        assert_eq!(parse_line(b"foo:1|ms|@0.6").len(), 2);
    }

    #[test]
    fn test_parse_timer_sample_factor_clamped() {
        assert_eq!(parse_line(b"foo:1|ms|@0.0000001").len(), MAX_TIMER_REPEAT);
    }

    #[test]
    fn test_parse_histogram_sample_factor_ignored() {
        let mut events = Vec::new();
        let captures = with_capturing_test_client(|| {
            events = parse_line(b"foo:100|h|@0.25");
        });

        assert_eq!(events, vec![timer("foo", 100.0)]);
        assert_eq!(sample_errors(&captures), ["illegal_sample_factor"]);
    }

    #[test]
    fn test_parse_gauge_sample_factor_ignored() {
        let mut events = Vec::new();
        let captures = with_capturing_test_client(|| {
            events = parse_line(b"foo:3|g|@0.5");
        });

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value(), 3.0);
        assert_eq!(sample_errors(&captures), ["illegal_sample_factor"]);
    }

    #[test]
    fn test_parse_invalid_sample_factor() {
        let mut events = Vec::new();
        let captures = with_capturing_test_client(|| {
            events = parse_line(b"foo:5|c|@abc");
        });

        assert_eq!(events, vec![counter("foo", 5.0)]);
        assert_eq!(sample_errors(&captures), ["invalid_sample_factor"]);
    }

    #[test]
    fn test_parse_unknown_component() {
        let mut events = Vec::new();
        let captures = with_capturing_test_client(|| {
            events = parse_line(b"foo:5|c|x");
        });

        assert_eq!(events, vec![counter("foo", 5.0)]);
        assert_eq!(sample_errors(&captures), ["invalid_sample_factor"]);
    }

    #[test]
    fn test_parse_tags() {
        let events = parse_line(b"foo:1|c|#env:prod,host:web-1");
        insta::assert_debug_snapshot!(events, @r#"
        [
            Counter {
                name: "foo",
                value: 1.0,
                labels: {
                    "env": "prod",
                    "host": "web-1",
                },
            },
        ]
        "#);
    }

    #[test]
    fn test_parse_tags_with_sample_factor() {
        let events = parse_line(b"foo:2|c|@0.5|#env:prod");
        assert_eq!(
            events,
            vec![Event::Counter {
                name: "foo".to_owned(),
                value: 4.0,
                labels: labels(&[("env", "prod")]),
            }]
        );
    }

    #[test]
    fn test_parse_tags_escape_keys() {
        let events = parse_line(b"foo:1|c|#host.name:a:b");
        assert_eq!(events[0].labels(), &labels(&[("host_name", "a:b")]));
    }

    #[test]
    fn test_parse_tags_skip_empty_values() {
        let mut tags = Labels::new();
        let captures = with_capturing_test_client(|| {
            tags = parse_tags("#host:,env:prod,novalue");
        });

        assert_eq!(tags, labels(&[("env", "prod")]));
        assert_eq!(
            captures,
            [
                "statsd_exporter_tags_total:1|c",
                "statsd_exporter_tag_errors_total:1|c",
                "statsd_exporter_tag_errors_total:1|c"
            ]
        );
    }

    #[test]
    fn test_tags_disable_multi_sample() {
        // With tags, the remainder is a single sample of type `c:2`.
        let mut events = Vec::new();
        let captures = with_capturing_test_client(|| {
            events = parse_line(b"foo:1|c:2|c|#env:prod");
        });

        assert!(events.is_empty());
        assert_eq!(
            sample_errors(&captures),
            ["invalid_sample_factor", "illegal_event"]
        );
    }

    #[test]
    fn test_parse_malformed_lines() {
        for line in [&b"metric"[..], b":1|c", b"foo\xff:1|c"] {
            let mut events = Vec::new();
            let captures = with_capturing_test_client(|| {
                events = parse_line(line);
            });

            assert!(events.is_empty());
            assert_eq!(sample_errors(&captures), ["malformed_line"]);
        }
    }

    #[test]
    fn test_parse_empty_line() {
        let captures = with_capturing_test_client(|| {
            assert!(parse_line(b"").is_empty());
            assert!(parse_line(b"\r").is_empty());
        });

        assert!(captures.is_empty());
    }

    #[test]
    fn test_parse_malformed_components() {
        for line in [
            &b"foo:1"[..],
            b"foo:1|c|@0.1|#a:b|extra",
            b"foo:1|c||#a:b",
            b"foo:1|c|",
        ] {
            let mut events = Vec::new();
            let captures = with_capturing_test_client(|| {
                events = parse_line(line);
            });

            assert!(events.is_empty(), "{line:?}");
            assert_eq!(sample_errors(&captures), ["malformed_component"], "{line:?}");
        }
    }

    #[test]
    fn test_parse_malformed_value() {
        let mut events = Vec::new();
        let captures = with_capturing_test_client(|| {
            events = parse_line(b"foo:abc|c:2|c");
        });

        // The second sample on the line is still decoded.
        assert_eq!(events, vec![counter("foo", 2.0)]);
        assert_eq!(sample_errors(&captures), ["malformed_value"]);
    }

    #[test]
    fn test_parse_unsupported_types() {
        let mut events = Vec::new();
        let captures = with_capturing_test_client(|| {
            events.extend(parse_line(b"users:42|s"));
            events.extend(parse_line(b"foo:1|x"));
        });

        assert!(events.is_empty());
        assert_eq!(
            sample_errors(&captures),
            ["unsupported_set", "illegal_event"]
        );
    }

    #[test]
    fn test_negative_counter_is_parsed() {
        // Negative counters are rejected when dispatched, not while parsing.
        assert_eq!(parse_line(b"foo:-1|c"), vec![counter("foo", -1.0)]);
    }
}
