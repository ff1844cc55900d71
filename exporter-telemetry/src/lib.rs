//! Self-instrumentation for the StatsD exporter.
//!
//! The exporter counts what happens to the data it receives: packets, lines, samples, parse
//! errors, conflicting registrations, and so on. These counters are published in the same
//! [`prometheus::Registry`] that holds the converted metrics, so they are scraped together.
//!
//! ## Defining Metrics
//!
//! In order to use a counter, one needs to first implement [`CounterMetric`] on a custom enum.
//! The trait serves only to provide a type safe metric name and its help text.
//!
//! ## Initializing the Client
//!
//! Metrics can be used without initializing a client. In that case, invoking [`with_client`] or
//! the [`metric!`] macro will become a noop. Only when configured, metrics will actually be
//! collected.
//!
//! To initialize the client, use [`init`] with the registry the counters should be published in:
//!
//! ```
//! let registry = prometheus::Registry::new();
//! exporter_telemetry::init(registry.clone());
//! ```
//!
//! ## Macro Usage
//!
//! The recommended way to record metrics is by using the [`metric!`] macro:
//!
//! ```
//! use exporter_telemetry::{metric, CounterMetric};
//!
//! enum MyCounter {
//!     Lines,
//!     Errors,
//! }
//!
//! impl CounterMetric for MyCounter {
//!     fn name(&self) -> &'static str {
//!         match self {
//!             Self::Lines => "lines_total",
//!             Self::Errors => "errors_total",
//!         }
//!     }
//!
//!     fn help(&self) -> &'static str {
//!         match self {
//!             Self::Lines => "The total number of lines received.",
//!             Self::Errors => "The total number of errors.",
//!         }
//!     }
//! }
//!
//! metric!(counter(MyCounter::Lines) += 1);
//! metric!(counter(MyCounter::Errors) += 1, reason = "malformed_line");
//! ```
//!
//! A counter must always be emitted with the same tag keys, in the same order. The first use of a
//! counter fixes its label names.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use parking_lot::{Mutex, RwLock};
use prometheus::{IntCounterVec, Opts, Registry};

/// A metric for capturing counters.
///
/// Counters are monotonically increasing values. The exporter uses them to count received
/// packets and lines, rejected input, and dispatched events.
///
/// ## Example
///
/// ```
/// use exporter_telemetry::{metric, CounterMetric};
///
/// struct TcpConnections;
///
/// impl CounterMetric for TcpConnections {
///     fn name(&self) -> &'static str {
///         "tcp_connections_total"
///     }
///
///     fn help(&self) -> &'static str {
///         "The total number of TCP connections handled."
///     }
/// }
///
/// // add to the counter
/// metric!(counter(TcpConnections) += 1);
///
/// // add to the counter and provide tags
/// metric!(counter(TcpConnections) += 1, listener = "tcp");
/// ```
pub trait CounterMetric {
    /// Returns the name of the counter as published in the registry.
    fn name(&self) -> &'static str;

    /// Returns the help text published alongside the counter.
    fn help(&self) -> &'static str;
}

/// Client that publishes counters into a [`Registry`].
pub struct TelemetryClient {
    registry: Registry,
    counters: RwLock<HashMap<&'static str, IntCounterVec>>,
    captures: Option<Mutex<Vec<String>>>,
}

impl TelemetryClient {
    /// Creates a client that registers its counters in the given registry.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            counters: RwLock::new(HashMap::new()),
            captures: None,
        }
    }

    fn capturing() -> Self {
        Self {
            captures: Some(Mutex::new(Vec::new())),
            ..Self::new(Registry::new())
        }
    }

    /// Returns the registry counters are published in.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Adds `value` to the counter `name` with the given tags.
    ///
    /// The counter is created and registered on first use. Failures to register are logged once
    /// and the counter keeps counting without being published. Counters that already exist are
    /// updated under a shared lock.
    pub fn count(&self, name: &'static str, help: &'static str, value: u64, tags: &[(&str, &str)]) {
        if let Some(captures) = &self.captures {
            captures.lock().push(format_capture(name, value, tags));
        }

        if let Some(counter_vec) = self.counters.read().get(name) {
            increment(name, counter_vec, value, tags);
            return;
        }

        let mut counters = self.counters.write();
        let counter_vec = match counters.entry(name) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let label_names: Vec<&str> = tags.iter().map(|(key, _)| *key).collect();
                let counter_vec = match IntCounterVec::new(Opts::new(name, help), &label_names) {
                    Ok(counter_vec) => counter_vec,
                    Err(error) => {
                        exporter_log::error!("invalid telemetry counter {name}: {error}");
                        return;
                    }
                };

                if let Err(error) = self.registry.register(Box::new(counter_vec.clone())) {
                    exporter_log::error!("failed to register telemetry counter {name}: {error}");
                }

                entry.insert(counter_vec)
            }
        };

        increment(name, counter_vec, value, tags);
    }
}

fn increment(name: &str, counter_vec: &IntCounterVec, value: u64, tags: &[(&str, &str)]) {
    let label_values: Vec<&str> = tags.iter().map(|(_, value)| *value).collect();
    match counter_vec.get_metric_with_label_values(&label_values) {
        Ok(counter) => counter.inc_by(value),
        Err(error) => exporter_log::error!("failed to count {name}: {error}"),
    }
}

impl fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("counters", &self.counters.read().len())
            .field("capturing", &self.captures.is_some())
            .finish()
    }
}

/// Renders a counter update the way test assertions compare it.
fn format_capture(name: &str, value: u64, tags: &[(&str, &str)]) -> String {
    let mut capture = format!("{name}:{value}|c");

    for (index, (key, tag_value)) in tags.iter().enumerate() {
        capture.push_str(if index == 0 { "|#" } else { "," });
        capture.push_str(key);
        capture.push(':');
        capture.push_str(tag_value);
    }

    capture
}

static TELEMETRY_CLIENT: RwLock<Option<Arc<TelemetryClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: RefCell<Option<Arc<TelemetryClient>>> = TELEMETRY_CLIENT.read().clone().into();
}

/// Set a new telemetry client.
///
/// Threads that already emitted metrics keep their previous client. Initialize the client before
/// spawning listener threads.
pub fn set_client(client: TelemetryClient) {
    *TELEMETRY_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(TELEMETRY_CLIENT.read().clone()));
}

/// Publish the exporter's own counters in the given registry.
pub fn init(registry: Registry) {
    set_client(TelemetryClient::new(registry));
}

/// Disable the client again.
pub fn disable() {
    *TELEMETRY_CLIENT.write() = None;
}

/// Set a capturing client for the period of the called function (only affects the current thread).
///
/// Returns every counter update emitted by `f` as `name:value|c|#key:value` strings.
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let client = Arc::new(TelemetryClient::capturing());

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(client.clone()));
        f();
        cell.replace(old_client);
    });

    client
        .captures
        .as_ref()
        .map(|captures| std::mem::take(&mut *captures.lock()))
        .unwrap_or_default()
}

/// Invoke a callback with the current telemetry client.
///
/// If telemetry is not configured the callback is not invoked. For the most part the [`metric!`]
/// macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&TelemetryClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    client.count(
                        $crate::CounterMetric::name(&$id),
                        $crate::CounterMetric::help(&$id),
                        value,
                        &[$((stringify!($k), ::std::convert::AsRef::<str>::as_ref(&$v))),*],
                    )
                })
            }
            _ => {}
        }
    };
}

#[cfg(test)]
mod tests {
    use prometheus::Registry;
    use similar_asserts::assert_eq;

    use super::*;

    enum TestCounters {
        Lines,
        Errors,
    }

    impl CounterMetric for TestCounters {
        fn name(&self) -> &'static str {
            match self {
                Self::Lines => "test_lines_total",
                Self::Errors => "test_errors_total",
            }
        }

        fn help(&self) -> &'static str {
            match self {
                Self::Lines => "Lines seen by the test.",
                Self::Errors => "Errors seen by the test.",
            }
        }
    }

    #[test]
    fn test_capturing_client() {
        let captures = with_capturing_test_client(|| {
            metric!(counter(TestCounters::Lines) += 3);
            metric!(
                counter(TestCounters::Errors) += 1,
                reason = "malformed_line",
                listener = "udp",
            );
        });

        assert_eq!(
            captures,
            [
                "test_lines_total:3|c",
                "test_errors_total:1|c|#reason:malformed_line,listener:udp"
            ]
        );
    }

    #[test]
    fn test_zero_increment_is_skipped() {
        let captures = with_capturing_test_client(|| {
            metric!(counter(TestCounters::Lines) += 0);
        });

        assert!(captures.is_empty());
    }

    #[test]
    fn test_without_client_is_noop() {
        metric!(counter(TestCounters::Lines) += 1);
        assert!(!with_client(|_| true));
    }

    #[test]
    fn test_counts_into_registry() {
        let registry = Registry::new();
        let client = TelemetryClient::new(registry.clone());

        client.count("test_events_total", "Events.", 2, &[("kind", "counter")]);
        client.count("test_events_total", "Events.", 3, &[("kind", "counter")]);
        client.count("test_events_total", "Events.", 1, &[("kind", "gauge")]);

        let families = registry.gather();
        assert_eq!(families.len(), 1);

        let family = &families[0];
        assert_eq!(family.get_name(), "test_events_total");

        let mut values: Vec<(String, f64)> = family
            .get_metric()
            .iter()
            .map(|metric| {
                let label = metric.get_label()[0].get_value().to_owned();
                (label, metric.get_counter().get_value())
            })
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            values,
            vec![("counter".to_owned(), 5.0), ("gauge".to_owned(), 1.0)]
        );
    }

    #[test]
    fn test_count_from_many_threads() {
        let registry = Registry::new();
        let client = Arc::new(TelemetryClient::new(registry.clone()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = Arc::clone(&client);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        client.count("test_lines_total", "Lines.", 1, &[("listener", "udp")]);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_metric()[0].get_counter().get_value(), 400.0);
    }

    #[test]
    fn test_mismatched_tags_do_not_panic() {
        let client = TelemetryClient::new(Registry::new());
        client.count("test_mixed_total", "Mixed.", 1, &[("reason", "a")]);
        client.count("test_mixed_total", "Mixed.", 1, &[]);
    }
}
