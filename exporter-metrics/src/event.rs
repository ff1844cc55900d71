use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Label names and values attached to an [`Event`].
///
/// Labels are kept sorted by name, which gives events a stable debug and display representation.
pub type Labels = BTreeMap<String, String>;

/// A batch of events decoded from one datagram or one stream line.
pub type Events = Vec<Event>;

/// The kind of an [`Event`], used to look up mappings.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// A monotonic counter increment.
    Counter,
    /// An absolute or relative gauge update.
    Gauge,
    /// A timing observation in milliseconds.
    Timer,
}

impl MetricType {
    /// Returns the lowercase name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Timer => "timer",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single decoded StatsD sample.
///
/// Events carry the raw metric name as sent by the client. Escaping and renaming happens when the
/// event is dispatched.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Increments a counter by `value`.
    Counter {
        /// Raw metric name.
        name: String,
        /// Increment, already scaled by the sampling factor.
        value: f64,
        /// DogStatsD tags of the sample.
        labels: Labels,
    },
    /// Sets a gauge to `value`, or adds `value` to it if `relative` is set.
    Gauge {
        /// Raw metric name.
        name: String,
        /// New value or delta.
        value: f64,
        /// Whether the value was sent with a leading sign.
        relative: bool,
        /// DogStatsD tags of the sample.
        labels: Labels,
    },
    /// Records a duration in milliseconds.
    Timer {
        /// Raw metric name.
        name: String,
        /// Observed duration in milliseconds.
        value: f64,
        /// DogStatsD tags of the sample.
        labels: Labels,
    },
}

impl Event {
    /// Returns the raw metric name.
    pub fn name(&self) -> &str {
        match self {
            Self::Counter { name, .. } | Self::Gauge { name, .. } | Self::Timer { name, .. } => name,
        }
    }

    /// Returns the numeric value of the sample.
    pub fn value(&self) -> f64 {
        match *self {
            Self::Counter { value, .. } | Self::Gauge { value, .. } | Self::Timer { value, .. } => {
                value
            }
        }
    }

    /// Returns the labels parsed from the sample's tags.
    pub fn labels(&self) -> &Labels {
        match self {
            Self::Counter { labels, .. }
            | Self::Gauge { labels, .. }
            | Self::Timer { labels, .. } => labels,
        }
    }

    /// Returns the type of this event.
    pub fn ty(&self) -> MetricType {
        match self {
            Self::Counter { .. } => MetricType::Counter,
            Self::Gauge { .. } => MetricType::Gauge,
            Self::Timer { .. } => MetricType::Timer,
        }
    }
}

impl fmt::Display for Event {
    /// Formats the event as `type name value {labels}`, with `+` marking relative gauges.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.ty(), self.name())?;

        match self {
            Self::Gauge {
                value,
                relative: true,
                ..
            } => write!(f, "{value:+}")?,
            _ => write!(f, "{}", self.value())?,
        }

        let labels = self.labels();
        if !labels.is_empty() {
            f.write_str(" {")?;
            for (index, (key, value)) in labels.iter().enumerate() {
                if index > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{key}={value:?}")?;
            }
            f.write_str("}")?;
        }

        Ok(())
    }
}
