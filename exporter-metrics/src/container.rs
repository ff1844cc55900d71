//! Caches of registered metrics, one per kind.
//!
//! Every metric is created on first use and registered in a [`Registry`]. Later requests for the
//! same name and labels return the cached metric. Containers are owned by the dispatcher and are
//! never shared between threads, so they do not lock.

use std::collections::HashMap as StdHashMap;
use std::fmt;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use prometheus::core::Collector;
use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Opts, Registry};

use crate::event::Labels;
use crate::fingerprint::fingerprint;
use crate::mapping::{MapperDefaults, MetricMapping};
use crate::summary::Summary;

/// The kind of metric held by a container.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MetricKind {
    /// A [`Counter`].
    Counter,
    /// A [`Gauge`].
    Gauge,
    /// A [`Summary`].
    Summary,
    /// A [`Histogram`].
    Histogram,
}

impl MetricKind {
    /// Returns the lowercase name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Summary => "summary",
            Self::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned when a metric cannot be created or registered.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The metric is invalid or conflicts with a registered metric.
    #[error("failed to register metric")]
    Registration(#[from] prometheus::Error),
    /// The name is already used by a metric of another kind.
    #[error("metric {name:?} is already registered as {existing}, not {requested}")]
    KindMismatch {
        /// The metric name.
        name: String,
        /// The kind the name is registered with.
        existing: MetricKind,
        /// The kind that was requested.
        requested: MetricKind,
    },
}

fn const_labels(labels: &Labels) -> StdHashMap<String, String> {
    labels
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// A cache of metrics of one kind, keyed by the fingerprint of their name and labels.
///
/// A fingerprint is bound to a metric the first time the metric registers successfully. When
/// registration fails nothing is cached, so every later request fails the same way.
pub struct MetricContainer<M> {
    registry: Registry,
    metrics: HashMap<u64, M>,
}

impl<M> MetricContainer<M>
where
    M: Collector + Clone + 'static,
{
    /// Creates an empty container that registers into `registry`.
    pub fn new(registry: &Registry) -> Self {
        Self {
            registry: registry.clone(),
            metrics: HashMap::new(),
        }
    }

    /// Returns the number of cached metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns `true` if no metric was created yet.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    fn get_or_register<F>(&mut self, name: &str, labels: &Labels, create: F) -> Result<&M, ContainerError>
    where
        F: FnOnce() -> prometheus::Result<M>,
    {
        match self.metrics.entry(fingerprint(name, labels)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let metric = create()?;
                self.registry.register(Box::new(metric.clone()))?;
                Ok(entry.insert(metric))
            }
        }
    }
}

impl<M> fmt::Debug for MetricContainer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricContainer")
            .field("len", &self.metrics.len())
            .finish()
    }
}

/// Container of counters.
pub type CounterContainer = MetricContainer<Counter>;

impl CounterContainer {
    /// Returns the counter for `name` and `labels`, creating it with `help` on first use.
    pub fn get(&mut self, name: &str, labels: &Labels, help: &str) -> Result<&Counter, ContainerError> {
        self.get_or_register(name, labels, || {
            Counter::with_opts(Opts::new(name, help).const_labels(const_labels(labels)))
        })
    }
}

/// Container of gauges.
pub type GaugeContainer = MetricContainer<Gauge>;

impl GaugeContainer {
    /// Returns the gauge for `name` and `labels`, creating it with `help` on first use.
    pub fn get(&mut self, name: &str, labels: &Labels, help: &str) -> Result<&Gauge, ContainerError> {
        self.get_or_register(name, labels, || {
            Gauge::with_opts(Opts::new(name, help).const_labels(const_labels(labels)))
        })
    }
}

/// Container of summaries.
pub type SummaryContainer = MetricContainer<Summary>;

impl SummaryContainer {
    /// Returns the summary for `name` and `labels`.
    ///
    /// A new summary uses the quantiles of `mapping`, or the default quantiles if the mapping has
    /// none.
    pub fn get(
        &mut self,
        name: &str,
        labels: &Labels,
        help: &str,
        mapping: Option<&MetricMapping>,
        defaults: &MapperDefaults,
    ) -> Result<&Summary, ContainerError> {
        self.get_or_register(name, labels, || {
            let quantiles = match mapping {
                Some(mapping) if !mapping.quantiles.is_empty() => &mapping.quantiles,
                _ => &defaults.quantiles,
            };

            Summary::new(name, help, const_labels(labels), quantiles)
        })
    }
}

/// Container of histograms.
pub type HistogramContainer = MetricContainer<Histogram>;

impl HistogramContainer {
    /// Returns the histogram for `name` and `labels`.
    ///
    /// A new histogram uses the buckets of `mapping`, or the default buckets if the mapping has
    /// none.
    pub fn get(
        &mut self,
        name: &str,
        labels: &Labels,
        help: &str,
        mapping: Option<&MetricMapping>,
        defaults: &MapperDefaults,
    ) -> Result<&Histogram, ContainerError> {
        self.get_or_register(name, labels, || {
            let buckets = match mapping {
                Some(mapping) if !mapping.buckets.is_empty() => &mapping.buckets,
                _ => &defaults.buckets,
            };

            let opts = HistogramOpts::new(name, help)
                .const_labels(const_labels(labels))
                .buckets(buckets.clone());

            Histogram::with_opts(opts)
        })
    }
}
