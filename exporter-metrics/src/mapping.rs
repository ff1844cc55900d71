//! Naming and labeling policy for dispatched events.
//!
//! The dispatcher looks up every event's raw name in a [`MetricMapper`]. A mapping can rename the
//! metric, add labels, set its help text, select how timers are represented, or drop the event.
//! Events without a mapping keep their escaped raw name.
//!
//! [`MappingTable`] is a static table of exact-name mappings loaded from YAML:
//!
//! ```yaml
//! defaults:
//!   timer_type: histogram
//!   buckets: [0.01, 0.1, 1, 10]
//! mappings:
//!   - match: web.requests
//!     name: http_requests_total
//!     labels:
//!       service: web
//!   - match: debug.noise
//!     action: drop
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;
use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use serde::{Deserialize, Serialize};

use crate::event::{Labels, MetricType};

/// Bucket boundaries used for histograms when nothing else is configured.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// How timer events are represented.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerType {
    /// Use the representation from [`MapperDefaults`].
    #[default]
    Default,
    /// A summary over the raw millisecond values.
    Summary,
    /// A histogram over values converted to seconds.
    Histogram,
}

/// What the dispatcher does with a mapped event.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingAction {
    /// Record the event under the mapped name.
    #[default]
    #[serde(alias = "map")]
    Keep,
    /// Discard the event.
    Drop,
}

/// A quantile objective of a summary.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Quantile {
    /// The quantile to track, between `0` and `1`.
    pub quantile: f64,
    /// The acceptable rank error of the estimate.
    pub error: f64,
}

impl Quantile {
    const fn new(quantile: f64, error: f64) -> Self {
        Self { quantile, error }
    }
}

/// Policy-wide tuning for timers.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MapperDefaults {
    /// Representation of timers whose mapping does not choose one.
    pub timer_type: TimerType,
    /// Histogram buckets in seconds.
    pub buckets: Vec<f64>,
    /// Summary objectives.
    pub quantiles: Vec<Quantile>,
}

impl Default for MapperDefaults {
    fn default() -> Self {
        Self {
            timer_type: TimerType::Summary,
            buckets: DEFAULT_BUCKETS.to_vec(),
            quantiles: vec![
                Quantile::new(0.5, 0.05),
                Quantile::new(0.9, 0.01),
                Quantile::new(0.99, 0.001),
            ],
        }
    }
}

/// A single mapping rule.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricMapping {
    /// The raw StatsD name this rule applies to.
    #[serde(rename = "match")]
    pub match_name: String,
    /// Restricts the rule to one event type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_metric_type: Option<MetricType>,
    /// The target metric name. Escaped before use.
    pub name: String,
    /// Labels added to the event's own labels. These win on conflicts.
    #[serde(skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    /// Help text of the metric.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// Whether events are kept or dropped.
    pub action: MappingAction,
    /// Representation of timer events.
    pub timer_type: TimerType,
    /// Summary objectives. Empty uses [`MapperDefaults::quantiles`].
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quantiles: Vec<Quantile>,
    /// Histogram buckets. Empty uses [`MapperDefaults::buckets`].
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<f64>,
}

/// An error in a mapping configuration.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// The YAML could not be parsed.
    #[error("could not parse mapping config")]
    Parse(#[from] serde_yaml::Error),
    /// A mapping has no `match` name.
    #[error("mapping without a match name")]
    EmptyMatch,
    /// A mapping that keeps events has no target name.
    #[error("mapping for {0:?} has no target name")]
    EmptyName(String),
    /// Two mappings apply to the same name and type.
    #[error("duplicate mapping for {0:?}")]
    Duplicate(String),
    /// A quantile or its error is out of range.
    #[error("invalid quantile {quantile} with error {error} for {name:?}")]
    InvalidQuantile {
        /// The name of the mapping, or `defaults`.
        name: String,
        /// The quantile.
        quantile: f64,
        /// The acceptable error.
        error: f64,
    },
    /// Histogram buckets are not strictly increasing.
    #[error("buckets for {0:?} must be strictly increasing")]
    UnsortedBuckets(String),
}

fn validate_tuning(name: &str, quantiles: &[Quantile], buckets: &[f64]) -> Result<(), MappingError> {
    for q in quantiles {
        let quantile_valid = (0.0..=1.0).contains(&q.quantile);
        let error_valid = q.error > 0.0 && q.error < 1.0;
        if !quantile_valid || !error_valid {
            return Err(MappingError::InvalidQuantile {
                name: name.to_owned(),
                quantile: q.quantile,
                error: q.error,
            });
        }
    }

    if !buckets.windows(2).all(|pair| pair[0] < pair[1]) {
        return Err(MappingError::UnsortedBuckets(name.to_owned()));
    }

    Ok(())
}

/// The serialized form of a mapping table.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Policy-wide tuning.
    pub defaults: MapperDefaults,
    /// Mapping rules, matched by exact name.
    pub mappings: Vec<MetricMapping>,
}

impl MappingConfig {
    /// Parses and validates a mapping configuration from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, MappingError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for rules that can never work.
    pub fn validate(&self) -> Result<(), MappingError> {
        validate_tuning("defaults", &self.defaults.quantiles, &self.defaults.buckets)?;

        let mut seen = hashbrown::HashSet::new();
        for mapping in &self.mappings {
            if mapping.match_name.is_empty() {
                return Err(MappingError::EmptyMatch);
            }

            if mapping.action == MappingAction::Keep && mapping.name.is_empty() {
                return Err(MappingError::EmptyName(mapping.match_name.clone()));
            }

            if !seen.insert((mapping.match_name.as_str(), mapping.match_metric_type)) {
                return Err(MappingError::Duplicate(mapping.match_name.clone()));
            }

            validate_tuning(&mapping.match_name, &mapping.quantiles, &mapping.buckets)?;
        }

        Ok(())
    }
}

/// Looks up how an event should be recorded.
///
/// Implementations are read from the dispatcher thread and may be replaced from other threads, see
/// [`SwappableMapper`].
pub trait MetricMapper: Send + Sync {
    /// Returns the mapping for a raw metric name and the labels it contributes, or `None` if the
    /// event is not mapped.
    fn get_mapping(&self, name: &str, ty: MetricType) -> Option<(Arc<MetricMapping>, Labels)>;

    /// Returns the tuning used when a mapping does not provide its own.
    fn defaults(&self) -> Arc<MapperDefaults>;
}

/// A [`MetricMapper`] of exact-name rules.
///
/// Rules restricted to an event type take precedence over rules for any type.
#[derive(Debug, Default)]
pub struct MappingTable {
    defaults: Arc<MapperDefaults>,
    mappings: HashMap<String, Vec<Arc<MetricMapping>>>,
}

impl MappingTable {
    /// Builds a table from a validated configuration.
    pub fn new(config: MappingConfig) -> Result<Self, MappingError> {
        config.validate()?;

        let mut mappings: HashMap<String, Vec<Arc<MetricMapping>>> = HashMap::new();
        for mapping in config.mappings {
            let rules = match mappings.entry(mapping.match_name.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(Vec::new()),
            };

            let mapping = Arc::new(mapping);
            if mapping.match_metric_type.is_some() {
                rules.insert(0, mapping);
            } else {
                rules.push(mapping);
            }
        }

        Ok(Self {
            defaults: Arc::new(config.defaults),
            mappings,
        })
    }

    /// Returns the number of rules in the table.
    pub fn len(&self) -> usize {
        self.mappings.values().map(Vec::len).sum()
    }

    /// Returns `true` if the table has no rules.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl MetricMapper for MappingTable {
    fn get_mapping(&self, name: &str, ty: MetricType) -> Option<(Arc<MetricMapping>, Labels)> {
        let mapping = self.mappings.get(name)?.iter().find(|mapping| {
            mapping
                .match_metric_type
                .is_none_or(|match_type| match_type == ty)
        })?;

        Some((Arc::clone(mapping), mapping.labels.clone()))
    }

    fn defaults(&self) -> Arc<MapperDefaults> {
        Arc::clone(&self.defaults)
    }
}

/// A [`MappingTable`] that can be replaced while the dispatcher is running.
///
/// Lookups load the current table without locking. A lookup that runs during [`store`](Self::store)
/// completes on the table it started with.
#[derive(Debug)]
pub struct SwappableMapper {
    current: ArcSwap<MappingTable>,
}

impl SwappableMapper {
    /// Creates a mapper serving `table`.
    pub fn new(table: MappingTable) -> Self {
        Self {
            current: ArcSwap::from_pointee(table),
        }
    }

    /// Replaces the current table.
    pub fn store(&self, table: MappingTable) {
        self.current.store(Arc::new(table));
    }

    /// Returns the current table.
    pub fn load(&self) -> Arc<MappingTable> {
        self.current.load_full()
    }
}

impl Default for SwappableMapper {
    fn default() -> Self {
        Self::new(MappingTable::default())
    }
}

impl MetricMapper for SwappableMapper {
    fn get_mapping(&self, name: &str, ty: MetricType) -> Option<(Arc<MetricMapping>, Labels)> {
        self.current.load().get_mapping(name, ty)
    }

    fn defaults(&self) -> Arc<MapperDefaults> {
        self.current.load().defaults()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const CONFIG: &str = r#"
defaults:
  timer_type: histogram
  buckets: [0.1, 1, 10]
mappings:
  - match: web.requests
    name: http_requests_total
    help: Requests served.
    labels:
      service: web
  - match: web.requests
    match_metric_type: timer
    name: http_request_duration_seconds
    timer_type: summary
    quantiles:
      - quantile: 0.5
        error: 0.01
  - match: debug.noise
    action: drop
  - match: legacy.hits
    action: map
    name: hits
"#;

    fn table() -> MappingTable {
        MappingTable::new(MappingConfig::from_yaml_str(CONFIG).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_config() {
        let config = MappingConfig::from_yaml_str(CONFIG).unwrap();
        assert_eq!(config.defaults.timer_type, TimerType::Histogram);
        assert_eq!(config.defaults.buckets, vec![0.1, 1.0, 10.0]);
        // Unset defaults keep their built-in values.
        assert_eq!(config.defaults.quantiles, MapperDefaults::default().quantiles);
        assert_eq!(config.mappings.len(), 4);
        assert_eq!(config.mappings[3].action, MappingAction::Keep);
    }

    #[test]
    fn test_default_defaults() {
        let defaults = MapperDefaults::default();
        assert_eq!(defaults.timer_type, TimerType::Summary);
        assert_eq!(defaults.buckets, DEFAULT_BUCKETS.to_vec());
        insta::assert_debug_snapshot!(defaults.quantiles, @r"
        [
            Quantile {
                quantile: 0.5,
                error: 0.05,
            },
            Quantile {
                quantile: 0.9,
                error: 0.01,
            },
            Quantile {
                quantile: 0.99,
                error: 0.001,
            },
        ]
        ");
    }

    #[test]
    fn test_lookup_exact_name() {
        let table = table();

        let (mapping, labels) = table
            .get_mapping("web.requests", MetricType::Counter)
            .unwrap();
        assert_eq!(mapping.name, "http_requests_total");
        assert_eq!(mapping.help.as_deref(), Some("Requests served."));
        assert_eq!(labels.get("service").map(String::as_str), Some("web"));

        assert!(table.get_mapping("web.requests.other", MetricType::Counter).is_none());
    }

    #[test]
    fn test_lookup_prefers_typed_rule() {
        let (mapping, labels) = table().get_mapping("web.requests", MetricType::Timer).unwrap();
        assert_eq!(mapping.name, "http_request_duration_seconds");
        assert_eq!(mapping.timer_type, TimerType::Summary);
        assert!(labels.is_empty());
    }

    #[test]
    fn test_lookup_drop() {
        let (mapping, _) = table().get_mapping("debug.noise", MetricType::Gauge).unwrap();
        assert_eq!(mapping.action, MappingAction::Drop);
    }

    #[test]
    fn test_validate_empty_name() {
        let result = MappingConfig::from_yaml_str("mappings: [{match: foo}]");
        assert!(matches!(result, Err(MappingError::EmptyName(name)) if name == "foo"));
    }

    #[test]
    fn test_validate_duplicate() {
        let yaml = "mappings: [{match: foo, name: a}, {match: foo, name: b}]";
        let result = MappingConfig::from_yaml_str(yaml);
        assert!(matches!(result, Err(MappingError::Duplicate(_))));
    }

    #[test]
    fn test_validate_quantiles() {
        let yaml = "mappings: [{match: foo, name: a, quantiles: [{quantile: 1.5, error: 0.1}]}]";
        let result = MappingConfig::from_yaml_str(yaml);
        assert!(matches!(result, Err(MappingError::InvalidQuantile { .. })));
    }

    #[test]
    fn test_validate_buckets() {
        let yaml = "defaults: {buckets: [1, 0.5]}";
        let result = MappingConfig::from_yaml_str(yaml);
        assert!(matches!(result, Err(MappingError::UnsortedBuckets(name)) if name == "defaults"));
    }

    #[test]
    fn test_swap_table() {
        let mapper = SwappableMapper::default();
        assert!(mapper.get_mapping("web.requests", MetricType::Counter).is_none());
        assert_eq!(mapper.defaults().timer_type, TimerType::Summary);

        mapper.store(table());
        assert!(mapper.get_mapping("web.requests", MetricType::Counter).is_some());
        assert_eq!(mapper.defaults().timer_type, TimerType::Histogram);
        assert_eq!(mapper.load().len(), 4);
    }
}
