use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto;
use quantiles::ckms::CKMS;

use crate::mapping::Quantile;

/// Error used when no objectives are configured.
const DEFAULT_ERROR: f64 = 0.001;

struct SummaryState {
    ckms: CKMS<f64>,
    count: u64,
    sum: f64,
}

struct SummaryCore {
    desc: Desc,
    quantiles: Vec<f64>,
    state: Mutex<SummaryState>,
}

/// A summary metric that tracks streaming quantiles of observed values.
///
/// Quantiles are estimated with the CKMS algorithm. The summary uses the smallest error of all
/// configured objectives for the whole stream. Observations are never expired.
///
/// Cloning a summary returns a handle to the same underlying state.
#[derive(Clone)]
pub struct Summary {
    core: Arc<SummaryCore>,
}

impl Summary {
    /// Creates a summary with the given name, help text, constant labels and quantile objectives.
    ///
    /// Fails if the name or label names are invalid.
    pub fn new(
        name: &str,
        help: &str,
        const_labels: HashMap<String, String>,
        objectives: &[Quantile],
    ) -> prometheus::Result<Self> {
        let desc = Desc::new(name.to_owned(), help.to_owned(), vec![], const_labels)?;

        let error = objectives
            .iter()
            .map(|objective| objective.error)
            .reduce(f64::min)
            .unwrap_or(DEFAULT_ERROR);

        let mut quantiles: Vec<f64> = objectives.iter().map(|o| o.quantile).collect();
        quantiles.sort_by(f64::total_cmp);
        quantiles.dedup();

        Ok(Self {
            core: Arc::new(SummaryCore {
                desc,
                quantiles,
                state: Mutex::new(SummaryState {
                    ckms: CKMS::new(error),
                    count: 0,
                    sum: 0.0,
                }),
            }),
        })
    }

    /// Adds an observation.
    pub fn observe(&self, value: f64) {
        let mut state = self.core.state.lock();
        state.ckms.insert(value);
        state.count += 1;
        state.sum += value;
    }

    /// Returns the number of observations.
    pub fn sample_count(&self) -> u64 {
        self.core.state.lock().count
    }

    /// Returns the sum of all observations.
    pub fn sample_sum(&self) -> f64 {
        self.core.state.lock().sum
    }

    /// Returns the estimated value at quantile `q`, or `NaN` if nothing was observed.
    pub fn quantile(&self, q: f64) -> f64 {
        self.core
            .state
            .lock()
            .ckms
            .query(q)
            .map_or(f64::NAN, |(_, value)| value)
    }
}

impl std::fmt::Debug for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Summary")
            .field("name", &self.core.desc.fq_name)
            .field("quantiles", &self.core.quantiles)
            .finish()
    }
}

impl Collector for Summary {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.core.desc]
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let state = self.core.state.lock();

        let quantiles: Vec<proto::Quantile> = self
            .core
            .quantiles
            .iter()
            .map(|&q| {
                let mut quantile = proto::Quantile::default();
                quantile.set_quantile(q);
                quantile.set_value(state.ckms.query(q).map_or(f64::NAN, |(_, value)| value));
                quantile
            })
            .collect();

        let mut summary = proto::Summary::default();
        summary.set_sample_count(state.count);
        summary.set_sample_sum(state.sum);
        summary.set_quantile(quantiles.into());
        drop(state);

        let mut metric = proto::Metric::default();
        metric.set_label(self.core.desc.const_label_pairs.clone().into());
        metric.set_summary(summary);

        let mut family = proto::MetricFamily::default();
        family.set_name(self.core.desc.fq_name.clone());
        family.set_help(self.core.desc.help.clone());
        family.set_field_type(proto::MetricType::SUMMARY);
        family.set_metric(vec![metric].into());

        vec![family]
    }
}

#[cfg(test)]
mod tests {
    use prometheus::Registry;

    use super::*;

    fn objectives() -> Vec<Quantile> {
        vec![
            Quantile {
                quantile: 0.5,
                error: 0.05,
            },
            Quantile {
                quantile: 0.99,
                error: 0.001,
            },
        ]
    }

    #[test]
    fn test_observe() {
        let summary = Summary::new("latency", "Latency.", HashMap::new(), &objectives()).unwrap();

        for value in 1..=100 {
            summary.observe(f64::from(value));
        }

        assert_eq!(summary.sample_count(), 100);
        assert_eq!(summary.sample_sum(), 5050.0);

        let median = summary.quantile(0.5);
        assert!((45.0..=55.0).contains(&median), "median was {median}");
    }

    #[test]
    fn test_empty_quantile_is_nan() {
        let summary = Summary::new("latency", "Latency.", HashMap::new(), &[]).unwrap();
        assert!(summary.quantile(0.5).is_nan());
    }

    #[test]
    fn test_invalid_name() {
        assert!(Summary::new("not-valid", "Help.", HashMap::new(), &objectives()).is_err());
    }

    #[test]
    fn test_gather() {
        let registry = Registry::new();
        let labels = HashMap::from([("env".to_owned(), "prod".to_owned())]);
        let summary = Summary::new("latency", "Latency.", labels, &objectives()).unwrap();
        registry.register(Box::new(summary.clone())).unwrap();

        summary.observe(10.0);
        summary.observe(20.0);

        let families = registry.gather();
        assert_eq!(families.len(), 1);

        let family = &families[0];
        assert_eq!(family.get_name(), "latency");
        assert_eq!(family.get_help(), "Latency.");
        assert_eq!(family.get_field_type(), proto::MetricType::SUMMARY);

        let metric = &family.get_metric()[0];
        assert_eq!(metric.get_label()[0].get_name(), "env");
        assert_eq!(metric.get_label()[0].get_value(), "prod");

        let proto_summary = metric.get_summary();
        assert_eq!(proto_summary.get_sample_count(), 2);
        assert_eq!(proto_summary.get_sample_sum(), 30.0);

        let quantiles: Vec<f64> = proto_summary
            .get_quantile()
            .iter()
            .map(|q| q.get_quantile())
            .collect();
        assert_eq!(quantiles, vec![0.5, 0.99]);
    }
}
