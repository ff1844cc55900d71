use std::sync::Arc;

use crossbeam_channel::Receiver;
use exporter_log::{LogError, debug};
use exporter_telemetry::metric;
use hashbrown::HashMap;
use prometheus::Registry;

use crate::container::{
    ContainerError, CounterContainer, GaugeContainer, HistogramContainer, MetricKind,
    SummaryContainer,
};
use crate::event::{Event, Events, Labels};
use crate::mapping::{MapperDefaults, MappingAction, MetricMapper, MetricMapping, TimerType};
use crate::protocol::escape_metric_name;
use crate::statsd::MetricCounters;

/// Help text of metrics without a mapping or without mapped help.
pub const DEFAULT_HELP: &str = "Metric autogenerated by statsd_exporter.";

/// The resolved identity of an event's metric.
struct Target<'a> {
    name: String,
    help: &'a str,
    labels: Labels,
    mapping: Option<&'a MetricMapping>,
}

/// Applies events to metrics.
///
/// The dispatcher is the only consumer of the event queue. It resolves every event through a
/// [`MetricMapper`] and updates the counter, gauge, summary or histogram it maps to. All metrics
/// are registered in the registry passed to [`Dispatcher::new`].
pub struct Dispatcher {
    mapper: Arc<dyn MetricMapper>,
    counters: CounterContainer,
    gauges: GaugeContainer,
    summaries: SummaryContainer,
    histograms: HistogramContainer,
    kinds: HashMap<String, MetricKind>,
}

impl Dispatcher {
    /// Creates a dispatcher that registers metrics in `registry`.
    pub fn new(registry: &Registry, mapper: Arc<dyn MetricMapper>) -> Self {
        Self {
            mapper,
            counters: CounterContainer::new(registry),
            gauges: GaugeContainer::new(registry),
            summaries: SummaryContainer::new(registry),
            histograms: HistogramContainer::new(registry),
            kinds: HashMap::new(),
        }
    }

    /// Consumes batches from `receiver` until all senders are dropped.
    pub fn run(mut self, receiver: Receiver<Events>) {
        for events in receiver {
            self.handle_events(events);
        }

        debug!("event queue closed, stopping dispatcher");
    }

    /// Applies a batch of events in order.
    pub fn handle_events(&mut self, events: Events) {
        for event in events {
            self.handle_event(event);
        }
    }

    /// Applies a single event.
    pub fn handle_event(&mut self, event: Event) {
        let mapping = match self.mapper.get_mapping(event.name(), event.ty()) {
            Some((mapping, _)) if mapping.action == MappingAction::Drop => return,
            Some(found) => Some(found),
            None => {
                metric!(counter(MetricCounters::EventsUnmapped) += 1);
                None
            }
        };
        let defaults = self.mapper.defaults();

        let mapped = mapping.as_ref().map(|(mapping, _)| mapping.as_ref());
        let overrides = mapping.as_ref().map(|(_, labels)| labels);

        let name = escape_metric_name(mapped.map_or(event.name(), |m| m.name.as_str()));
        let help = mapped
            .and_then(|m| m.help.as_deref())
            .filter(|help| !help.is_empty())
            .unwrap_or(DEFAULT_HELP);

        let target = |mut labels: Labels| {
            if let Some(overrides) = overrides {
                labels.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
            }

            Target {
                name,
                help,
                labels,
                mapping: mapped,
            }
        };

        match event {
            Event::Counter { value, labels, .. } => self.handle_counter(target(labels), value),
            Event::Gauge {
                value,
                relative,
                labels,
                ..
            } => self.handle_gauge(target(labels), value, relative),
            Event::Timer { value, labels, .. } => {
                self.handle_timer(target(labels), value, &defaults)
            }
        }
    }

    fn handle_counter(&mut self, target: Target<'_>, value: f64) {
        // Prometheus counters cannot decrease. NaN would poison the counter for good.
        if value.is_nan() || value < 0.0 {
            debug!(
                "counter {:?} is {value} (counter must be non-negative value)",
                target.name
            );
            metric!(counter(MetricCounters::Events) += 1, kind = "illegal_negative_counter");
            return;
        }

        let result = check_kind(&self.kinds, &target.name, MetricKind::Counter).and_then(|_| {
            self.counters
                .get(&target.name, &target.labels, target.help)
                .map(|counter| counter.inc_by(value))
        });

        self.record(result, target.name, MetricKind::Counter, "counter");
    }

    fn handle_gauge(&mut self, target: Target<'_>, value: f64, relative: bool) {
        let result = check_kind(&self.kinds, &target.name, MetricKind::Gauge).and_then(|_| {
            self.gauges
                .get(&target.name, &target.labels, target.help)
                .map(|gauge| {
                    if relative {
                        gauge.add(value);
                    } else {
                        gauge.set(value);
                    }
                })
        });

        self.record(result, target.name, MetricKind::Gauge, "gauge");
    }

    fn handle_timer(&mut self, target: Target<'_>, value: f64, defaults: &MapperDefaults) {
        let timer_type = match target.mapping.map_or(TimerType::Default, |m| m.timer_type) {
            TimerType::Default => defaults.timer_type,
            timer_type => timer_type,
        };

        let (kind, result) = match timer_type {
            TimerType::Histogram => {
                let kind = MetricKind::Histogram;
                let result = check_kind(&self.kinds, &target.name, kind).and_then(|_| {
                    self.histograms
                        .get(
                            &target.name,
                            &target.labels,
                            target.help,
                            target.mapping,
                            defaults,
                        )
                        // Prometheus expects seconds, StatsD timers are in milliseconds.
                        .map(|histogram| histogram.observe(value / 1000.0))
                });
                (kind, result)
            }
            TimerType::Default | TimerType::Summary => {
                let kind = MetricKind::Summary;
                let result = check_kind(&self.kinds, &target.name, kind).and_then(|_| {
                    self.summaries
                        .get(
                            &target.name,
                            &target.labels,
                            target.help,
                            target.mapping,
                            defaults,
                        )
                        .map(|summary| summary.observe(value))
                });
                (kind, result)
            }
        };

        self.record(result, target.name, kind, "timer");
    }

    /// Counts the outcome of an update and remembers the kind of newly registered names.
    fn record(
        &mut self,
        result: Result<(), ContainerError>,
        name: String,
        kind: MetricKind,
        event_kind: &'static str,
    ) {
        match result {
            Ok(()) => {
                self.kinds.entry(name).or_insert(kind);
                metric!(counter(MetricCounters::Events) += 1, kind = event_kind);
            }
            Err(error) => {
                debug!(
                    "a change of configuration created inconsistent metrics for {name:?}. \
                     You have to restart the statsd_exporter, and you should consider the \
                     effects on your monitoring setup. Error: {}",
                    LogError(&error)
                );
                metric!(counter(MetricCounters::EventsConflict) += 1, kind = event_kind);
            }
        }
    }
}

fn check_kind(
    kinds: &HashMap<String, MetricKind>,
    name: &str,
    requested: MetricKind,
) -> Result<(), ContainerError> {
    match kinds.get(name) {
        Some(&existing) if existing != requested => Err(ContainerError::KindMismatch {
            name: name.to_owned(),
            existing,
            requested,
        }),
        _ => Ok(()),
    }
}
