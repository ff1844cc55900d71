use exporter_telemetry::CounterMetric;

/// Counter metrics for line parsing and event dispatch.
pub enum MetricCounters {
    /// Incremented for every sample found on a line.
    ///
    /// A line with the multi-sample shorthand `name:1|c:2|c` counts two samples.
    SamplesReceived,

    /// Incremented for every rejected sample or sample component.
    ///
    /// This metric is tagged with:
    ///  - `reason`: One of `malformed_line`, `malformed_component`, `malformed_value`,
    ///    `illegal_sample_factor`, `invalid_sample_factor`, `unsupported_set` and `illegal_event`.
    SampleErrors,

    /// Incremented for every DogStatsD tag section.
    TagsReceived,

    /// Incremented for every tag that is skipped because it has no key or value.
    TagErrors,

    /// Incremented for every dispatched event.
    ///
    /// This metric is tagged with:
    ///  - `kind`: The metric the event updated (`counter`, `gauge`, `timer`) or
    ///    `illegal_negative_counter` for rejected counter decrements.
    Events,

    /// Incremented for every event without a mapping.
    EventsUnmapped,

    /// Incremented for every event that could not be recorded because its metric conflicts with an
    /// existing registration.
    ///
    /// This metric is tagged with:
    ///  - `kind`: `counter`, `gauge` or `timer`.
    EventsConflict,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::SamplesReceived => "statsd_exporter_samples_total",
            Self::SampleErrors => "statsd_exporter_sample_errors_total",
            Self::TagsReceived => "statsd_exporter_tags_total",
            Self::TagErrors => "statsd_exporter_tag_errors_total",
            Self::Events => "statsd_exporter_events_total",
            Self::EventsUnmapped => "statsd_exporter_events_unmapped_total",
            Self::EventsConflict => "statsd_exporter_events_conflict_total",
        }
    }

    fn help(&self) -> &'static str {
        match *self {
            Self::SamplesReceived => "The total number of StatsD samples received.",
            Self::SampleErrors => "The total number of errors parsing StatsD samples.",
            Self::TagsReceived => "The total number of DogStatsD tags processed.",
            Self::TagErrors => "The number of errors parsing DogStatsD tags.",
            Self::Events => "The total number of StatsD events seen.",
            Self::EventsUnmapped => "The total number of StatsD events no mapping was found for.",
            Self::EventsConflict => "The total number of StatsD events with conflicting names.",
        }
    }
}
