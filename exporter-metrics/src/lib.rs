//! StatsD protocol decoding and conversion into Prometheus metrics.
//!
//! This crate contains the core of the exporter that does not touch the network:
//!
//!  - [`parse_line`] decodes one StatsD line into [`Event`]s. It is pure and can be called from
//!    any number of listener threads.
//!  - [`Dispatcher`] consumes batches of events from a queue, resolves each through a
//!    [`MetricMapper`] and updates the matching metric.
//!  - The [`container`] module caches the counters, gauges, summaries and histograms the
//!    dispatcher creates, keyed by a [`fingerprint`] of their name and labels.
//!
//! # Protocol
//!
//! Lines follow the StatsD format with DogStatsD tags:
//!
//! ```text
//! <name>:<value>|<type>[|@<sample_rate>][|#<tag_key>:<tag_value>,...]
//! ```
//!
//! See the [`protocol`] module for details.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use exporter_metrics::{Dispatcher, MappingTable, parse_line};
//!
//! let registry = prometheus::Registry::new();
//! let mut dispatcher = Dispatcher::new(&registry, Arc::new(MappingTable::default()));
//!
//! dispatcher.handle_events(parse_line(b"http.requests:1|c|#method:get"));
//!
//! let families = registry.gather();
//! assert_eq!(families[0].get_name(), "http_requests");
//! ```

#![warn(missing_docs)]

pub mod container;
mod dispatcher;
mod event;
mod fingerprint;
mod mapping;
pub mod protocol;
mod statsd;
mod summary;

pub use self::dispatcher::*;
pub use self::event::*;
pub use self::fingerprint::*;
pub use self::mapping::*;
pub use self::protocol::{SampleError, escape_metric_name, parse_line};
pub use self::summary::*;
