//! Configuration for the StatsD exporter.
//!
//! The configuration is read from a YAML file in which every section is optional:
//!
//! ```yaml
//! listen:
//!   udp: "0.0.0.0:9125"
//!   tcp: "0.0.0.0:9125"
//! queue:
//!   capacity: 1024
//! logging:
//!   level: info
//! mapping:
//!   path: mapping.yml
//! ```
//!
//! Command line arguments are applied on top of the file with [`Config::apply_override`].

#![warn(missing_docs)]

mod config;

pub use crate::config::*;
