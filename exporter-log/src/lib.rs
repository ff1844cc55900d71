//! Logging facade for the StatsD exporter.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The configuration
//! implements `serde` traits, so it is usually obtained from the exporter's configuration file.
//!
//! ```ignore
//! use exporter_log::{LogConfig, LogFormat};
//!
//! let log_config = LogConfig {
//!     format: LogFormat::Simplified,
//!     ..LogConfig::default()
//! };
//!
//! exporter_log::init(&log_config);
//! ```
//!
//! # Logging
//!
//! Use the five logging macros: [`error!`], [`warn!`], [`info!`], [`debug!`] and [`trace!`], where
//! `error!` represents the highest-priority log messages and `trace!` the lowest. Each of these
//! macros accepts format strings similarly to [`println!`] and structured fields like the macros
//! of the `tracing` crate.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages over verbose text. Choose the log level according to these rules:
//!
//! - [`error!`] for failures that stop a component, such as a listener socket error.
//! - [`warn!`] for undesirable behavior that the exporter recovers from.
//! - [`info!`] for messages relevant to the average user, such as startup information.
//! - [`debug!`] for rejected input: malformed lines, samples, tags and conflicting metrics.
//! - [`trace!`] for full auxiliary information.
//!
//! StatsD clients can produce large amounts of malformed input. Per-line problems are therefore
//! never logged above `debug`; they are counted by the exporter's own telemetry instead.
//!
//! ## Logging Error Types
//!
//! To log errors with their full chain of sources, use the [`LogError`] wrapper:
//!
//! ```
//! use std::io::{Error, ErrorKind};
//! use exporter_log::LogError;
//!
//! let custom_error = Error::new(ErrorKind::Other, "oh no!");
//! exporter_log::error!("operation failed: {}", LogError(&custom_error));
//! ```
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`] that should be called
//! at the beginning of a test. It routes logs to the test runner and enables all levels for the
//! calling crate.
//!
//! ```ignore
//! #[test]
//! fn test_something() {
//!     exporter_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
