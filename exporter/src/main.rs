//! The StatsD exporter binary.
//!
//! The exporter receives StatsD metrics with DogStatsD tags over UDP and TCP and converts them
//! into Prometheus metrics.
//!
//! # Commands
//!
//!  - `run`: binds the configured listeners and dispatches metrics until stopped.
//!  - `parse`: decodes StatsD lines from a file or stdin and prints the resulting events.
//!  - `config show`: prints the effective configuration.
//!
//! # Configuration
//!
//! The configuration is a YAML file passed with `--config`. Every option has a default, so the
//! exporter also starts without one:
//!
//! ```yaml
//! listen:
//!   udp: "0.0.0.0:9125"
//!   tcp: "0.0.0.0:9125"
//! mapping:
//!   path: mapping.yml
//! ```

mod cli;
mod cliapp;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            exporter_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
