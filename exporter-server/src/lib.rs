//! Network front end of the StatsD exporter.
//!
//! The server binds a UDP socket and a TCP listener, parses every received line with
//! [`parse_line`](exporter_metrics::parse_line) and hands the resulting events to a
//! [`Dispatcher`](exporter_metrics::Dispatcher) through a bounded queue:
//!
//! ```text
//! UDP datagram ──┐
//!                ├─▶ bounded queue ──▶ dispatcher ──▶ prometheus::Registry
//! TCP line ──────┘
//! ```
//!
//! A UDP datagram may carry multiple newline-separated lines, which are forwarded as one batch.
//! Over TCP, every line is forwarded as its own batch.
//!
//! Use [`ServerState::start`] to run the full pipeline, or the listeners directly to feed another
//! queue.

#![warn(missing_docs)]

mod service;
mod statsd;
mod tcp;
mod udp;

pub use self::service::*;
pub use self::tcp::TcpListener;
pub use self::udp::UdpListener;
