use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use exporter_config::Config;
use exporter_metrics::{Dispatcher, MetricMapper};
use prometheus::Registry;

use crate::tcp::TcpListener;
use crate::udp::UdpListener;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[from] io::Error),

    /// A worker thread could not be started.
    #[error("failed to spawn {0} thread")]
    SpawnFailed(&'static str, #[source] io::Error),

    /// The dispatcher thread panicked and no longer consumes events.
    #[error("dispatcher thread panicked")]
    DispatcherPanicked,
}

fn spawn<F>(name: &'static str, f: F) -> Result<JoinHandle<()>, ServerError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .map_err(|error| ServerError::SpawnFailed(name, error))
}

/// The running exporter: listeners, the event queue and the dispatcher.
///
/// Listeners push batches of events into a bounded queue. A single dispatcher thread drains it
/// and updates the metrics in the registry. When the queue is full, listeners block until the
/// dispatcher catches up.
#[derive(Debug)]
pub struct ServerState {
    udp_addr: Option<SocketAddr>,
    tcp_addr: Option<SocketAddr>,
    dispatcher: JoinHandle<()>,
}

impl ServerState {
    /// Binds the configured listeners and starts all threads.
    ///
    /// Metrics are registered in `registry` and resolved through `mapper`.
    pub fn start(
        config: &Config,
        registry: &Registry,
        mapper: Arc<dyn MetricMapper>,
    ) -> Result<Self, ServerError> {
        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity());

        let udp = config
            .udp_addr()
            .map(|addr| {
                UdpListener::bind(addr, config.udp_buffer_size(), config.udp_read_buffer())
            })
            .transpose()?;

        let tcp = config
            .tcp_addr()
            .map(|addr| TcpListener::bind(addr, config.tcp_line_buffer_size()))
            .transpose()?;

        let udp_addr = udp.as_ref().map(UdpListener::local_addr).transpose()?;
        let tcp_addr = tcp.as_ref().map(TcpListener::local_addr).transpose()?;

        let dispatcher = Dispatcher::new(registry, mapper);
        let dispatcher = spawn("dispatcher", move || dispatcher.run(receiver))?;

        if let Some(listener) = udp {
            let sender = sender.clone();
            spawn("udp-listener", move || {
                listener.listen(sender).ok();
            })?;
        }

        if let Some(listener) = tcp {
            let sender = sender.clone();
            spawn("tcp-listener", move || {
                listener.listen(sender).ok();
            })?;
        }

        if let Some(addr) = udp_addr {
            exporter_log::info!("accepting StatsD traffic over UDP on {addr}");
        }
        if let Some(addr) = tcp_addr {
            exporter_log::info!("accepting StatsD traffic over TCP on {addr}");
        }

        Ok(Self {
            udp_addr,
            tcp_addr,
            dispatcher,
        })
    }

    /// Returns the bound UDP address, if the UDP listener is enabled.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    /// Returns the bound TCP address, if the TCP listener is enabled.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// Blocks until the dispatcher stops.
    ///
    /// The dispatcher stops once all listeners and connections have terminated. Returns an error
    /// if it stopped by panicking.
    pub fn join(self) -> Result<(), ServerError> {
        join_dispatcher(self.dispatcher)
    }
}

fn join_dispatcher(handle: JoinHandle<()>) -> Result<(), ServerError> {
    handle.join().map_err(|_| ServerError::DispatcherPanicked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_finished_dispatcher() {
        let handle = thread::spawn(|| ());
        assert!(join_dispatcher(handle).is_ok());
    }

    #[test]
    fn test_join_panicked_dispatcher() {
        let handle = thread::spawn(|| panic!("dispatcher failed"));
        assert!(matches!(
            join_dispatcher(handle),
            Err(ServerError::DispatcherPanicked)
        ));
    }
}
