use std::io;
use std::net::{SocketAddr, UdpSocket};

use crossbeam_channel::Sender;
use exporter_log::LogError;
use exporter_metrics::{Events, parse_line};
use exporter_telemetry::metric;
use socket2::{Domain, Protocol, Socket, Type};

use crate::ServerError;
use crate::statsd::ServerCounters;

/// Receives StatsD datagrams and forwards one batch of events per datagram.
#[derive(Debug)]
pub struct UdpListener {
    socket: UdpSocket,
    buffer_size: usize,
}

impl UdpListener {
    /// Binds a UDP socket to `addr`.
    ///
    /// Datagrams longer than `buffer_size` are truncated. If `read_buffer` is set, it is applied
    /// as the kernel receive buffer size of the socket.
    pub fn bind(
        addr: SocketAddr,
        buffer_size: usize,
        read_buffer: Option<usize>,
    ) -> Result<Self, ServerError> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if let Some(size) = read_buffer {
            socket.set_recv_buffer_size(size)?;
        }
        socket.bind(&addr.into())?;

        Ok(Self {
            socket: socket.into(),
            buffer_size,
        })
    }

    /// Returns the address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives datagrams until the socket fails or the receiving end of `sender` is dropped.
    pub fn listen(self, sender: Sender<Events>) -> io::Result<()> {
        let mut buffer = vec![0; self.buffer_size];

        loop {
            let len = match self.socket.recv(&mut buffer) {
                Ok(len) => len,
                Err(error) => {
                    exporter_log::error!("failed to read from UDP socket: {}", LogError(&error));
                    return Err(error);
                }
            };

            metric!(counter(ServerCounters::UdpPackets) += 1);

            let events = handle_packet(&buffer[..len]);
            if !events.is_empty() && sender.send(events).is_err() {
                exporter_log::debug!("event queue closed, stopping UDP listener");
                return Ok(());
            }
        }
    }
}

/// Parses all newline-separated lines of a datagram into a single batch.
fn handle_packet(packet: &[u8]) -> Events {
    let mut events = Events::new();

    for line in packet.split(|&b| b == b'\n').filter(|line| !line.is_empty()) {
        metric!(counter(ServerCounters::Lines) += 1, listener = "udp");
        events.extend(parse_line(line));
    }

    events
}
