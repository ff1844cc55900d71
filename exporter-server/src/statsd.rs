use exporter_telemetry::CounterMetric;

/// Counter metrics used by the listeners.
pub enum ServerCounters {
    /// Incremented for every UDP datagram received.
    UdpPackets,
    /// Incremented for every accepted TCP connection.
    TcpConnections,
    /// Incremented when reading from a TCP connection fails.
    ///
    /// The connection is closed afterwards.
    TcpConnectionErrors,
    /// Incremented for every TCP line that exceeds the line buffer.
    ///
    /// The connection is closed afterwards.
    TcpTooLongLines,
    /// Incremented for every non-empty line received over UDP or TCP.
    ///
    /// This metric is tagged with:
    ///  - `listener`: `udp` or `tcp`.
    Lines,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::UdpPackets => "statsd_exporter_udp_packets_total",
            Self::TcpConnections => "statsd_exporter_tcp_connections_total",
            Self::TcpConnectionErrors => "statsd_exporter_tcp_connection_errors_total",
            Self::TcpTooLongLines => "statsd_exporter_tcp_too_long_lines_total",
            Self::Lines => "statsd_exporter_lines_total",
        }
    }

    fn help(&self) -> &'static str {
        match self {
            Self::UdpPackets => "The total number of StatsD packets received over UDP.",
            Self::TcpConnections => "The total number of TCP connections handled.",
            Self::TcpConnectionErrors => "The number of errors encountered reading from TCP.",
            Self::TcpTooLongLines => {
                "The number of lines discarded due to being too long, over TCP."
            }
            Self::Lines => "The total number of StatsD lines received.",
        }
    }
}
