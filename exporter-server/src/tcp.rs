use std::io::{self, BufRead, BufReader, Read};
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream};
use std::thread;

use crossbeam_channel::Sender;
use exporter_log::LogError;
use exporter_metrics::{Events, parse_line};
use exporter_telemetry::metric;

use crate::ServerError;
use crate::statsd::ServerCounters;

/// Accepts StatsD connections and forwards one batch of events per line.
///
/// Every connection is read on its own thread.
#[derive(Debug)]
pub struct TcpListener {
    listener: StdTcpListener,
    line_buffer_size: usize,
}

impl TcpListener {
    /// Binds a TCP listener to `addr`.
    ///
    /// Lines longer than `line_buffer_size` bytes, excluding the line terminator, close the
    /// connection they were received on.
    pub fn bind(addr: SocketAddr, line_buffer_size: usize) -> Result<Self, ServerError> {
        Ok(Self {
            listener: StdTcpListener::bind(addr)?,
            line_buffer_size,
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until accepting fails.
    pub fn listen(self, sender: Sender<Events>) -> io::Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(error) => {
                    exporter_log::error!("failed to accept TCP connection: {}", LogError(&error));
                    return Err(error);
                }
            };

            let connection = Connection {
                peer,
                limit: self.line_buffer_size,
                sender: sender.clone(),
            };

            let spawned = thread::Builder::new()
                .name(format!("tcp-{peer}"))
                .spawn(move || connection.handle(stream));

            if let Err(error) = spawned {
                exporter_log::error!(
                    "failed to spawn thread for TCP connection from {peer}: {}",
                    LogError(&error)
                );
            }
        }
    }
}

/// Outcome of reading a single line from a connection.
#[derive(Debug, PartialEq)]
enum ReadLine {
    Line,
    TooLong,
    Eof,
}

/// Reads the next line into `line`, without its terminating newline.
///
/// At most `limit + 1` bytes are consumed, so an oversized line is detected without buffering it.
fn read_line<R: BufRead>(reader: &mut R, limit: usize, line: &mut Vec<u8>) -> io::Result<ReadLine> {
    line.clear();

    let read = reader.by_ref().take(limit as u64 + 1).read_until(b'\n', line)?;
    if read == 0 {
        return Ok(ReadLine::Eof);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
    } else if line.len() > limit {
        return Ok(ReadLine::TooLong);
    }

    Ok(ReadLine::Line)
}

struct Connection {
    peer: SocketAddr,
    limit: usize,
    sender: Sender<Events>,
}

impl Connection {
    fn handle(self, stream: TcpStream) {
        metric!(counter(ServerCounters::TcpConnections) += 1);
        exporter_log::trace!("accepted TCP connection from {}", self.peer);

        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();

        loop {
            match read_line(&mut reader, self.limit, &mut line) {
                Ok(ReadLine::Line) => {}
                Ok(ReadLine::Eof) => break,
                Ok(ReadLine::TooLong) => {
                    metric!(counter(ServerCounters::TcpTooLongLines) += 1);
                    exporter_log::debug!(
                        "closing TCP connection from {}: line exceeds {} bytes",
                        self.peer,
                        self.limit
                    );
                    break;
                }
                Err(error) => {
                    metric!(counter(ServerCounters::TcpConnectionErrors) += 1);
                    exporter_log::debug!(
                        "failed to read from TCP connection {}: {}",
                        self.peer,
                        LogError(&error)
                    );
                    break;
                }
            }

            if line.is_empty() {
                continue;
            }

            metric!(counter(ServerCounters::Lines) += 1, listener = "tcp");

            let events = parse_line(&line);
            if !events.is_empty() && self.sender.send(events).is_err() {
                break;
            }
        }

        exporter_log::trace!("closed TCP connection from {}", self.peer);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use similar_asserts::assert_eq;

    use super::*;

    fn read_all(input: &[u8], limit: usize) -> Vec<(ReadLine, String)> {
        let mut reader = Cursor::new(input);
        let mut line = Vec::new();
        let mut lines = Vec::new();

        loop {
            let result = read_line(&mut reader, limit, &mut line).unwrap();
            let done = result != ReadLine::Line;
            lines.push((result, String::from_utf8_lossy(&line).into_owned()));
            if done {
                return lines;
            }
        }
    }

    #[test]
    fn test_read_lines() {
        let lines = read_all(b"foo:1|c\nbar:2|c", 16);

        assert_eq!(
            lines,
            [
                (ReadLine::Line, "foo:1|c".to_owned()),
                (ReadLine::Line, "bar:2|c".to_owned()),
                (ReadLine::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn test_line_at_limit() {
        let lines = read_all(b"12345678\n", 8);
        assert_eq!(lines[0], (ReadLine::Line, "12345678".to_owned()));
    }

    #[test]
    fn test_line_too_long() {
        let lines = read_all(b"123456789\nfoo:1|c\n", 8);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, ReadLine::TooLong);
    }
}
