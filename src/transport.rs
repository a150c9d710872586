//! The byte pipe between the client and the charging station.
//!
//! Modbus TCP has no way to match a late response to its request once a
//! timeout has passed, so a session never has more than one exchange in flight
//! (enforced by `&mut self`) and drops its socket after a timeout.

use std::{
    io::{ErrorKind, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    config::ConnectionTarget,
    error::{Error, ProtocolError, Result},
};

/// MBAP header: transaction id, protocol id, remaining length.
const MBAP_HEADER_LEN: usize = 6;

/// Largest Modbus TCP application data unit.
const MAX_FRAME_LEN: usize = 260;

/// A request/response channel to one device.
///
/// Implemented by [`TcpSession`] for real hardware; tests substitute a
/// simulated device.
pub trait Transport {
    /// Establish the connection described by `target`.
    fn open(&mut self, target: &ConnectionTarget) -> Result<()>;

    /// Release the connection. Safe to call when nothing is open.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Send one complete request frame and return the complete response frame.
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>>;

    /// Close whatever is open and connect to `target`, which may differ from before.
    fn reconnect(&mut self, target: &ConnectionTarget) -> Result<()> {
        self.close();
        self.open(target)
    }
}

/// Blocking Modbus TCP session on a single socket.
#[derive(Default)]
pub struct TcpSession {
    stream: Option<TcpStream>,
    /// Target of the last successful `open`, used to recover from timeouts.
    target: Option<ConnectionTarget>,
}

impl TcpSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn connect(target: &ConnectionTarget) -> Result<TcpStream> {
        let timeout = target.timeout();
        let addresses = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| Error::connection(format!("cannot resolve {target}"), e))?;

        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, timeout) {
                Ok(stream) => {
                    configure(&stream, timeout).map_err(|e| {
                        Error::connection(format!("cannot configure socket to {target}"), e)
                    })?;
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connecting to {address} failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(Error::Connection {
            context: format!("failed to connect to {target}"),
            source: last_error,
        })
    }

    fn timeout(&self) -> Duration {
        self.target
            .as_ref()
            .map(ConnectionTarget::timeout)
            .unwrap_or_default()
    }

    /// Reopen the socket dropped after a timeout.
    fn stream(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            let Some(target) = self.target.as_ref() else {
                return Err(Error::Connection {
                    context: "session is not open".into(),
                    source: None,
                });
            };
            debug!("Re-establishing connection to {target}");
            self.stream = Some(Self::connect(target)?);
        }
        self.stream.as_mut().ok_or_else(|| Error::Connection {
            context: "session is not open".into(),
            source: None,
        })
    }

    fn try_exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let timeout = self.timeout();
        let stream = self.stream()?;

        stream
            .write_all(request)
            .map_err(|e| map_io_error(e, timeout, "sending request"))?;

        // Read the fixed header first to learn the length of the rest of the frame.
        let mut response = vec![0u8; MBAP_HEADER_LEN];
        stream
            .read_exact(&mut response)
            .map_err(|e| map_io_error(e, timeout, "reading response header"))?;

        let total = frame_len(&response)?;
        response.resize(total, 0);
        stream
            .read_exact(&mut response[MBAP_HEADER_LEN..])
            .map_err(|e| map_io_error(e, timeout, "reading response body"))?;

        Ok(response)
    }
}

impl Transport for TcpSession {
    fn open(&mut self, target: &ConnectionTarget) -> Result<()> {
        self.close();
        let stream = Self::connect(target)?;
        info!("Connected to eM4 at {target}");
        self.stream = Some(stream);
        self.target = Some(target.clone());
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // The peer may already be gone, nothing left to do then.
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        if let Some(target) = self.target.take() {
            info!("Disconnected from {target}");
        }
    }

    fn is_open(&self) -> bool {
        self.target.is_some()
    }

    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let result = self.try_exchange(request);
        match &result {
            Ok(response) => debug!(
                "Exchanged {} request bytes for {} response bytes",
                request.len(),
                response.len()
            ),
            // Whatever arrives late would be taken as the answer to the next request.
            Err(Error::Timeout(_)) | Err(Error::Protocol(_)) => {
                warn!("Dropping connection after failed exchange");
                self.stream = None;
            }
            // The caller has to open the session again.
            Err(Error::Connection { .. }) => self.close(),
            Err(_) => {}
        }
        result
    }
}

/// Total frame length announced by an MBAP header.
fn frame_len(header: &[u8]) -> Result<usize> {
    let protocol = u16::from_be_bytes([header[2], header[3]]);
    let remaining = u16::from_be_bytes([header[4], header[5]]) as usize;
    if protocol != 0 {
        return Err(ProtocolError::InvalidHeader { protocol, remaining }.into());
    }
    // At least unit id and function code must follow.
    if remaining < 2 || MBAP_HEADER_LEN + remaining > MAX_FRAME_LEN {
        return Err(ProtocolError::InvalidHeader { protocol, remaining }.into());
    }
    Ok(MBAP_HEADER_LEN + remaining)
}

fn configure(stream: &TcpStream, timeout: Duration) -> std::io::Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_nodelay(true)
}

/// Socket timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows.
fn map_io_error(err: std::io::Error, timeout: Duration, while_doing: &str) -> Error {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout(timeout),
        _ => Error::connection(format!("connection lost while {while_doing}"), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn local_target(port: u16, timeout_ms: u64) -> ConnectionTarget {
        ConnectionTarget {
            port,
            timeout_ms,
            ..ConnectionTarget::new("127.0.0.1")
        }
    }

    #[test]
    fn header_lengths() {
        assert_eq!(frame_len(&[0, 1, 0, 0, 0, 5]).unwrap(), 11);
        assert!(frame_len(&[0, 1, 0, 7, 0, 5]).is_err());
        assert!(frame_len(&[0, 1, 0, 0, 0, 1]).is_err());
        assert!(frame_len(&[0, 1, 0, 0, 0x01, 0x00]).is_err());
    }

    #[test]
    fn exchange_without_open_is_a_connection_error() {
        let mut session = TcpSession::new();
        assert!(!session.is_open());
        assert!(matches!(
            session.exchange(&[0; 12]),
            Err(Error::Connection { .. })
        ));
        // Closing an unopened session is harmless.
        session.close();
        session.close();
    }

    #[test]
    fn refused_connection() {
        // Bind and drop to get a port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut session = TcpSession::new();
        let result = session.open(&local_target(port, 500));
        assert!(matches!(result, Err(Error::Connection { .. })));
        assert!(!session.is_open());
    }

    #[test]
    fn exchange_reads_complete_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).unwrap();
            // Send the header and the body separately.
            socket.write_all(&[request[0], request[1], 0, 0, 0, 5]).unwrap();
            socket.flush().unwrap();
            thread::sleep(Duration::from_millis(20));
            socket.write_all(&[0xFF, 0x03, 0x02, 0x00, 0xA0]).unwrap();
        });

        let mut session = TcpSession::new();
        session.open(&local_target(port, 2000)).unwrap();
        let request = [0x00, 0x01, 0, 0, 0, 6, 0xFF, 0x03, 0x30, 0x32, 0x00, 0x01];
        let response = session.exchange(&request).unwrap();
        assert_eq!(response, vec![0x00, 0x01, 0, 0, 0, 5, 0xFF, 0x03, 0x02, 0x00, 0xA0]);
        server.join().unwrap();
    }

    #[test]
    fn silent_peer_times_out_then_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            // The first connection never answers.
            let (silent, _) = listener.accept().unwrap();
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).unwrap();
            socket
                .write_all(&[request[0], request[1], 0, 0, 0, 5, 0xFF, 0x03, 0x02, 0x00, 0xC2])
                .unwrap();
            drop(silent);
        });

        let mut session = TcpSession::new();
        session.open(&local_target(port, 50)).unwrap();
        let request = [0x00, 0x01, 0, 0, 0, 6, 0xFF, 0x03, 0x30, 0x31, 0x00, 0x01];
        let result = session.exchange(&request);
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(session.is_open());

        // The next exchange goes out on a fresh connection to the same target.
        let response = session.exchange(&request).unwrap();
        assert_eq!(&response[6..], &[0xFF, 0x03, 0x02, 0x00, 0xC2]);
        server.join().unwrap();
    }

    #[test]
    fn peer_closing_mid_exchange_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).unwrap();
            socket.write_all(&[request[0], request[1], 0]).unwrap();
        });

        let mut session = TcpSession::new();
        session.open(&local_target(port, 2000)).unwrap();
        let request = [0x00, 0x01, 0, 0, 0, 6, 0xFF, 0x03, 0x30, 0x31, 0x00, 0x01];
        let result = session.exchange(&request);
        assert!(matches!(result, Err(Error::Connection { .. })));
        server.join().unwrap();

        // No silent reconnect: the session stays closed until opened again.
        assert!(!session.is_open());
        assert!(matches!(
            session.exchange(&request),
            Err(Error::Connection { .. })
        ));
    }
}
