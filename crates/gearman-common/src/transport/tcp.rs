use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol::error::{GearmanError, Result};
use crate::protocol::{Request, ServerMessage};
use crate::transport::codec::GearmanCodec;
use crate::transport::connection::{Connection, Connector};

/// Port job servers listen on unless told otherwise.
pub const DEFAULT_PORT: u16 = 4730;

const READ_CHUNK: usize = 8 * 1024;

/// Appends the default port to an address that has none.
///
/// # Example
///
/// ```
/// use gearman_common::transport::tcp::normalize_address;
///
/// assert_eq!(normalize_address("localhost"), "localhost:4730");
/// assert_eq!(normalize_address("10.0.0.5:7003"), "10.0.0.5:7003");
/// ```
pub fn normalize_address(server: &str) -> String {
    let server = server.trim();
    if server.parse::<SocketAddr>().is_ok() || server.contains(':') {
        server.to_string()
    } else {
        format!("{}:{}", server, DEFAULT_PORT)
    }
}

/// Opens TCP connections to job servers.
///
/// The address is resolved (it may resolve to several socket addresses) and
/// each candidate is tried in turn until one connects within the timeout.
///
/// # Example
///
/// ```no_run
/// use gearman_common::transport::{Connector, TcpConnector};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let conn = TcpConnector.connect("127.0.0.1:4730", Duration::from_secs(1)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Connection = TcpConnection;

    async fn connect(&self, server: &str, timeout: Duration) -> Result<TcpConnection> {
        let addr = normalize_address(server);

        let socket_addrs = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| GearmanError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match tokio::time::timeout(timeout, TcpStream::connect(socket_addr)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true).map_err(|e| {
                        GearmanError::Connection(format!("Failed to set TCP_NODELAY: {}", e))
                    })?;
                    debug!(server = %addr, peer = %socket_addr, "Connected to job server");
                    return Ok(TcpConnection::new(stream, addr.clone()));
                }
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => last_err = Some(format!("timed out after {}ms", timeout.as_millis())),
            }
        }

        Err(GearmanError::Connection(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err.unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }
}

/// A TCP connection to one job server with an incremental read buffer.
pub struct TcpConnection {
    stream: TcpStream,
    addr: String,
    buffer: Vec<u8>,
    connected: bool,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, addr: impl Into<String>) -> Self {
        Self {
            stream,
            addr: addr.into(),
            buffer: Vec::new(),
            connected: true,
        }
    }

    fn decode_buffered(&mut self) -> Result<Option<ServerMessage>> {
        match GearmanCodec::decode_response(&self.buffer) {
            Ok(Some((message, used))) => {
                self.buffer.drain(..used);
                Ok(Some(message))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.connected = false;
                Err(e)
            }
        }
    }

    /// Map IO errors to appropriate GearmanError variants
    ///
    /// - Socket timeouts and connection errors -> `Connection`
    /// - Other IO errors -> `Io`
    fn map_io_error(&self, err: std::io::Error, context: &str) -> GearmanError {
        match err.kind() {
            std::io::ErrorKind::TimedOut => {
                GearmanError::Connection(format!("{} ({}): Timed out", context, self.addr))
            }
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => {
                GearmanError::Connection(format!("{} ({}): Connection lost", context, self.addr))
            }
            _ => GearmanError::Io(err),
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&mut self, request: &Request) -> Result<()> {
        if !self.connected {
            return Err(GearmanError::Connection(format!("{} is closed", self.addr)));
        }

        let encoded = GearmanCodec::encode_request(request);
        let written = async {
            self.stream.write_all(&encoded).await?;
            self.stream.flush().await
        }
        .await;

        if let Err(e) = written {
            self.connected = false;
            return Err(self.map_io_error(e, "writing packet"));
        }

        debug!(
            server = %self.addr,
            packet = request.packet_type().name(),
            "Sent packet"
        );
        Ok(())
    }

    async fn readable(&self) -> Result<()> {
        if GearmanCodec::has_frame(&self.buffer) {
            return Ok(());
        }
        self.stream
            .readable()
            .await
            .map_err(|e| self.map_io_error(e, "waiting for data"))
    }

    fn try_read(&mut self) -> Result<Option<ServerMessage>> {
        if let Some(message) = self.decode_buffered()? {
            return Ok(Some(message));
        }

        let mut chunk = [0u8; READ_CHUNK];
        let mut eof = false;
        loop {
            match self.stream.try_read(&mut chunk) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.connected = false;
                    return Err(self.map_io_error(e, "reading packet"));
                }
            }
        }

        // Packets that arrived before the peer closed are still delivered.
        match self.decode_buffered()? {
            Some(message) => Ok(Some(message)),
            None if eof => {
                self.connected = false;
                Err(GearmanError::Connection(format!(
                    "{} closed the connection",
                    self.addr
                )))
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        if self.connected {
            let _ = self.stream.shutdown().await;
            self.connected = false;
            debug!(server = %self.addr, "Closed connection");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
