//! Gearman Transport Layer
//!
//! This module provides the binary packet codec and the TCP transport used to
//! talk to job servers.
//!
//! # Architecture
//!
//! - **Codec**: [`GearmanCodec`] encodes and incrementally decodes packets
//! - **Seam**: [`Connection`] / [`Connector`] abstract one live server link,
//!   so the client engine can be driven by a scripted transport in tests
//! - **Transport**: [`TcpConnector`] / [`TcpConnection`] over tokio sockets
//! - **Wire Format**: `[magic] [u32 BE type] [u32 BE length] [NUL-separated args]`
//!
//! # Message Size Limits
//!
//! Payloads larger than [`codec::MAX_PAYLOAD_SIZE`] are rejected as malformed.
//!
//! # Example
//!
//! ```no_run
//! use gearman_common::transport::{Connection, Connector, TcpConnector};
//! use gearman_common::Request;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> gearman_common::Result<()> {
//! let mut conn = TcpConnector.connect("127.0.0.1", Duration::from_secs(1)).await?;
//! conn.send(&Request::EchoReq { data: b"ping".to_vec() }).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod tcp;

pub use codec::GearmanCodec;
pub use connection::{Connection, Connector};
pub use tcp::{TcpConnection, TcpConnector, DEFAULT_PORT};
