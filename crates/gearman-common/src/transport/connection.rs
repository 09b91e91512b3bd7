use async_trait::async_trait;
use std::time::Duration;

use crate::protocol::error::Result;
use crate::protocol::{Request, ServerMessage};

/// A live link to one job server.
///
/// The client engine multiplexes many of these from a single task, so the
/// read side is split in two: [`readable`](Self::readable) is the only
/// suspension point and [`try_read`](Self::try_read) never blocks.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Encode and write one packet.
    async fn send(&mut self, request: &Request) -> Result<()>;

    /// Resolves once a packet may be decodable: either a whole packet is
    /// already buffered or the socket has data.
    ///
    /// Must be cancel-safe; the engine races it against other connections.
    async fn readable(&self) -> Result<()>;

    /// Decode one buffered packet, reading whatever the socket has without
    /// blocking.
    ///
    /// `Ok(None)` means no complete packet yet. An error (peer closed,
    /// malformed packet) means the connection is unusable.
    fn try_read(&mut self) -> Result<Option<ServerMessage>>;

    async fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Opens [`Connection`]s to job servers by address.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    async fn connect(&self, server: &str, timeout: Duration) -> Result<Self::Connection>;
}
