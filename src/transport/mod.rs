//! Duplex channel implementations.
//!
//! - [`framed`]: length-prefixed frames over any byte stream (TCP, pipes)
//! - [`memory`]: in-process queues, for embedding and tests

pub mod framed;
pub mod memory;

pub use framed::{FramedChannel, FramedSink, FramedSource};
pub use memory::{MemoryChannel, MemoryPeer};

use crate::error::{TransferError, TransferResult};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Framed channel over a TCP connection
pub type TcpChannel = FramedChannel<OwnedReadHalf, OwnedWriteHalf>;

/// Dial `addr` and wrap the connection in a framed channel.
pub async fn connect_tcp(addr: &str) -> TransferResult<TcpChannel> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransferError::Connection(format!("{addr}: {e}")))?;
    stream
        .set_nodelay(true)
        .map_err(|e| TransferError::Connection(format!("{addr}: {e}")))?;

    debug!(%addr, "connected");
    Ok(FramedChannel::from_tcp(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = connect_tcp(&addr).await;
        assert!(matches!(result, Err(TransferError::Connection(_))));
    }
}
