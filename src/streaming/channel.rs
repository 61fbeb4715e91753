//! Channel types for the transfer pipeline.
//!
//! ChunkSource -> Uplink -> duplex sink, duplex source -> Downlink -> Aggregator.
//! The duplex channel is split into two halves so exactly one task sends and
//! exactly one task receives.

use crate::error::TransferResult;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

/// Maximum chunk size read from the file and sent per message.
pub const MAX_CHUNK_SIZE: usize = 4096;

/// Capacity of the Downlink -> Aggregator handoff.
///
/// Must stay 1: the downlink stalls instead of letting values pile up.
pub const PROGRESS_CHANNEL_SIZE: usize = 1;

// =============================================================================
// Chunk: ChunkSource -> Uplink
// =============================================================================

/// A slice of file bytes, read sequentially.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Offset of the first byte within the file
    pub offset: u64,

    /// Chunk content, never empty, at most [`MAX_CHUNK_SIZE`] bytes
    pub data: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// =============================================================================
// Wire-level messages
// =============================================================================

/// Session metadata, computed once when the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferMetadata {
    /// Name announced to the peer (final path component)
    pub file_name: String,

    /// File size at session start
    pub total_size_bytes: u64,
}

/// One outbound message per chunk.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub chunk: Chunk,

    /// `None` only when metadata is sent once per stream and this is not the first chunk
    pub metadata: Option<TransferMetadata>,
}

/// Progress acknowledgment authored by the peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InboundMessage {
    pub percent_complete: f64,
}

// =============================================================================
// Duplex channel halves
// =============================================================================

/// Outbound half of a duplex channel.
#[async_trait]
pub trait MessageSink: Send {
    /// Send one message. An error is terminal for the sending task.
    async fn send(&mut self, msg: OutboundMessage) -> TransferResult<()>;

    /// Half-close: no further outbound messages. Idempotent.
    async fn close_send(&mut self) -> TransferResult<()>;
}

/// Inbound half of a duplex channel.
#[async_trait]
pub trait MessageSource: Send {
    /// Next inbound message, or `None` once the peer closed its direction.
    async fn receive(&mut self) -> TransferResult<Option<InboundMessage>>;
}

/// A bidirectional message stream, split into its two directions.
pub trait DuplexChannel: Send {
    type Sink: MessageSink + 'static;
    type Source: MessageSource + 'static;

    fn split(self) -> (Self::Sink, Self::Source);
}

// =============================================================================
// Progress handoff
// =============================================================================

/// Sender for percentages from the Downlink
pub type ProgressSender = mpsc::Sender<f64>;

/// Receiver for percentages in the Aggregator
pub type ProgressReceiver = mpsc::Receiver<f64>;

/// Create the bounded Downlink -> Aggregator handoff
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::channel(PROGRESS_CHANNEL_SIZE)
}

// =============================================================================
// Tests
// =============================================================================
