//! Uplink task for the transfer pipeline.
//!
//! Drains a [`ChunkSource`], wraps every chunk with the session metadata and
//! sends it over the outbound half of the duplex channel. The outbound half
//! is closed exactly once when the task ends, whatever the reason.

use crate::error::{TransferError, TransferResult};
use crate::streaming::channel::{Chunk, MessageSink, OutboundMessage, TransferMetadata};
use crate::streaming::source::ChunkSource;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn, Level};

/// How long a cancelled uplink waits for the half-close to go through
const CANCELLED_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Uplink configuration
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// Metadata attached to outbound messages
    pub metadata: TransferMetadata,
    /// Attach metadata to the first message only
    pub metadata_once: bool,
}

/// Counters for a finished uplink
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct UplinkStats {
    pub chunks_sent: u64,
    pub bytes_sent: u64,
}

/// Uplink state
pub struct TransferUplink {
    config: UplinkConfig,
    stats: UplinkStats,
}

impl TransferUplink {
    pub fn new(config: UplinkConfig) -> Self {
        Self {
            config,
            stats: UplinkStats::default(),
        }
    }

    /// Run the uplink to completion.
    ///
    /// The source releases its file handle before the half-close, on every
    /// path. The first error wins; a failed half-close is only reported when
    /// the transfer itself succeeded.
    pub async fn run<S>(
        mut self,
        source: &mut ChunkSource,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> TransferResult<UplinkStats>
    where
        S: MessageSink + ?Sized,
    {
        let result = self.pump(source, sink, cancel).await;
        source.close();

        let closed = if cancel.is_cancelled() {
            tokio::time::timeout(CANCELLED_CLOSE_GRACE, sink.close_send())
                .await
                .unwrap_or_else(|_| Err(TransferError::Cancelled))
        } else {
            sink.close_send().await
        };
        debug!(
            chunks = self.stats.chunks_sent,
            bytes = self.stats.bytes_sent,
            "uplink half-closed"
        );

        match (result, closed) {
            (Ok(()), Ok(())) => Ok(self.stats),
            (Ok(()), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!(error = %close_err, "half-close after uplink failure also failed");
                }
                warn!(
                    error = %e,
                    chunks = self.stats.chunks_sent,
                    "uplink aborted"
                );
                Err(e)
            }
        }
    }

    async fn pump<S>(
        &mut self,
        source: &mut ChunkSource,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> TransferResult<()>
    where
        S: MessageSink + ?Sized,
    {
        while let Some(chunk) = source.next_chunk_or_cancel(cancel).await? {
            let msg = self.wrap(chunk);
            let len = msg.chunk.len() as u64;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                sent = sink.send(msg) => sent?,
            }

            self.stats.chunks_sent += 1;
            self.stats.bytes_sent += len;
        }
        Ok(())
    }

    fn wrap(&self, chunk: Chunk) -> OutboundMessage {
        if tracing::enabled!(Level::TRACE) {
            let digest = blake3::hash(&chunk.data);
            trace!(
                offset = chunk.offset,
                len = chunk.len(),
                digest = %hex::encode(&digest.as_bytes()[..8]),
                "sending chunk"
            );
        }

        let metadata = if self.config.metadata_once && self.stats.chunks_sent > 0 {
            None
        } else {
            Some(self.config.metadata.clone())
        };

        OutboundMessage { chunk, metadata }
    }
}
