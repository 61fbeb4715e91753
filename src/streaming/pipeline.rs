//! Transfer session pipeline.
//!
//! Orchestrates the Uplink, Downlink and Aggregator tasks and resolves them
//! into a single [`SessionReport`].

use crate::error::{TransferError, TransferResult};
use crate::streaming::channel::{progress_channel, DuplexChannel, TransferMetadata};
use crate::streaming::downlink::{DownlinkStats, ProgressDownlink};
use crate::streaming::progress::{ProgressAggregator, ProgressOutcome, ProgressSink};
use crate::streaming::source::ChunkSource;
use crate::streaming::uplink::{TransferUplink, UplinkConfig, UplinkStats};
use serde::Serialize;
use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session options
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Send file name and size with the first chunk only
    pub metadata_once: bool,
}

/// Everything a finished session produced
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub metadata: TransferMetadata,
    pub uplink: UplinkStats,
    pub downlink: DownlinkStats,
    pub progress: ProgressOutcome,
    pub elapsed_ms: u64,
}

/// Orchestrator for one file transfer
pub struct SessionCoordinator {
    config: SessionConfig,
    cancel: CancellationToken,
}

impl SessionCoordinator {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort sessions when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts every session run by this coordinator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Transfer `path` over the channel produced by `connect`.
    ///
    /// The file is checked and opened before `connect` is polled, so a
    /// missing file never opens a connection. Once the tasks are running this
    /// only returns after all three have settled. Dropping the returned future
    /// cancels the session's tasks.
    pub async fn run<C, F>(
        &self,
        path: &Path,
        connect: F,
        sink: Box<dyn ProgressSink>,
    ) -> TransferResult<SessionReport>
    where
        C: DuplexChannel,
        F: Future<Output = TransferResult<C>>,
    {
        let started = Instant::now();
        let metadata = resolve_metadata(path).await?;
        let mut source = ChunkSource::open(path).await?;

        info!(
            file = %metadata.file_name,
            size = metadata.total_size_bytes,
            "starting transfer"
        );

        let cancel = self.cancel.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let channel = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            c = connect => c.map_err(|e| match e {
                TransferError::Connection(_) => e,
                other => TransferError::Connection(other.to_string()),
            })?,
        };
        let (mut tx_half, mut rx_half) = channel.split();

        let (progress_tx, progress_rx) = progress_channel();

        let uplink = TransferUplink::new(UplinkConfig {
            metadata: metadata.clone(),
            metadata_once: self.config.metadata_once,
        });
        let up_cancel = cancel.clone();
        let uplink_handle =
            tokio::spawn(async move { uplink.run(&mut source, &mut tx_half, &up_cancel).await });

        let down_cancel = cancel.clone();
        let downlink_handle = tokio::spawn(async move {
            ProgressDownlink::new()
                .run(&mut rx_half, progress_tx, &down_cancel)
                .await
        });

        let aggregator = ProgressAggregator::new(metadata.total_size_bytes, sink);
        let aggregator_handle = tokio::spawn(aggregator.run(progress_rx));

        debug!("session tasks started");
        let (uplink, downlink, progress) =
            tokio::join!(uplink_handle, downlink_handle, aggregator_handle);

        let uplink = uplink.map_err(TransferError::from).and_then(|r| r);
        let downlink = downlink.map_err(TransferError::from).and_then(|r| r);
        let progress = progress.map_err(TransferError::from);

        if is_cancelled(&uplink) || is_cancelled(&downlink) || is_cancelled(&progress) {
            warn!(file = %metadata.file_name, "transfer cancelled");
            return Err(TransferError::Cancelled);
        }

        let (uplink, downlink, progress) = match (uplink, downlink, progress) {
            (Ok(u), Ok(d), Ok(p)) => (u, d, p),
            (Err(e), _, _) | (Ok(_), Err(e), _) | (Ok(_), Ok(_), Err(e)) => {
                warn!(file = %metadata.file_name, error = %e, "transfer failed");
                return Err(e);
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            file = %metadata.file_name,
            chunks = uplink.chunks_sent,
            bytes = uplink.bytes_sent,
            acks = downlink.messages,
            elapsed_ms,
            "transfer finished"
        );

        Ok(SessionReport {
            metadata,
            uplink,
            downlink,
            progress,
            elapsed_ms,
        })
    }
}

fn is_cancelled<T>(result: &TransferResult<T>) -> bool {
    matches!(result, Err(TransferError::Cancelled))
}

/// Stat `path` and derive the session metadata.
pub async fn resolve_metadata(path: &Path) -> TransferResult<TransferMetadata> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| TransferError::from_open(path, e))?;

    if !meta.is_file() {
        return Err(TransferError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        )));
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            TransferError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", path.display()),
            ))
        })?;

    Ok(TransferMetadata {
        file_name,
        total_size_bytes: meta.len(),
    })
}
