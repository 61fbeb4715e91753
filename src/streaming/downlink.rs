//! Downlink task for the transfer pipeline.
//!
//! Pulls progress acknowledgments from the inbound half of the duplex
//! channel and hands each percentage to the aggregator. The handoff is
//! bounded, so a slow renderer stalls this loop rather than letting values
//! queue up.

use crate::error::{TransferError, TransferResult};
use crate::streaming::channel::{MessageSource, ProgressSender};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Counters for a finished downlink
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DownlinkStats {
    /// Acknowledgments received
    pub messages: u64,
    /// Last percentage the peer reported
    pub last_percent: Option<f64>,
}

/// Downlink state
#[derive(Debug, Default)]
pub struct ProgressDownlink {
    stats: DownlinkStats,
}

impl ProgressDownlink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run until the peer closes its direction, an error occurs or `cancel` fires.
    ///
    /// `progress` is consumed; it is dropped on every exit path so the
    /// aggregator always observes the end of the handoff.
    pub async fn run<S>(
        mut self,
        source: &mut S,
        progress: ProgressSender,
        cancel: &CancellationToken,
    ) -> TransferResult<DownlinkStats>
    where
        S: MessageSource + ?Sized,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                r = source.receive() => r,
            };

            let msg = match next {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    debug!(messages = self.stats.messages, "downlink reached end of stream");
                    return Ok(self.stats);
                }
                Err(e) => {
                    warn!(error = %e, messages = self.stats.messages, "downlink aborted");
                    return Err(match e {
                        TransferError::Protocol(m) => {
                            TransferError::Receive(format!("malformed message: {m}"))
                        }
                        other => other,
                    });
                }
            };

            let percent = msg.percent_complete;
            trace!(percent, "progress received");
            self.stats.messages += 1;
            self.stats.last_percent = Some(percent);

            let forwarded = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                r = progress.send(percent) => r,
            };
            if forwarded.is_err() {
                return Err(TransferError::Task("progress renderer stopped early".into()));
            }
        }
    }
}
