//! In-process duplex channel.
//!
//! Both directions are bounded mpsc queues. The client side is a
//! [`MemoryChannel`]; the other end is a [`MemoryPeer`] that sees every
//! outbound message and writes progress back.

use crate::error::{TransferError, TransferResult};
use crate::streaming::channel::{
    DuplexChannel, InboundMessage, MessageSink, MessageSource, OutboundMessage,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Client end of an in-process channel
pub struct MemoryChannel {
    outbound: mpsc::Sender<OutboundMessage>,
    inbound: mpsc::Receiver<InboundMessage>,
}

/// Peer end of an in-process channel
pub struct MemoryPeer {
    inbound: mpsc::Receiver<OutboundMessage>,
    outbound: Option<mpsc::Sender<InboundMessage>>,
}

impl MemoryChannel {
    /// Create a connected pair; `capacity` bounds each direction.
    pub fn pair(capacity: usize) -> (MemoryChannel, MemoryPeer) {
        let (chunk_tx, chunk_rx) = mpsc::channel(capacity.max(1));
        let (progress_tx, progress_rx) = mpsc::channel(capacity.max(1));
        (
            MemoryChannel {
                outbound: chunk_tx,
                inbound: progress_rx,
            },
            MemoryPeer {
                inbound: chunk_rx,
                outbound: Some(progress_tx),
            },
        )
    }
}

impl DuplexChannel for MemoryChannel {
    type Sink = MemorySink;
    type Source = MemorySource;

    fn split(self) -> (Self::Sink, Self::Source) {
        (
            MemorySink {
                outbound: Some(self.outbound),
            },
            MemorySource {
                inbound: self.inbound,
            },
        )
    }
}

pub struct MemorySink {
    outbound: Option<mpsc::Sender<OutboundMessage>>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, msg: OutboundMessage) -> TransferResult<()> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| TransferError::Send("send after half-close".into()))?;
        tx.send(msg)
            .await
            .map_err(|_| TransferError::Send("peer went away".into()))
    }

    async fn close_send(&mut self) -> TransferResult<()> {
        self.outbound = None;
        Ok(())
    }
}

pub struct MemorySource {
    inbound: mpsc::Receiver<InboundMessage>,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn receive(&mut self) -> TransferResult<Option<InboundMessage>> {
        Ok(self.inbound.recv().await)
    }
}

impl MemoryPeer {
    /// Next message from the client, `None` once the client half-closed.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.inbound.recv().await
    }

    /// Send a progress value to the client.
    pub async fn send_progress(&self, percent_complete: f64) -> TransferResult<()> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| TransferError::Send("peer already closed".into()))?;
        tx.send(InboundMessage { percent_complete })
            .await
            .map_err(|_| TransferError::Send("client went away".into()))
    }

    /// Close the peer's direction; the client sees end-of-stream.
    pub fn close(&mut self) {
        self.outbound = None;
    }
}
