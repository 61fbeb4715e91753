//! Framed duplex channel over a byte stream.
//!
//! The write half carries CHUNK frames and is half-closed with
//! `shutdown()`. The read half yields PROGRESS frames until the peer shuts
//! down its own write half.

use crate::error::{TransferError, TransferResult};
use crate::streaming::channel::{
    DuplexChannel, InboundMessage, MessageSink, MessageSource, OutboundMessage,
};
use crate::streaming::protocol::{read_frame, write_frame, ChunkFrame, MessageType, ProgressFrame};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A read half and a write half speaking the transfer protocol
pub struct FramedChannel<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> FramedChannel<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl FramedChannel<OwnedReadHalf, OwnedWriteHalf> {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

impl<R, W> DuplexChannel for FramedChannel<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    type Sink = FramedSink<W>;
    type Source = FramedSource<R>;

    fn split(self) -> (Self::Sink, Self::Source) {
        (
            FramedSink {
                writer: self.writer,
                closed: false,
            },
            FramedSource {
                reader: self.reader,
                finished: false,
            },
        )
    }
}

/// Outbound half: encodes chunks as frames
pub struct FramedSink<W> {
    writer: W,
    closed: bool,
}

#[async_trait]
impl<W> MessageSink for FramedSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, msg: OutboundMessage) -> TransferResult<()> {
        if self.closed {
            return Err(TransferError::Send("send after half-close".into()));
        }

        let frame = ChunkFrame::from(msg)
            .encode()
            .map_err(|e| TransferError::Send(e.to_string()))?;
        write_frame(&mut self.writer, &frame)
            .await
            .map_err(|e| TransferError::Send(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| TransferError::Send(e.to_string()))
    }

    async fn close_send(&mut self) -> TransferResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer
            .shutdown()
            .await
            .map_err(|e| TransferError::Send(format!("half-close failed: {e}")))
    }
}

/// Inbound half: decodes progress frames
pub struct FramedSource<R> {
    reader: R,
    finished: bool,
}

#[async_trait]
impl<R> MessageSource for FramedSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn receive(&mut self) -> TransferResult<Option<InboundMessage>> {
        if self.finished {
            return Ok(None);
        }

        let frame = match read_frame(&mut self.reader).await {
            Ok(frame) => frame,
            Err(TransferError::Io(e)) => return Err(TransferError::Receive(e.to_string())),
            Err(e) => return Err(e),
        };

        match frame {
            None => {
                self.finished = true;
                Ok(None)
            }
            Some((MessageType::Progress, payload)) => {
                let progress = ProgressFrame::decode(payload)?;
                Ok(Some(InboundMessage {
                    percent_complete: progress.percent_complete,
                }))
            }
            Some((other, _)) => Err(TransferError::Protocol(format!(
                "unexpected {other:?} frame from peer"
            ))),
        }
    }
}
