//! Wire format for the transfer protocol.
//!
//! All multi-byte integers are big-endian.
//! Strings are length-prefixed (u16 len + UTF-8).
//! Frame format: len:u32 | type:u8 | payload (len counts the payload only)
//!
//! Client -> peer: CHUNK frames, one per file chunk.
//! Peer -> client: PROGRESS frames, one percentage each.
//! Either side ends its direction by shutting down its write half; a clean
//! EOF on a frame boundary is end-of-stream.

use crate::error::{TransferError, TransferResult};
use crate::streaming::channel::{OutboundMessage, TransferMetadata};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum accepted payload size (1MB, far above one chunk)
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Frame header: len:u32 + type:u8
pub const HEADER_LEN: usize = 5;

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Chunk = 0x01,
    Progress = 0x02,
}

impl MessageType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Chunk),
            0x02 => Some(Self::Progress),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChunkFlags: u8 {
        /// File name and total size follow the flags byte
        const METADATA = 1 << 0;
    }
}

// =============================================================================
// CHUNK (0x01)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    pub metadata: Option<TransferMetadata>,
    pub offset: u64,
    pub data: Bytes,
}

impl From<OutboundMessage> for ChunkFrame {
    fn from(msg: OutboundMessage) -> Self {
        Self {
            metadata: msg.metadata,
            offset: msg.chunk.offset,
            data: msg.chunk.data,
        }
    }
}

impl ChunkFrame {
    pub fn flags(&self) -> ChunkFlags {
        if self.metadata.is_some() {
            ChunkFlags::METADATA
        } else {
            ChunkFlags::empty()
        }
    }

    pub fn encode(&self) -> TransferResult<Bytes> {
        let name = self.metadata.as_ref().map(|m| m.file_name.as_bytes());
        if let Some(name) = name {
            if name.len() > u16::MAX as usize {
                return Err(TransferError::Protocol(format!(
                    "file name too long: {} bytes",
                    name.len()
                )));
            }
        }

        let mut payload_len = 1 + 8 + self.data.len();
        if let Some(name) = name {
            payload_len += 2 + name.len() + 8;
        }
        if payload_len > MAX_FRAME_SIZE as usize {
            return Err(TransferError::Protocol(format!(
                "chunk frame of {payload_len} bytes exceeds {MAX_FRAME_SIZE}"
            )));
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload_len);
        buf.put_u32(payload_len as u32);
        buf.put_u8(MessageType::Chunk as u8);
        buf.put_u8(self.flags().bits());
        if let (Some(meta), Some(name)) = (&self.metadata, name) {
            buf.put_u16(name.len() as u16);
            buf.put_slice(name);
            buf.put_u64(meta.total_size_bytes);
        }
        buf.put_u64(self.offset);
        buf.put_slice(&self.data);

        Ok(buf.freeze())
    }

    pub fn decode(mut payload: Bytes) -> TransferResult<Self> {
        if payload.remaining() < 1 {
            return Err(TransferError::Protocol("Chunk payload empty".into()));
        }
        let flags = ChunkFlags::from_bits_truncate(payload.get_u8());

        let metadata = if flags.contains(ChunkFlags::METADATA) {
            if payload.remaining() < 2 {
                return Err(TransferError::Protocol("Chunk name length truncated".into()));
            }
            let name_len = payload.get_u16() as usize;
            if payload.remaining() < name_len + 8 {
                return Err(TransferError::Protocol("Chunk metadata truncated".into()));
            }
            let file_name = String::from_utf8(payload.copy_to_bytes(name_len).to_vec())
                .map_err(|_| TransferError::Protocol("Invalid UTF-8 in file name".into()))?;
            let total_size_bytes = payload.get_u64();
            Some(TransferMetadata {
                file_name,
                total_size_bytes,
            })
        } else {
            None
        };

        if payload.remaining() < 8 {
            return Err(TransferError::Protocol("Chunk offset truncated".into()));
        }
        let offset = payload.get_u64();

        Ok(Self {
            metadata,
            offset,
            data: payload,
        })
    }
}

// =============================================================================
// PROGRESS (0x02)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressFrame {
    pub percent_complete: f64,
}

impl ProgressFrame {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 8);
        buf.put_u32(8);
        buf.put_u8(MessageType::Progress as u8);
        buf.put_f64(self.percent_complete);
        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> TransferResult<Self> {
        if payload.remaining() < 8 {
            return Err(TransferError::Protocol("Progress payload too short".into()));
        }
        Ok(Self {
            percent_complete: payload.get_f64(),
        })
    }
}

// =============================================================================
// Frame I/O
// =============================================================================

/// Read a single frame from the stream.
///
/// Returns `None` on a clean EOF before the first header byte. EOF anywhere
/// inside a frame is a protocol error.
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
) -> TransferResult<Option<(MessageType, Bytes)>> {
    let mut header = [0u8; HEADER_LEN];
    let first = r.read(&mut header).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < HEADER_LEN {
        r.read_exact(&mut header[first..])
            .await
            .map_err(|e| truncated(e, "frame header"))?;
    }

    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);

    // Validate frame size before allocation
    if len > MAX_FRAME_SIZE {
        return Err(TransferError::Protocol(format!(
            "Frame size {len} exceeds maximum allowed size {MAX_FRAME_SIZE}"
        )));
    }

    let msg_type = MessageType::from_u8(header[4]).ok_or_else(|| {
        TransferError::Protocol(format!("Unknown message type 0x{:02x}", header[4]))
    })?;

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)
        .await
        .map_err(|e| truncated(e, "frame payload"))?;

    Ok(Some((msg_type, Bytes::from(payload))))
}

/// Write a pre-encoded frame to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Bytes) -> std::io::Result<()> {
    w.write_all(frame).await
}

fn truncated(err: std::io::Error, what: &str) -> TransferError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TransferError::Protocol(format!("stream ended inside {what}"))
    } else {
        TransferError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_of(frame: &Bytes) -> Bytes {
        frame.slice(HEADER_LEN..)
    }

    #[test]
    fn test_chunk_with_metadata() {
        let frame = ChunkFrame {
            metadata: Some(TransferMetadata {
                file_name: "random_data.bin".into(),
                total_size_bytes: 10_000,
            }),
            offset: 4096,
            data: Bytes::from_static(b"payload"),
        };
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded[4], MessageType::Chunk as u8);

        let decoded = ChunkFrame::decode(payload_of(&encoded)).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.flags().contains(ChunkFlags::METADATA));
    }

    #[test]
    fn test_chunk_without_metadata_is_smaller() {
        let with = ChunkFrame {
            metadata: Some(TransferMetadata {
                file_name: "a.bin".into(),
                total_size_bytes: 3,
            }),
            offset: 0,
            data: Bytes::from_static(b"abc"),
        };
        let without = ChunkFrame {
            metadata: None,
            ..with.clone()
        };

        let a = with.encode().unwrap();
        let b = without.encode().unwrap();
        assert_eq!(a.len() - b.len(), 2 + 5 + 8);

        let decoded = ChunkFrame::decode(payload_of(&b)).unwrap();
        assert!(decoded.metadata.is_none());
        assert_eq!(decoded.data.as_ref(), b"abc");
    }

    #[test]
    fn test_chunk_truncated_metadata_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(ChunkFlags::METADATA.bits());
        buf.put_u16(10);
        buf.put_slice(b"abc");
        let result = ChunkFrame::decode(buf.freeze());
        assert!(matches!(result, Err(TransferError::Protocol(_))));
    }

    #[test]
    fn test_progress_short_payload_rejected() {
        let result = ProgressFrame::decode(Bytes::from_static(&[0, 1, 2]));
        assert!(matches!(result, Err(TransferError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_read_frame_sequence_then_clean_eof() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&ProgressFrame { percent_complete: 40.96 }.encode());
        wire.extend_from_slice(&ProgressFrame { percent_complete: 81.92 }.encode());
        let mut reader = wire.as_slice();

        let (t, p) = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(t, MessageType::Progress);
        assert_eq!(ProgressFrame::decode(p).unwrap().percent_complete, 40.96);

        let (_, p) = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(ProgressFrame::decode(p).unwrap().percent_complete, 81.92);

        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_eof_inside_frame() {
        let encoded = ProgressFrame { percent_complete: 1.0 }.encode();
        let mut reader = &encoded[..HEADER_LEN + 3];
        let result = read_frame(&mut reader).await;
        assert!(matches!(result, Err(TransferError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized() {
        let mut wire = BytesMut::new();
        wire.put_u32(MAX_FRAME_SIZE + 1);
        wire.put_u8(MessageType::Chunk as u8);
        let mut reader = &wire[..];
        let result = read_frame(&mut reader).await;
        assert!(matches!(result, Err(TransferError::Protocol(m)) if m.contains("exceeds")));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_unknown_type() {
        let wire = [0u8, 0, 0, 0, 0x7F];
        let mut reader = &wire[..];
        let result = read_frame(&mut reader).await;
        assert!(matches!(result, Err(TransferError::Protocol(_))));
    }
}
