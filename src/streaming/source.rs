//! Chunk source for the transfer pipeline.
//!
//! Reads a file front to back and yields chunks of at most
//! [`MAX_CHUNK_SIZE`] bytes. The sequence is lazy and cannot be restarted:
//! once end-of-file or a read error is reached the file handle is released
//! and every later call yields `None`.

use crate::error::{TransferError, TransferResult};
use crate::streaming::channel::{Chunk, MAX_CHUNK_SIZE};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Sequential chunk reader over a single file
pub struct ChunkSource {
    path: PathBuf,
    file: Option<File>,
    chunk_size: usize,
    offset: u64,
    chunks: u64,
}

impl ChunkSource {
    /// Open `path` for chunked reading.
    pub async fn open(path: impl AsRef<Path>) -> TransferResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .map_err(|e| TransferError::from_open(path, e))?;

        debug!(path = %path.display(), "chunk source opened");

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            chunk_size: MAX_CHUNK_SIZE,
            offset: 0,
            chunks: 0,
        })
    }

    /// Use a smaller chunk size. Values are clamped to `1..=MAX_CHUNK_SIZE`.
    #[cfg(test)]
    pub(crate) fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Read the next chunk. Returns `None` at end-of-file.
    ///
    /// Each chunk is filled completely unless end-of-file comes first, so a
    /// file of `S` bytes yields exactly `ceil(S / chunk_size)` chunks.
    pub async fn next_chunk(&mut self) -> TransferResult<Option<Chunk>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;

        while filled < buf.len() {
            match file.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.release();
                    return Err(TransferError::Io(e));
                }
            }
        }

        if filled == 0 {
            debug!(
                path = %self.path.display(),
                chunks = self.chunks,
                bytes = self.offset,
                "end of file"
            );
            self.release();
            return Ok(None);
        }

        buf.truncate(filled);
        let chunk = Chunk {
            offset: self.offset,
            data: Bytes::from(buf),
        };
        trace!(offset = chunk.offset, len = chunk.len(), "chunk read");

        self.offset += filled as u64;
        self.chunks += 1;
        Ok(Some(chunk))
    }

    /// Like [`next_chunk`](Self::next_chunk), but gives up when `cancel` fires.
    pub async fn next_chunk_or_cancel(
        &mut self,
        cancel: &CancellationToken,
    ) -> TransferResult<Option<Chunk>> {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = self.next_chunk() => Some(r),
        };

        match read {
            Some(r) => r,
            None => {
                self.release();
                Err(TransferError::Cancelled)
            }
        }
    }

    /// Whether the file handle is still held.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Bytes emitted so far.
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Chunks emitted so far.
    pub fn chunks_read(&self) -> u64 {
        self.chunks
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the file handle. Later reads yield `None`.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), "chunk source closed");
        }
    }

    fn release(&mut self) {
        self.file = None;
    }
}
