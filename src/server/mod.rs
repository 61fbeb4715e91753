//! Reference peer - runs when invoked as `bdtransfer serve`
//!
//! Receives one file per connection, writes it to a temp file in the
//! destination directory and acknowledges every chunk with the cumulative
//! percentage. When the client half-closes, the temp file is persisted under
//! the announced name and the peer closes its own direction.

use crate::error::{TransferError, TransferResult};
use crate::streaming::protocol::{read_frame, write_frame, ChunkFrame, MessageType, ProgressFrame};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A file fully received and persisted
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub chunks: u64,
}

struct Incoming {
    name: String,
    total: u64,
    temp: NamedTempFile,
    file: File,
    received: u64,
    chunks: u64,
}

/// Accept connections until `cancel` fires; with `once`, stop after the first.
pub async fn serve(
    listener: TcpListener,
    dest_dir: PathBuf,
    once: bool,
    cancel: CancellationToken,
) -> TransferResult<()> {
    if !dest_dir.exists() {
        tokio::fs::create_dir_all(&dest_dir).await?;
    }
    info!(addr = ?listener.local_addr().ok(), dest = %dest_dir.display(), "peer listening");

    loop {
        let (stream, remote) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        debug!(%remote, "connection accepted");

        let (reader, writer) = stream.into_split();
        if once {
            let received = serve_connection(reader, writer, &dest_dir).await?;
            log_received(&remote.to_string(), received.as_ref());
            return Ok(());
        }

        let dest = dest_dir.clone();
        tokio::spawn(async move {
            match serve_connection(reader, writer, &dest).await {
                Ok(received) => log_received(&remote.to_string(), received.as_ref()),
                Err(e) => error!(%remote, error = %e, "transfer from client failed"),
            }
        });
    }
}

fn log_received(remote: &str, received: Option<&ReceivedFile>) {
    match received {
        Some(f) => info!(
            remote,
            path = %f.path.display(),
            bytes = f.bytes,
            chunks = f.chunks,
            "file received"
        ),
        None => info!(remote, "client closed without sending data"),
    }
}

/// Run the peer side of one session over a read half and a write half.
///
/// Returns `None` when the client half-closed without sending any chunk.
pub async fn serve_connection<R, W>(
    mut reader: R,
    mut writer: W,
    dest_dir: &Path,
) -> TransferResult<Option<ReceivedFile>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut incoming: Option<Incoming> = None;
    let mut sent_final = false;

    while let Some((msg_type, payload)) = read_frame(&mut reader).await? {
        if msg_type != MessageType::Chunk {
            return Err(TransferError::Protocol(format!(
                "unexpected {msg_type:?} frame from client"
            )));
        }
        let frame = ChunkFrame::decode(payload)?;

        let state = match incoming.take() {
            Some(state) => state,
            None => {
                let meta = frame.metadata.as_ref().ok_or_else(|| {
                    TransferError::Protocol("first chunk carries no metadata".into())
                })?;
                begin(dest_dir, &meta.file_name, meta.total_size_bytes)?
            }
        };
        let state = incoming.insert(state);

        if frame.offset != state.received {
            return Err(TransferError::Protocol(format!(
                "chunk at offset {} but {} bytes received so far",
                frame.offset, state.received
            )));
        }

        state.file.write_all(&frame.data).await?;
        state.received += frame.data.len() as u64;
        state.chunks += 1;

        let percent = percent_of(state.received, state.total);
        write_frame(&mut writer, &ProgressFrame { percent_complete: percent }.encode()).await?;
        writer.flush().await?;
        sent_final = percent >= 100.0;
    }

    let received = match incoming {
        Some(state) => {
            let file = finish(dest_dir, state).await?;
            if !sent_final {
                write_frame(&mut writer, &ProgressFrame { percent_complete: 100.0 }.encode())
                    .await?;
            }
            Some(file)
        }
        None => None,
    };

    writer.shutdown().await?;
    Ok(received)
}

fn begin(dest_dir: &Path, announced: &str, total: u64) -> TransferResult<Incoming> {
    let name = sanitize_file_name(announced)?;
    let temp = tempfile::Builder::new()
        .prefix(".bdtransfer-")
        .tempfile_in(dest_dir)?;
    let file = File::from_std(temp.reopen()?);

    debug!(file = %name, total, "receiving file");
    Ok(Incoming {
        name,
        total,
        temp,
        file,
        received: 0,
        chunks: 0,
    })
}

async fn finish(dest_dir: &Path, mut state: Incoming) -> TransferResult<ReceivedFile> {
    state.file.flush().await?;
    state.file.sync_all().await?;
    drop(state.file);

    let target = dest_dir.join(&state.name);
    state
        .temp
        .persist(&target)
        .map_err(|e| TransferError::Io(e.error))?;

    Ok(ReceivedFile {
        path: target,
        bytes: state.received,
        chunks: state.chunks,
    })
}

fn percent_of(received: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        received as f64 / total as f64 * 100.0
    }
}

/// Reduce an announced name to a single safe path component.
fn sanitize_file_name(announced: &str) -> TransferResult<String> {
    let mut components = Path::new(announced).components();
    match (components.next_back(), announced.is_empty()) {
        (Some(Component::Normal(name)), false) => Ok(name.to_string_lossy().into_owned()),
        _ => Err(TransferError::Protocol(format!(
            "unusable file name: {announced:?}"
        ))),
    }
}
