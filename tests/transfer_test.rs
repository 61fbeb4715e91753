use bdtransfer::server::{self, serve_connection};
use bdtransfer::streaming::{
    Phase, ProgressSink, SessionConfig, SessionCoordinator, WriterSink, BAR_WIDTH,
};
use bdtransfer::transport::{self, FramedChannel};
use bdtransfer::TransferError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{duplex, split};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Captures everything the progress renderer writes
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn write_random_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();
    fs::write(&path, data).unwrap();
    path
}

/// Session over an in-memory byte pipe with the reference peer on the other end
async fn transfer_in_memory(
    path: &Path,
    dest: &Path,
    config: SessionConfig,
) -> (
    bdtransfer::TransferResult<bdtransfer::streaming::SessionReport>,
    Option<server::ReceivedFile>,
    String,
) {
    let (client, peer) = duplex(16 * 1024);
    let (client_r, client_w) = split(client);
    let (peer_r, peer_w) = split(peer);

    let dest = dest.to_path_buf();
    let peer_handle =
        tokio::spawn(async move { serve_connection(peer_r, peer_w, &dest).await.unwrap() });

    let captured = Captured::default();
    let sink: Box<dyn ProgressSink> = Box::new(WriterSink::new(captured.clone()));

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        SessionCoordinator::new(config).run(
            path,
            async { Ok(FramedChannel::new(client_r, client_w)) },
            sink,
        ),
    )
    .await
    .expect("session timed out");

    let received = peer_handle.await.unwrap();
    (report, received, captured.text())
}

#[tokio::test]
async fn test_transfer_10000_bytes_end_to_end() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let path = write_random_file(src.path(), "random_data.bin", 10_000);

    let (report, received, output) =
        transfer_in_memory(&path, dest.path(), SessionConfig::default()).await;
    let report = report.unwrap();
    let received = received.unwrap();

    assert_eq!(report.uplink.chunks_sent, 3);
    assert_eq!(report.uplink.bytes_sent, 10_000);
    assert_eq!(report.downlink.messages, 3);
    assert_eq!(report.downlink.last_percent, Some(100.0));

    assert_eq!(report.progress.reached, Phase::Active);
    assert_eq!(report.progress.state.filled(), BAR_WIDTH);
    assert_eq!(report.progress.state.percent, 100);
    assert_eq!(report.progress.state.cur, 10_000);

    assert_eq!(received.chunks, 3);
    assert_eq!(
        fs::read(dest.path().join("random_data.bin")).unwrap(),
        fs::read(&path).unwrap()
    );

    assert!(output.contains("]40% "));
    assert!(output.contains("]100% 10000/10000"));
    assert!(output.ends_with("transfer complete\n"));
}

#[tokio::test]
async fn test_metadata_once_end_to_end() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let path = write_random_file(src.path(), "once.bin", 3 * 4096 + 7);

    let (report, received, _) = transfer_in_memory(
        &path,
        dest.path(),
        SessionConfig {
            metadata_once: true,
        },
    )
    .await;

    assert_eq!(report.unwrap().uplink.chunks_sent, 4);
    assert_eq!(received.unwrap().bytes, 3 * 4096 + 7);
    assert_eq!(
        fs::read(dest.path().join("once.bin")).unwrap(),
        fs::read(&path).unwrap()
    );
}

#[tokio::test]
async fn test_empty_file_sends_nothing_and_stays_idle() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let path = write_random_file(src.path(), "empty.bin", 0);

    let (report, received, output) =
        transfer_in_memory(&path, dest.path(), SessionConfig::default()).await;
    let report = report.unwrap();

    assert_eq!(report.uplink.chunks_sent, 0);
    assert_eq!(report.downlink.messages, 0);
    assert_eq!(report.progress.reached, Phase::Idle);
    assert!(received.is_none());
    assert!(!dest.path().join("empty.bin").exists());
    assert!(output.contains("peer reported no progress"));
}

#[tokio::test]
async fn test_missing_file_fails_before_dialing() {
    let src = TempDir::new().unwrap();
    let result = SessionCoordinator::new(SessionConfig::default())
        .run(
            &src.path().join("nope.bin"),
            transport::connect_tcp("127.0.0.1:1"),
            Box::new(WriterSink::new(io::sink())),
        )
        .await;

    assert!(matches!(result, Err(TransferError::FileNotFound(_))));
}

#[tokio::test]
async fn test_transfer_over_tcp_loopback() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let path = write_random_file(src.path(), "tcp.bin", 64 * 1024 + 100);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let dest_dir = dest.path().to_path_buf();
    let server_handle = tokio::spawn(server::serve(
        listener,
        dest_dir,
        true,
        CancellationToken::new(),
    ));

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        SessionCoordinator::new(SessionConfig::default()).run(
            &path,
            transport::connect_tcp(&addr),
            Box::new(WriterSink::new(io::sink())),
        ),
    )
    .await
    .expect("session timed out")
    .unwrap();

    server_handle.await.unwrap().unwrap();

    assert_eq!(report.uplink.chunks_sent, 17);
    assert_eq!(report.progress.state.percent, 100);
    assert_eq!(
        fs::read(dest.path().join("tcp.bin")).unwrap(),
        fs::read(&path).unwrap()
    );
}

#[tokio::test]
async fn test_serve_stops_on_cancel() {
    let dest = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(server::serve(
        listener,
        dest.path().to_path_buf(),
        false,
        cancel.clone(),
    ));
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server must stop on cancel")
        .unwrap()
        .unwrap();
}
