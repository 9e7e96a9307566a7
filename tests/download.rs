//! Download tests against a local HTTP server.

use snap_harness::bins::{Binary, BinarySet};
use snap_harness::download::{self, DownloadOptions, DownloadOutcome, Downloader};
use snap_harness::{HarnessConfig, HarnessError};
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves `#!/bin/sh` bodies for every path except those ending in `missing` (404)
/// or `stall` (promises 100 bytes, sends 10, then goes quiet).
struct BuildServer {
    base: String,
    requests: Arc<AtomicUsize>,
}

impl BuildServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("local addr"));
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);

                    let head = String::from_utf8_lossy(&request);
                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    if path.ends_with("stall") {
                        let head = "HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n#!/bin/sh\n";
                        let _ = socket.write_all(head.as_bytes()).await;
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        return;
                    }
                    let response = if path.ends_with("missing") {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_string()
                    } else {
                        let body = format!("#!/bin/sh\n# {path}\n");
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    };
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { base, requests }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_fetch_writes_executable() {
    let server = BuildServer::start().await;
    let dir = tempfile::tempdir().expect("temp dir");
    let binary = Binary::new(server.url("snap/latest/linux/x86_64/snapd"), dir.path())
        .expect("binary");

    let downloader = Downloader::new(DownloadOptions::default()).expect("downloader");
    let outcome = downloader.fetch(&binary).await.expect("fetch");

    let contents = std::fs::read_to_string(binary.path()).expect("downloaded file");
    assert_eq!(contents, "#!/bin/sh\n# /snap/latest/linux/x86_64/snapd\n");
    assert_eq!(outcome, DownloadOutcome::Fetched(contents.len() as u64));

    let mode = std::fs::metadata(binary.path())
        .expect("metadata")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
    assert!(!dir.path().join(".snapd.part").exists());
}

#[tokio::test]
async fn test_missing_binary_is_reported() {
    let server = BuildServer::start().await;
    let dir = tempfile::tempdir().expect("temp dir");
    let binary = Binary::new(server.url("plugins/missing"), dir.path()).expect("binary");

    let downloader = Downloader::new(DownloadOptions::default()).expect("downloader");
    let result = downloader.fetch(&binary).await;

    assert!(
        matches!(result, Err(HarnessError::DownloadStatus { status: 404, .. })),
        "unexpected result: {result:?}"
    );
    assert!(!binary.path().exists());
}

#[tokio::test]
async fn test_stalled_body_times_out() {
    let server = BuildServer::start().await;
    let dir = tempfile::tempdir().expect("temp dir");
    let binary = Binary::new(server.url("snap/stall"), dir.path()).expect("binary");

    let downloader = Downloader::new(DownloadOptions {
        read_timeout: Duration::from_millis(300),
        ..Default::default()
    })
    .expect("downloader");
    let result = tokio::time::timeout(Duration::from_secs(10), downloader.fetch(&binary))
        .await
        .expect("fetch must give up on a stalled body");

    assert!(
        matches!(result, Err(HarnessError::DownloadStalled { .. })),
        "unexpected result: {result:?}"
    );
    assert!(!binary.path().exists());
    assert!(!dir.path().join(".stall.part").exists());
}

#[tokio::test]
async fn test_force_fetches_again() {
    let server = BuildServer::start().await;
    let dir = tempfile::tempdir().expect("temp dir");
    let binary = Binary::new(server.url("snap/snapctl"), dir.path()).expect("binary");
    std::fs::write(binary.path(), "stale").expect("write stale binary");

    let cached = Downloader::new(DownloadOptions::default()).expect("downloader");
    assert_eq!(
        cached.fetch(&binary).await.expect("fetch"),
        DownloadOutcome::Cached
    );
    assert_eq!(server.requests(), 0);

    let forced = Downloader::new(DownloadOptions {
        force: true,
        ..Default::default()
    })
    .expect("downloader");
    assert!(matches!(
        forced.fetch(&binary).await.expect("fetch"),
        DownloadOutcome::Fetched(_)
    ));
    assert_eq!(server.requests(), 1);
    assert_ne!(
        std::fs::read_to_string(binary.path()).expect("downloaded file"),
        "stale"
    );
}

#[tokio::test]
async fn test_download_binaries_fetches_the_whole_set() {
    let server = BuildServer::start().await;
    let root = tempfile::tempdir().expect("temp dir");

    let mut config = HarnessConfig::default();
    config.snap_dir = root.path().join("snap");
    config.plugins_dir = root.path().join("plugins");
    config.sources.snapd_url = server.url("snap/snapd");
    config.sources.snapctl_url = server.url("snap/snapctl");
    config.sources.collector_url = server.url("plugins/snap-plugin-collector-meminfo");
    config.sources.publisher_url = server.url("plugins/snap-plugin-publisher-mock-file");
    let set = BinarySet::from_config(&config).expect("binary set");

    let outcomes = download::download_binaries(&set, DownloadOptions::default())
        .await
        .expect("download");
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes
        .iter()
        .all(|(_, outcome)| matches!(outcome, DownloadOutcome::Fetched(_))));
    assert!(root.path().join("snap/snapd").is_file());
    assert!(root
        .path()
        .join("plugins/snap-plugin-publisher-mock-file")
        .is_file());

    // a second pass finds everything in place
    let again = download::download_binaries(&set, DownloadOptions::default())
        .await
        .expect("download");
    assert!(again
        .iter()
        .all(|(_, outcome)| *outcome == DownloadOutcome::Cached));
    assert_eq!(server.requests(), 4);
}
