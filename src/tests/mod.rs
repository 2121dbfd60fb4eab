use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mail_auth::{
    trust_dns_resolver::config::{ResolverConfig, ResolverOpts},
    Resolver,
};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::{
    CohortConfig, EngineConfig, ModelConfig, ResultsBackend, ResultsConfig, TrackingConfig,
};
use crate::core::Core;
use crate::store::ResultStore;
use crate::tracking::EndpointCache;

pub mod classify;

impl Core {
    pub fn test() -> Self {
        Core {
            config: EngineConfig::test(),
            resolver: test_resolver(),
            store: ResultStore::Memory(Default::default()),
            endpoints: Mutex::new(EndpointCache::new(
                128,
                Duration::from_secs(60),
                Duration::from_secs(60),
            )),
        }
    }
}

impl EngineConfig {
    pub fn test() -> Self {
        EngineConfig {
            model: ModelConfig {
                weekly_shape: [1.0; 7],
                ..Default::default()
            },
            cohort: CohortConfig::default(),
            concurrency: 2,
            drain_timeout: Duration::from_secs(2),
            hostname: "sink.test.local".to_string(),
            smtp_port: 25,
            smtp_timeout: Duration::from_secs(2),
            http_timeout: Duration::from_secs(2),
            tracking: TrackingConfig {
                domains: Default::default(),
                user_agents: vec![crate::USER_AGENT.to_string()],
                cache_ttl: Duration::from_secs(60),
                cache_ttl_neg: Duration::from_secs(60),
            },
            archive_path: None,
            results: ResultsConfig {
                backend: ResultsBackend::Memory,
                url: String::new(),
                namespace: "mail-sink:test".to_string(),
                retention: Duration::from_secs(86400),
            },
        }
    }
}

// Offline resolver: lookups are satisfied from records injected with
// mx_add / ipv4_add, nothing ever goes out to the network in tests.
pub fn test_resolver() -> Resolver {
    Resolver::with_capacities(
        ResolverConfig::cloudflare(),
        ResolverOpts::default(),
        128,
        128,
        128,
        128,
        128,
    )
    .unwrap()
}

pub struct TempDir {
    pub temp_dir: PathBuf,
    pub delete: bool,
}

pub fn make_temp_dir(name: &str, delete: bool) -> TempDir {
    let mut temp_dir = std::env::temp_dir();
    temp_dir.push(name);
    if !temp_dir.exists() {
        let _ = std::fs::create_dir(&temp_dir);
    } else if delete {
        let _ = std::fs::remove_dir_all(&temp_dir);
        let _ = std::fs::create_dir(&temp_dir);
    }
    TempDir { temp_dir, delete }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        if self.delete {
            let _ = std::fs::remove_dir_all(&self.temp_dir);
        }
    }
}

// Minimal SMTP server: accepts one envelope per connection and forwards
// the full session transcript (commands and DATA payload) to the test.
pub async fn start_mock_smtp() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                let mut transcript = String::new();
                let _ = write_half.write_all(b"220 mock.test ESMTP\r\n").await;

                let mut line = String::new();
                let mut in_data = false;
                loop {
                    line.clear();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        break;
                    }
                    transcript.push_str(&line);
                    let command = line.trim_end();
                    if in_data {
                        if command == "." {
                            in_data = false;
                            let _ = write_half.write_all(b"250 2.0.0 Ok: queued\r\n").await;
                        }
                    } else if command.starts_with("EHLO") || command.starts_with("HELO") {
                        let _ = write_half
                            .write_all(b"250-mock.test greets you\r\n250 SIZE 10485760\r\n")
                            .await;
                    } else if command.starts_with("DATA") {
                        in_data = true;
                        let _ = write_half
                            .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                            .await;
                    } else if command.starts_with("QUIT") {
                        let _ = write_half.write_all(b"221 2.0.0 Bye\r\n").await;
                        break;
                    } else {
                        let _ = write_half.write_all(b"250 2.1.0 Ok\r\n").await;
                    }
                }
                let _ = tx.send(transcript);
            });
        }
    });

    (addr, rx)
}

pub struct MockTrackingServer {
    pub addr: SocketAddr,
    pub options_count: Arc<AtomicUsize>,
    pub get_count: Arc<AtomicUsize>,
}

// Minimal HTTP endpoint that mimics the platform's tracking behavior:
// OPTIONS is rejected with 405 while the server identifies itself in the
// Server header, GET answers with a redirect that must not be followed.
pub async fn start_mock_tracking(server_header: &'static str) -> MockTrackingServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let options_count = Arc::new(AtomicUsize::new(0));
    let get_count = Arc::new(AtomicUsize::new(0));

    let options_counter = options_count.clone();
    let get_counter = get_count.clone();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let options_counter = options_counter.clone();
            let get_counter = get_counter.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == &b"\r\n\r\n"[..]) {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&request);
                let response = if request.starts_with("OPTIONS") {
                    options_counter.fetch_add(1, Ordering::SeqCst);
                    format!(
                        "HTTP/1.1 405 Method Not Allowed\r\nServer: {server_header}\r\n\
                         Content-Length: 0\r\nConnection: close\r\n\r\n"
                    )
                } else {
                    get_counter.fetch_add(1, Ordering::SeqCst);
                    "HTTP/1.1 302 Found\r\nLocation: http://dest.test/\r\n\
                     Content-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_string()
                };
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });

    MockTrackingServer {
        addr,
        options_count,
        get_count,
    }
}
