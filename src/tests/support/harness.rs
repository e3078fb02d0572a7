use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::config::{Config, RawConfig};

/// A running `Cache` plus its IPC server, bound to a unique Unix socket per
/// instance so tests can run concurrently without colliding.
pub struct TestServer {
    cache: Arc<Cache>,
    socket_path: std::path::PathBuf,
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl TestServer {
    /// Builds a single-shard `Config` with the server enabled on a fresh
    /// socket path and starts it.
    pub async fn start() -> Self {
        let mut raw = RawConfig::default();
        raw.shard_count = 4;
        raw.server.enabled = true;
        raw.server.unix_path = std::env::temp_dir()
            .join(format!("mudis-test-{}-{}.sock", std::process::id(), unique_suffix()))
            .to_string_lossy()
            .to_string();
        let cfg = Config::build(raw).expect("valid test server config");
        Self::start_with_config(cfg).await
    }

    pub async fn start_with_config(cfg: Config) -> Self {
        let cache = Cache::new(cfg.clone());
        let socket_path = std::path::PathBuf::from(&cfg.server.unix_path);
        let shutdown = CancellationToken::new();

        let serve_cache = Arc::clone(&cache);
        let serve_cfg = (*cfg.server).clone();
        let serve_shutdown = shutdown.clone();
        let join = tokio::task::spawn(async move {
            let _ = crate::server::serve(serve_cache, serve_cfg, serve_shutdown).await;
        });

        for _ in 0..100 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Self { cache, socket_path, shutdown, join }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Sends one JSON request line over a fresh connection and returns the
    /// parsed JSON response.
    pub async fn send(&self, request: &Value) -> Value {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to test ipc server");
        let (reader, mut writer) = stream.into_split();
        let mut line = serde_json::to_vec(request).unwrap();
        line.push(b'\n');
        writer.write_all(&line).await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        let response = lines
            .next_line()
            .await
            .unwrap()
            .expect("ipc server closed connection without a response");
        serde_json::from_str(&response).unwrap()
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.join.await;
    }
}

fn unique_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
