//! Optional IPC server (§6, external collaborator): line-delimited JSON
//! over a Unix-domain socket or TCP, one task per connection.
//!
//! Grounded on the accept-loop-then-dispatch shape of a RESP2 server: read
//! into a growable buffer, split on frame boundaries (here, newlines rather
//! than RESP2's length-prefixed arrays), dispatch each complete frame, write
//! the reply, keep the connection open for the next frame.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::{Cache, CacheError};
use crate::config::ServerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no transport available: unix sockets unsupported on this platform and force_tcp is false")]
    NoTransport,
}

#[derive(Debug, Deserialize)]
struct Request {
    cmd: String,
    key: Option<String>,
    value: Option<Value>,
    ttl: Option<u64>,
    namespace: Option<String>,
    limit: Option<usize>,
    fallback: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Response {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Response {
    fn ok(value: Value) -> Self {
        Self {
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    fn ok_empty() -> Self {
        Self {
            ok: true,
            value: None,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(message.into()),
        }
    }
}

/// Picks Unix or TCP per platform capability, honoring `force_tcp`, and
/// serves connections until `shutdown` is cancelled.
pub async fn serve(cache: Arc<Cache>, cfg: ServerConfig, shutdown: CancellationToken) -> Result<(), ServerError> {
    if cfg!(unix) && !cfg.force_tcp {
        serve_unix(cache, &cfg.unix_path, shutdown).await
    } else if !cfg.tcp_addr.is_empty() {
        serve_tcp(cache, &cfg.tcp_addr, shutdown).await
    } else {
        Err(ServerError::NoTransport)
    }
}

#[cfg(unix)]
async fn serve_unix(cache: Arc<Cache>, path: &str, shutdown: CancellationToken) -> Result<(), ServerError> {
    let _ = tokio::fs::remove_file(path).await;
    let listener = tokio::net::UnixListener::bind(path)?;
    info!(component = "ipc-server", event = "listening", transport = "unix", path, "server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let cache = Arc::clone(&cache);
                tokio::task::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    handle_connection(reader, writer, cache).await;
                });
            }
            _ = shutdown.cancelled() => break,
        }
    }

    let _ = tokio::fs::remove_file(path).await;
    info!(component = "ipc-server", event = "stopped", transport = "unix", "server stopped");
    Ok(())
}

#[cfg(not(unix))]
async fn serve_unix(_cache: Arc<Cache>, _path: &str, _shutdown: CancellationToken) -> Result<(), ServerError> {
    Err(ServerError::NoTransport)
}

async fn serve_tcp(cache: Arc<Cache>, addr: &str, shutdown: CancellationToken) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(component = "ipc-server", event = "listening", transport = "tcp", addr, "server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let cache = Arc::clone(&cache);
                tokio::task::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    handle_connection(reader, writer, cache).await;
                });
            }
            _ = shutdown.cancelled() => break,
        }
    }

    info!(component = "ipc-server", event = "stopped", transport = "tcp", "server stopped");
    Ok(())
}

async fn handle_connection<R, W>(reader: R, mut writer: W, cache: Arc<Cache>)
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(component = "ipc-server", event = "read_error", error = %e, "closing connection");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let (response, malformed) = match serde_json::from_str::<Request>(&line) {
            Ok(request) => (dispatch(&cache, request), false),
            Err(e) => (Response::err(format!("malformed request: {e}")), true),
        };

        let mut out = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(component = "ipc-server", event = "encode_error", error = %e, "failed to encode response");
                break;
            }
        };
        out.push(b'\n');

        if let Err(e) = writer.write_all(&out).await {
            warn!(component = "ipc-server", event = "write_error", error = %e, "closing connection");
            break;
        }

        // Malformed JSON closes the connection per §6.
        if malformed {
            break;
        }
    }
}

fn dispatch(cache: &Arc<Cache>, req: Request) -> Response {
    match req.cmd.as_str() {
        "read" => cmd_read(cache, req),
        "write" => cmd_write(cache, req),
        "delete" => cmd_delete(cache, req),
        "exists" => cmd_exists(cache, req),
        "inspect" => cmd_inspect(cache, req),
        "keys" => cmd_keys(cache, req),
        "clear_namespace" => cmd_clear_namespace(cache, req),
        "least_touched" => cmd_least_touched(cache, req),
        "all_keys" => cmd_all_keys(cache),
        "current_memory_bytes" => cmd_current_memory_bytes(cache),
        "max_memory_bytes" => cmd_max_memory_bytes(cache),
        "metrics" => cmd_metrics(cache),
        // `fetch` over the wire never invokes a caller-supplied closure; it
        // falls back to the client-provided `fallback` value when absent.
        "fetch" => cmd_fetch(cache, req),
        other => Response::err(format!("unknown command: {other}")),
    }
}

fn require_key(req: &Request) -> Result<&str, Response> {
    req.key.as_deref().ok_or_else(|| Response::err("missing required field: key"))
}

fn map_cache_err(e: CacheError) -> Response {
    Response::err(e.to_string())
}

fn cmd_read(cache: &Arc<Cache>, req: Request) -> Response {
    let key = match require_key(&req) {
        Ok(k) => k,
        Err(r) => return r,
    };
    match cache.read::<Value>(key, req.namespace.as_deref()) {
        Ok(Some(value)) => Response::ok(value),
        Ok(None) => Response::ok(Value::Null),
        Err(e) => map_cache_err(e),
    }
}

fn cmd_write(cache: &Arc<Cache>, req: Request) -> Response {
    let key = match require_key(&req) {
        Ok(k) => k,
        Err(r) => return r,
    };
    let value = match &req.value {
        Some(v) => v,
        None => return Response::err("missing required field: value"),
    };
    let ttl = req.ttl.map(std::time::Duration::from_secs);
    match cache.write(key, value, ttl, req.namespace.as_deref()) {
        Ok(()) => Response::ok_empty(),
        Err(e) => map_cache_err(e),
    }
}

fn cmd_delete(cache: &Arc<Cache>, req: Request) -> Response {
    let key = match require_key(&req) {
        Ok(k) => k,
        Err(r) => return r,
    };
    match cache.delete(key, req.namespace.as_deref()) {
        Ok(()) => Response::ok_empty(),
        Err(e) => map_cache_err(e),
    }
}

fn cmd_exists(cache: &Arc<Cache>, req: Request) -> Response {
    let key = match require_key(&req) {
        Ok(k) => k,
        Err(r) => return r,
    };
    match cache.exists(key, req.namespace.as_deref()) {
        Ok(exists) => Response::ok(Value::Bool(exists)),
        Err(e) => map_cache_err(e),
    }
}

fn cmd_inspect(cache: &Arc<Cache>, req: Request) -> Response {
    let key = match require_key(&req) {
        Ok(k) => k,
        Err(r) => return r,
    };
    match cache.inspect(key, req.namespace.as_deref()) {
        Ok(Some(meta)) => Response::ok(serde_json::json!({
            "key": meta.key,
            "shard_index": meta.shard_index,
            "expires_at": meta.expires_at,
            "created_at": meta.created_at,
            "size_bytes": meta.size_bytes,
            "compressed": meta.compressed,
        })),
        Ok(None) => Response::ok(Value::Null),
        Err(e) => map_cache_err(e),
    }
}

fn cmd_keys(cache: &Arc<Cache>, req: Request) -> Response {
    let namespace = match req.namespace.as_deref() {
        Some(ns) => ns,
        None => return Response::err("missing required field: namespace"),
    };
    match cache.keys(namespace) {
        Ok(keys) => Response::ok(Value::Array(keys.into_iter().map(Value::String).collect())),
        Err(e) => map_cache_err(e),
    }
}

fn cmd_clear_namespace(cache: &Arc<Cache>, req: Request) -> Response {
    let namespace = match req.namespace.as_deref() {
        Some(ns) => ns,
        None => return Response::err("missing required field: namespace"),
    };
    match cache.clear_namespace(namespace) {
        Ok(()) => Response::ok_empty(),
        Err(e) => map_cache_err(e),
    }
}

fn cmd_least_touched(cache: &Arc<Cache>, req: Request) -> Response {
    let limit = req.limit.unwrap_or(10);
    let ranked = cache.least_touched(limit);
    let value = Value::Array(
        ranked
            .into_iter()
            .map(|(key, touches)| serde_json::json!({"key": key, "touches": touches}))
            .collect(),
    );
    Response::ok(value)
}

fn cmd_all_keys(cache: &Arc<Cache>) -> Response {
    let keys = cache.all_keys();
    Response::ok(Value::Array(keys.into_iter().map(Value::String).collect()))
}

fn cmd_current_memory_bytes(cache: &Arc<Cache>) -> Response {
    Response::ok(Value::from(cache.metrics().total_memory))
}

fn cmd_max_memory_bytes(cache: &Arc<Cache>) -> Response {
    Response::ok(Value::from(cache.config().max_bytes))
}

fn cmd_metrics(cache: &Arc<Cache>) -> Response {
    let snapshot = cache.metrics();
    let shards: Vec<Value> = snapshot
        .shards
        .iter()
        .map(|s| serde_json::json!({
            "index": s.index,
            "len": s.len,
            "bytes": s.bytes,
            "lru_size": s.lru_size,
        }))
        .collect();
    let least_touched: Vec<Value> = snapshot
        .least_touched
        .iter()
        .map(|(key, touches)| serde_json::json!({"key": key, "touches": touches}))
        .collect();

    Response::ok(serde_json::json!({
        "hits": snapshot.global.hits,
        "misses": snapshot.global.misses,
        "evictions": snapshot.global.evictions,
        "rejected": snapshot.global.rejected,
        "total_memory": snapshot.total_memory,
        "shard_count": snapshot.shards.len(),
        "shards": shards,
        "least_touched": least_touched,
    }))
}

fn cmd_fetch(cache: &Arc<Cache>, req: Request) -> Response {
    let key = match require_key(&req) {
        Ok(k) => k,
        Err(r) => return r,
    };
    match cache.read::<Value>(key, req.namespace.as_deref()) {
        Ok(Some(value)) => Response::ok(value),
        Ok(None) => match req.fallback {
            Some(fallback) => {
                let ttl = req.ttl.map(std::time::Duration::from_secs);
                match cache.write(key, &fallback, ttl, req.namespace.as_deref()) {
                    Ok(()) => Response::ok(fallback),
                    Err(e) => map_cache_err(e),
                }
            }
            None => Response::err("cache miss and no fallback value provided"),
        },
        Err(e) => map_cache_err(e),
    }
}
