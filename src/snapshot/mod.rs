//! Snapshot persistence (C10): dump the whole cache to one container file and
//! reload it on warm start.
//!
//! Simplified from the teacher's versioned-directory dumper: one file, one
//! format, no CRC32/gzip/version-rotation scheme. Atomicity comes from the
//! same temp-file-then-rename idiom. Each record is `{ key, value, expires_in }`
//! per the wire format; `value` holds the codec's already-encoded payload
//! bytes rather than a decoded "any", since the cache never knows `T` for a
//! stored key — round-tripping the encoded bytes is lossless regardless of
//! what `T` the original writer used. A `format_version` tag (not in the
//! minimal record schema) wraps the record array so an incompatible future
//! layout fails loudly instead of silently misreading an old snapshot.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::Cache;
use crate::clock;
use crate::config::PersistenceFormat;
use crate::model::Entry;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("persistence is not enabled in configuration")]
    NotEnabled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encode failed: {0}")]
    Encode(#[source] anyhow::Error),
    #[error("snapshot decode failed: {0}")]
    Decode(#[source] anyhow::Error),
    #[error("unsupported snapshot format_version {0}, expected {FORMAT_VERSION}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    key: String,
    value: Vec<u8>,
    expires_in: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Container {
    format_version: u32,
    records: Vec<Record>,
}

/// Writes every live entry in `cache` to its configured persistence path.
/// Entries already expired at save time are skipped; `expires_in` is
/// recorded relative to the save instant, not an absolute timestamp, so a
/// snapshot loaded later re-bases the deadline off the new process's clock.
pub async fn save(cache: &Arc<Cache>) -> Result<usize, SnapshotError> {
    let persistence = cache.config().persistence.clone();
    if !persistence.enabled {
        return Err(SnapshotError::NotEnabled);
    }

    let now = clock::now_millis();
    let mut records = Vec::new();
    for shard in cache.map().shards() {
        shard.walk(|key, entry: &Entry| {
            if entry.is_expired(now) {
                return;
            }
            records.push(Record {
                key: key.to_string(),
                value: entry.payload.to_vec(),
                expires_in: entry.expires_at.map(|at| (at - now).max(0)),
            });
        });
    }

    let count = records.len();
    let container = Container {
        format_version: FORMAT_VERSION,
        records,
    };

    let format = persistence.format;
    let path = PathBuf::from(&persistence.path);
    let bytes = tokio::task::spawn_blocking(move || encode_container(&container, format))
        .await
        .map_err(|e| SnapshotError::Encode(anyhow::anyhow!(e)))??;

    if persistence.safe_write {
        write_atomically(&path, &bytes).await?;
    } else {
        write_direct(&path, &bytes).await?;
    }

    info!(
        component = "snapshot",
        event = "save_complete",
        records = count,
        path = %path.display(),
        "wrote cache snapshot"
    );
    Ok(count)
}

/// Loads a snapshot into `cache`, restoring each record via the same
/// capacity rejection and `fill_to_fit` eviction a live `write` applies
/// (§4.10), so a warm-boot load can never push the cache past its
/// configured limits. Returns 0 without error when no snapshot file
/// exists yet.
pub async fn load(cache: &Arc<Cache>) -> Result<usize, SnapshotError> {
    let persistence = cache.config().persistence.clone();
    if !persistence.enabled {
        return Err(SnapshotError::NotEnabled);
    }

    let path = PathBuf::from(&persistence.path);
    if !path.exists() {
        info!(component = "snapshot", event = "no_snapshot_found", path = %path.display(), "no snapshot to load");
        return Ok(0);
    }

    let format = persistence.format;
    let path_clone = path.clone();
    let container = tokio::task::spawn_blocking(move || read_container(&path_clone, format))
        .await
        .map_err(|e| SnapshotError::Decode(anyhow::anyhow!(e)))??;

    if container.format_version != FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(container.format_version));
    }

    let now = clock::now_millis();
    let mut restored = 0usize;
    let mut skipped = 0usize;
    for record in container.records {
        let expires_at = record.expires_in.map(|delta| now + delta);
        if cache.restore_encoded(&record.key, record.value, now, expires_at) {
            restored += 1;
        } else {
            skipped += 1;
        }
    }

    info!(
        component = "snapshot",
        event = "load_complete",
        restored,
        skipped,
        path = %path.display(),
        "restored cache snapshot"
    );
    Ok(restored)
}

fn encode_container(container: &Container, format: PersistenceFormat) -> Result<Vec<u8>, SnapshotError> {
    match format {
        PersistenceFormat::Json => {
            serde_json::to_vec(container).map_err(|e| SnapshotError::Encode(e.into()))
        }
        PersistenceFormat::Binary => {
            bincode::serialize(container).map_err(|e| SnapshotError::Encode(e.into()))
        }
    }
}

fn decode_container(bytes: &[u8], format: PersistenceFormat) -> Result<Container, SnapshotError> {
    match format {
        PersistenceFormat::Json => {
            serde_json::from_slice(bytes).map_err(|e| SnapshotError::Decode(e.into()))
        }
        PersistenceFormat::Binary => {
            bincode::deserialize(bytes).map_err(|e| SnapshotError::Decode(e.into()))
        }
    }
}

fn read_container(path: &Path, format: PersistenceFormat) -> Result<Container, SnapshotError> {
    let mut file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    decode_container(&bytes, format)
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    let tmp_path_clone = tmp_path.clone();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp_path_clone)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    })
    .await
    .map_err(|e| SnapshotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

    match tokio::fs::rename(&tmp_path, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(component = "snapshot", event = "rename_failed", error = %e, "falling back after rename failure");
            Err(e.into())
        }
    }
}

/// Writes directly to the final path, no temp-file hop. Faster, but a crash
/// mid-write can leave a truncated snapshot on disk — opt-in via
/// `persistence.safe_write = false`.
async fn write_direct(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
