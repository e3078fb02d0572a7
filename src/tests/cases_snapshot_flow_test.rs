//! Save/restart/load across two independent `Cache` instances sharing a
//! persistence path, driven through the IPC server rather than the direct
//! `Cache` API, mirroring a real warm-restart of `mudis-server`.

use serde_json::json;

use crate::cache::Cache;
use crate::config::{Config, PersistenceFormat, RawConfig};
use crate::snapshot;
use crate::tests::support::harness::TestServer;

fn persisted_config(dir: &std::path::Path, format: PersistenceFormat) -> Config {
    let mut raw = RawConfig::default();
    raw.shard_count = 2;
    raw.server.enabled = true;
    raw.server.unix_path = dir.join("server.sock").to_string_lossy().to_string();
    raw.persistence.enabled = true;
    raw.persistence.path = dir.join("snapshot.bin").to_string_lossy().to_string();
    raw.persistence.format = format;
    Config::build(raw).expect("valid persisted server config")
}

#[tokio::test]
async fn writes_made_over_the_wire_survive_a_save_and_reload() {
    let dir = std::env::temp_dir().join(format!(
        "mudis-snapshot-flow-{}-{}",
        std::process::id(),
        line!()
    ));
    let cfg = persisted_config(&dir, PersistenceFormat::Binary);

    let server = TestServer::start_with_config(cfg.clone()).await;
    server
        .send(&json!({"cmd": "write", "key": "a", "value": "alpha", "namespace": "ns"}))
        .await;
    server
        .send(&json!({"cmd": "write", "key": "b", "value": 42, "ttl": 3600}))
        .await;

    let saved = snapshot::save(server.cache()).await.unwrap();
    assert_eq!(saved, 2);
    server.stop().await;

    let fresh = Cache::new(cfg);
    let restored = snapshot::load(&fresh).await.unwrap();
    assert_eq!(restored, 2);
    assert_eq!(fresh.read::<String>("a", Some("ns")).unwrap(), Some("alpha".to_string()));
    assert_eq!(fresh.read::<i64>("b", None).unwrap(), Some(42));

    let _ = std::fs::remove_dir_all(&dir);
}
