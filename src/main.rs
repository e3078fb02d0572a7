// Entrypoint for the mudis-server binary, hosting the optional IPC server
// (§6) over the mudis cache engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mudis::cache::Cache;
use mudis::config::Config;
use mudis::shutdown::GracefulShutdown;
use mudis::{clock, server, snapshot};

const CONFIG_PATH: &str = "cfg/mudis.cfg.yaml";
const CONFIG_PATH_LOCAL: &str = "cfg/mudis.cfg.local.yaml";

/// mudis - a sharded, in-process key/value cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Custom config file path
    #[arg(short, long, value_name = "FILE")]
    cfg: Option<PathBuf>,
}

/// Loads the configuration struct from YAML file.
/// Tries local config first, then falls back to default config.
fn load_cfg(path: Option<PathBuf>) -> Result<Config> {
    if let Some(custom_path) = path {
        let cfg = Config::load(&custom_path)
            .with_context(|| format!("failed to load custom config from {:?}", custom_path))?;
        info!(component = "config", event = "load_success", path = ?custom_path, "config loaded");
        return Ok(cfg);
    }

    match Config::load(PathBuf::from(CONFIG_PATH_LOCAL)) {
        Ok(cfg) => {
            info!(component = "config", event = "load_success", path = CONFIG_PATH_LOCAL, "config loaded");
            Ok(cfg)
        }
        Err(_) => {
            let cfg = Config::load(PathBuf::from(CONFIG_PATH))
                .with_context(|| format!("failed to load config from {}", CONFIG_PATH))?;
            info!(component = "config", event = "load_success", path = CONFIG_PATH, "config loaded");
            Ok(cfg)
        }
    }
}

/// Configures structured logging based on configuration.
fn configure_logger(cfg: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let log_level = cfg.log_level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if cfg.is_prod() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tokio::runtime::Runtime::new()
        .context("failed to create tokio runtime")?
        .block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    let _clock_token = clock::start(Duration::from_millis(1));

    let cfg = load_cfg(args.cfg)?;
    configure_logger(&cfg);

    info!(
        component = "main",
        event = "num_cpus_configured",
        num_cpus = num_cpus::get(),
        "available cores detected"
    );

    let cache = Cache::new(cfg.clone());

    if cfg.persistence.enabled {
        match snapshot::load(&cache).await {
            Ok(restored) => info!(component = "main", event = "snapshot_loaded", restored, "warm start complete"),
            Err(e) => warn!(component = "main", event = "snapshot_load_failed", error = %e, "starting cold"),
        }
    }

    let graceful_shutdown = GracefulShutdown::new(shutdown_token.clone());
    graceful_shutdown.set_graceful_timeout(Duration::from_secs(30)).await;

    if cfg.server.enabled {
        graceful_shutdown.add(1);
        let server_cache = Arc::clone(&cache);
        let server_cfg = (*cfg.server).clone();
        let server_shutdown = shutdown_token.clone();
        let graceful_done = graceful_shutdown.clone();
        tokio::task::spawn(async move {
            if let Err(e) = server::serve(server_cache, server_cfg, server_shutdown).await {
                error!(component = "main", scope = "ipc-server", event = "serve_failed", error = %e, "ipc server stopped with an error");
            }
            graceful_done.done();
        });
    }

    if let Err(e) = graceful_shutdown.await_shutdown().await {
        error!(component = "main", scope = "service", event = "graceful_shutdown_failed", error = %e, "failed to gracefully shut down service");
        if cfg.persistence.enabled {
            if let Err(e) = snapshot::save(&cache).await {
                warn!(component = "main", event = "snapshot_save_failed", error = %e, "failed to persist cache on shutdown");
            }
        }
        return Err(e);
    }

    if cfg.persistence.enabled {
        match snapshot::save(&cache).await {
            Ok(saved) => info!(component = "main", event = "snapshot_saved", saved, "persisted cache on shutdown"),
            Err(e) => warn!(component = "main", event = "snapshot_save_failed", error = %e, "failed to persist cache on shutdown"),
        }
    }

    Ok(())
}
