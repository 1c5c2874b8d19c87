// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Unix-socket session hub.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nudge_app_core::config::ConfigService;
use nudge_app_core::storage::Storage;
use nudge_app_core::MemoryStorage;
use nudge_session_service::{serve_connection, Hub, SessionHostPrefs, PREFS_KEY};
use nudge_store_fs::{default_data_dir, FsConfigStore, FsStorage};
use tokio::net::UnixListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Nudge session hub")]
struct Args {
    /// Unix socket to listen on (overrides the saved prefs)
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Directory for session records (overrides the saved prefs)
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Evict session actors idle for this long
    #[arg(long)]
    idle_timeout_ms: Option<u64>,
    /// Keep sessions in memory only
    #[arg(long)]
    memory: bool,
}

/// Saved prefs, with defaults persisted on first run. Never fatal.
fn load_prefs() -> SessionHostPrefs {
    let config = match FsConfigStore::new() {
        Ok(store) => ConfigService::new(store),
        Err(err) => {
            warn!(%err, "config dir unavailable; using default prefs");
            return SessionHostPrefs::default();
        }
    };
    config.load_or_init(PREFS_KEY).unwrap_or_else(|err| {
        warn!(%err, "unreadable session_host prefs; using defaults");
        SessionHostPrefs::default()
    })
}

fn open_storage(args: &Args, prefs: &SessionHostPrefs) -> Result<Arc<dyn Storage>> {
    if args.memory {
        info!("using in-memory session storage");
        return Ok(Arc::new(MemoryStorage::new()));
    }
    let dir = args
        .data_dir
        .clone()
        .or_else(|| prefs.data_dir.as_ref().map(PathBuf::from))
        .or_else(default_data_dir)
        .context("no data directory available; pass --data-dir or --memory")?;
    let storage = FsStorage::open(&dir)
        .with_context(|| format!("open session storage at {}", dir.display()))?;
    info!(dir = %dir.display(), "session storage ready");
    Ok(Arc::new(storage))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let prefs = load_prefs();
    let storage = open_storage(&args, &prefs)?;
    let mut config = prefs.hub_config();
    if let Some(ms) = args.idle_timeout_ms {
        config.idle_timeout = Duration::from_millis(ms);
    }
    let hub = Hub::new(storage, config);

    let socket_path = args.socket.clone().unwrap_or_else(|| prefs.socket_path());
    // Remove stale socket if present
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("bind {}", socket_path.display()))?;
    info!(socket = %socket_path.display(), "session hub listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let hub = hub.clone();
                let capacity = prefs.outbox_capacity;
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(hub, stream, capacity).await {
                        warn!(?err, "client handler error");
                    }
                });
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("install ctrl-c handler")?;
                info!("shutting down");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}
