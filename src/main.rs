//! devtempo server binary.
//!
//! Initializes the database, sweeps sync jobs orphaned by a previous crash,
//! and serves the operational HTTP API until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use devtempo::db;
use devtempo::models::sync_job;
use devtempo::server::{self, AppState};
use devtempo::services::sync_lock::SyncLock;

/// Default listen port; override with DEVTEMPO_PORT.
const DEFAULT_PORT: u16 = 3100;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let data_dir = std::env::var("DEVTEMPO_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"));
    let port = std::env::var("DEVTEMPO_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let db_path = db::get_db_path(&data_dir);
    let pool = db::initialize(&db_path).await?;
    log::info!("[main] Database ready at {}", db_path.display());

    // A RUNNING job at boot can only be a leftover from a crash or kill;
    // fail it so the status surface tells the truth.
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let swept = sync_job::fail_orphaned_jobs(&pool, now).await?;
    if swept > 0 {
        log::warn!("[main] Failed {} orphaned sync job(s) from a previous run", swept);
    }

    let shutdown = CancellationToken::new();
    let state = AppState {
        pool,
        sync_lock: SyncLock::new(),
        shutdown: shutdown.clone(),
    };

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("[main] Shutdown requested");
            shutdown.cancel();
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    server::serve(state, addr).await?;

    Ok(())
}
