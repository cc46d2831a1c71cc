mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tether_core::ids::DeviceId;
use tether_engine::EngineConfig;
use tether_server::ServerConfig;
use tether_store::{Database, SqliteStateStorage};
use tether_telemetry::TelemetryConfig;

use crate::demo::Demo;

#[derive(Parser, Debug)]
#[command(name = "tether", about = "Server-rendered counter and todo list demo")]
struct Cli {
    /// Port to listen on (0 picks a free one).
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Seconds a detached session keeps its state.
    #[arg(long, default_value = "300")]
    idle_timeout_secs: u64,

    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// SQLite file for warn+ error reports. Reports are not persisted if unset.
    #[arg(long)]
    log_db: Option<PathBuf>,

    /// SQLite file for session snapshots.
    #[arg(long)]
    snapshot_db: Option<PathBuf>,

    /// Human-readable logs instead of JSON lines.
    #[arg(long)]
    text_logs: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _telemetry = tether_telemetry::init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: !cli.text_logs,
        report_to_sqlite: cli.log_db.is_some(),
        report_db_path: cli.log_db.clone().unwrap_or_default(),
        ..Default::default()
    });

    let snapshot_path = cli
        .snapshot_db
        .unwrap_or_else(|| home_dir().join(".tether").join("snapshots.db"));
    if let Some(parent) = snapshot_path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create snapshot directory");
    }
    let db = Database::open(&snapshot_path).expect("Failed to open snapshot database");
    tracing::info!(path = %snapshot_path.display(), "Snapshot database opened");

    let storage = Arc::new(SqliteStateStorage::new(db, |_: &DeviceId| Demo::default()));
    let engine = EngineConfig {
        idle_timeout: Duration::from_secs(cli.idle_timeout_secs),
        ..Default::default()
    };
    let config = ServerConfig {
        port: cli.port,
        title: "tether demo".into(),
        ..Default::default()
    };

    let handle = tether_server::start(config, engine, demo::app(storage))
        .await
        .expect("Failed to start server");
    tracing::info!(port = handle.port, "Tether demo ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
    handle.shutdown();
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
