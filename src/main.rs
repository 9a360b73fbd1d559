use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

use classpoll_store::Database;
use classpoll_telemetry::{init_telemetry, TelemetryConfig};

/// Live classroom polling server.
#[derive(Debug, Parser)]
#[command(name = "classpoll", version)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Path to the SQLite database file. Defaults to
    /// ~/.classpoll/classpoll.db.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_telemetry(TelemetryConfig {
        log_level: Level::INFO,
        module_levels: Vec::new(),
        json_output: args.log_json,
    });

    tracing::info!("starting classpoll server");

    let db_path = args.db.unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create database directory");
    }
    let db = Database::open(&db_path).expect("failed to open database");
    tracing::info!(path = %db_path.display(), "database opened");

    let config = classpoll_server::ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let handle = classpoll_server::start(config, db)
        .await
        .expect("failed to start server");

    tracing::info!(port = handle.port, "classpoll server ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
}

fn default_db_path() -> PathBuf {
    dirs_home().join(".classpoll").join("classpoll.db")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
