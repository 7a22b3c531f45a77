mod api;
mod config;
mod db;
mod error;
mod scorer;
mod state;
mod sweeper;
mod types;
mod validation;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::db::writer::DbWriter;
use crate::error::Result;
use crate::scorer::OpportunityScorer;
use crate::state::SessionStore;
use crate::sweeper::DeadlineSweeper;
use crate::types::TrackerEvent;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Shared state ---
    let (event_tx, event_rx) = mpsc::channel::<TrackerEvent>(CHANNEL_CAPACITY);
    let store = SessionStore::new(event_tx.clone());
    let health = Arc::new(HealthState::new());
    let scorer = Arc::new(OpportunityScorer::default());

    // --- Spawn tasks ---

    // DB writer: persists scored opportunities and session transitions
    let writer = DbWriter::new(pool.clone(), event_rx, Arc::clone(&health));
    tokio::spawn(async move { writer.run().await });

    // Deadline sweeper: commits expired validation windows
    let sweeper = DeadlineSweeper::new(
        Arc::clone(&store),
        Arc::clone(&health),
        cfg.sweep_interval_secs,
    );
    info!(
        "Deadline sweeper running every {}s",
        cfg.sweep_interval_secs
    );
    tokio::spawn(async move { sweeper.run().await });

    // --- HTTP API server ---
    let api_state = ApiState {
        pool: pool.clone(),
        store,
        scorer,
        event_tx,
        health,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
