//! cdb-ingest - Reconciliation Pipeline Service
//!
//! Ingests heterogeneous multi-source staging records (events,
//! businesses) and reconciles them into the canonical dataset:
//! normalization, deduplication, geocoding, data quality flagging,
//! provenance tracking. Triggered by an external scheduler over HTTP.

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cdb_ingest::AppState;

const BIND_ADDR: &str = "127.0.0.1:5741";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting cdb-ingest (Reconciliation Pipeline)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder (env → TOML → platform default)
    let root_folder = cdb_common::config::resolve_root_folder(None);
    info!("Root folder: {}", root_folder.display());

    // Step 2: Load configuration with environment overrides
    let config = cdb_common::config::load_config();

    // Step 3: Open or create the database
    let db_path = root_folder.join("cdb.db");
    let db_pool = cdb_common::db::init_database(&db_path).await?;
    info!("Database: {}", db_path.display());

    // Create application state (geocoder chain, orchestrator)
    let state = AppState::new(db_pool, &config);

    // Build router and serve
    let app = cdb_ingest::build_router(state);
    let listener = tokio::net::TcpListener::bind(BIND_ADDR).await?;
    info!("Listening on http://{}", BIND_ADDR);
    info!("Health check: http://{}/health", BIND_ADDR);

    axum::serve(listener, app).await?;

    Ok(())
}
