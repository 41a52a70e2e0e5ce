//! Script to rebuild normalized reports from stored raw payloads.
//!
//! Usage: `renormalize_runs [USER_ID]`. Without a user id every stored run
//! is processed.
//!
//! A running server does not see these writes through its latest-report
//! cache: `GET /api/v1/runs/:run_id/normalized` may keep serving the previous
//! graph for up to `REPORT_CACHE_TTL_SECS`. Restart the server to drop it.

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use credit_report_engine::db_storage::PgStore;
use credit_report_engine::obs;
use credit_report_engine::persistence::ReportRepository;
use credit_report_engine::store::ReportStore;

/// Re-runs normalization over stored runs so report rows pick up decoder
/// changes. A failing run is logged and skipped.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    obs::init_tracing("info");

    let user_id = env::args().nth(1).map(|arg| Uuid::parse_str(&arg)).transpose()?;

    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("DB_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let store: Arc<dyn ReportStore> = Arc::new(PgStore::new(pool));
    let reports = ReportRepository::new(store.clone(), Duration::from_secs(1));

    let run_ids = store.list_raw_run_ids(user_id).await?;
    tracing::info!("Connected to database. Renormalizing {} runs...", run_ids.len());

    let mut rebuilt = 0;
    let mut failed = 0;
    for run_id in &run_ids {
        match reports.renormalize(run_id).await {
            Ok(Some(summary)) => {
                rebuilt += 1;
                tracing::debug!(
                    "Run {}: {} scores, {} accounts",
                    run_id,
                    summary.scores,
                    summary.accounts
                );
            }
            Ok(None) => tracing::warn!("Run {} disappeared before it was processed", run_id),
            Err(e) => {
                failed += 1;
                tracing::error!("Failed to renormalize run {}: {}", run_id, e);
            }
        }
    }

    tracing::info!(
        "Renormalization complete. Rebuilt {} runs, {} failed.",
        rebuilt,
        failed
    );

    Ok(())
}
