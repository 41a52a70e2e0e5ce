use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::consolidation::ExtractionSelector;
use crate::errors::AppError;
use crate::models::{
    ConsolidationResult, CreateRoundRequest, DeleteRoundQuery, DisputeRound, IngestRunRequest,
    IngestRunResponse, ListRoundsQuery, NormalizedAccount, NormalizedScore, Page, PageQuery,
    RoundStatusRequest, StoredReport,
};
use crate::persistence::ReportRepository;
use crate::rounds::{RoundDeletion, RoundLifecycleManager};
use crate::store::ReportStore;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub selector: ExtractionSelector,
    pub reports: ReportRepository,
    pub rounds: RoundLifecycleManager,
}

impl AppState {
    /// Wires every service onto one store.
    pub fn new(config: Config, store: Arc<dyn ReportStore>) -> Self {
        let selector = ExtractionSelector::with_detector(
            store.clone(),
            config.merge_policy(),
            Arc::new(config.duplicate_detector()),
        );
        let reports = ReportRepository::new(
            store.clone(),
            Duration::from_secs(config.report_cache_ttl_secs),
        );
        let rounds = RoundLifecycleManager::new(store);
        Self {
            config,
            selector,
            reports,
            rounds,
        }
    }
}

/// Every route except `/health`. Rate limiting and body limits are layered
/// on by the binary.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/runs", post(ingest_run))
        .route("/api/v1/runs/:run_id/normalized", get(get_latest_report))
        .route("/api/v1/runs/:run_id/scores", get(get_run_scores))
        .route("/api/v1/runs/:run_id/accounts", get(get_run_accounts))
        .route("/api/v1/users/:user_id/reports", get(list_user_reports))
        .route("/api/v1/users/:user_id/accounts", get(list_user_accounts))
        .route("/api/v1/users/:user_id/rounds", get(list_user_rounds))
        .route(
            "/api/v1/reports/:report_id/extraction/best",
            get(get_best_extraction),
        )
        .route(
            "/api/v1/reports/:report_id/consolidate",
            post(consolidate_report),
        )
        .route("/api/v1/rounds", post(create_round))
        .route("/api/v1/rounds/:round_id", get(get_round).delete(delete_round))
        .route("/api/v1/rounds/:round_id/status", post(update_round_status))
}

/// Full router without the binary's network-level layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}

/// GET /health
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "credit-report-engine",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

// ============ Reports ============

/// POST /api/v1/runs
///
/// Normalizes a scraper payload and stores both the raw payload and the
/// normalized graph. Requires `X-Ingest-Token` when `INGEST_WEBHOOK_SECRET`
/// is set.
pub async fn ingest_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<IngestRunRequest>,
) -> Result<(StatusCode, Json<IngestRunResponse>), AppError> {
    validate_ingest_token(&state, &headers)?;
    let response = state.reports.ingest(request.user_id, &request.payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/runs/:run_id/normalized
pub async fn get_latest_report(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<StoredReport>, AppError> {
    state
        .reports
        .fetch_latest(&run_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No normalized report for run {}", run_id)))
}

/// GET /api/v1/runs/:run_id/scores
pub async fn get_run_scores(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<NormalizedScore>>, AppError> {
    Ok(Json(state.reports.run_scores(&run_id).await?))
}

/// GET /api/v1/runs/:run_id/accounts
pub async fn get_run_accounts(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<NormalizedAccount>>, AppError> {
    Ok(Json(state.reports.run_accounts(&run_id).await?))
}

/// GET /api/v1/users/:user_id/reports?limit=&cursor=
pub async fn list_user_reports(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Page<StoredReport>>, AppError> {
    Ok(Json(state.reports.list_reports(user_id, &page).await?))
}

/// GET /api/v1/users/:user_id/accounts?category=&limit=&cursor=
pub async fn list_user_accounts(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Page<NormalizedAccount>>, AppError> {
    Ok(Json(state.reports.list_accounts(user_id, &page).await?))
}

// ============ Extraction ============

/// GET /api/v1/reports/:report_id/extraction/best
pub async fn get_best_extraction(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<Uuid>,
) -> Result<Json<ConsolidationResult>, AppError> {
    state
        .selector
        .select_best(report_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            AppError::NotFound(format!("No extraction attempts for report {}", report_id))
        })
}

/// POST /api/v1/reports/:report_id/consolidate
pub async fn consolidate_report(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<Uuid>,
) -> Result<Json<ConsolidationResult>, AppError> {
    state
        .selector
        .consolidate_and_persist(report_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            AppError::NotFound(format!("No extraction attempts for report {}", report_id))
        })
}

// ============ Dispute Rounds ============

/// POST /api/v1/rounds
pub async fn create_round(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRoundRequest>,
) -> Result<(StatusCode, Json<DisputeRound>), AppError> {
    let round = state
        .rounds
        .create(request.user_id, request.run_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(round)))
}

/// GET /api/v1/rounds/:round_id?includeDeleted=
pub async fn get_round(
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<Uuid>,
    Query(query): Query<ListRoundsQuery>,
) -> Result<Json<DisputeRound>, AppError> {
    state
        .rounds
        .get(round_id, query.include_deleted)
        .await?
        .map(Json)
        .ok_or_else(|| round_not_found(round_id))
}

/// GET /api/v1/users/:user_id/rounds?includeDeleted=
pub async fn list_user_rounds(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ListRoundsQuery>,
) -> Result<Json<Vec<DisputeRound>>, AppError> {
    Ok(Json(state.rounds.list(user_id, query.include_deleted).await?))
}

/// POST /api/v1/rounds/:round_id/status
pub async fn update_round_status(
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<Uuid>,
    Json(request): Json<RoundStatusRequest>,
) -> Result<Json<DisputeRound>, AppError> {
    state
        .rounds
        .transition(round_id, request.status)
        .await?
        .map(Json)
        .ok_or_else(|| round_not_found(round_id))
}

/// DELETE /api/v1/rounds/:round_id?removeRaw=
///
/// Succeeds once the round is marked deleted. Child tables that could not
/// be purged are listed under `failures`.
pub async fn delete_round(
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<Uuid>,
    Query(query): Query<DeleteRoundQuery>,
) -> Result<Json<RoundDeletion>, AppError> {
    state
        .rounds
        .delete(round_id, query.remove_raw)
        .await?
        .map(Json)
        .ok_or_else(|| round_not_found(round_id))
}

fn round_not_found(round_id: Uuid) -> AppError {
    AppError::NotFound(format!("Round {} not found", round_id))
}

/// Validate ingest secret from X-Ingest-Token header
fn validate_ingest_token(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    // No secret configured: ingestion is open (warned at startup)
    let Some(ref expected) = state.config.ingest_webhook_secret else {
        return Ok(());
    };

    let token = headers
        .get("X-Ingest-Token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Ingest-Token header".to_string()))?;

    if !constant_time_compare(token, expected) {
        tracing::warn!("Invalid ingest token received");
        return Err(AppError::Unauthorized("Invalid ingest token".to_string()));
    }

    Ok(())
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
