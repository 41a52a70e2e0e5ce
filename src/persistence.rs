//! Idempotent writes of raw runs and normalized report graphs.
//!
//! `save_normalized` issues three independent writes (header, scores,
//! accounts). They are not wrapped in one transaction: a failure after the
//! header leaves the header in place and is returned to the caller.

use chrono::Utc;
use moka::future::Cache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::models::{
    AccountCategory, Bureau, IngestRunResponse, NormalizedAccount, NormalizedReport,
    NormalizedReportRow, NormalizedScore, Page, PageCursor, PageQuery, PageWindow, RawRun,
    ReportAccount, StoredReport,
};
use crate::normalizer::normalize;
use crate::payload::{fingerprint, parse_timestamp};
use crate::store::ReportStore;

/// Row counts written by one `save_normalized` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub scores: usize,
    pub accounts: usize,
}

#[derive(Clone)]
pub struct ReportRepository {
    store: Arc<dyn ReportStore>,
    /// runId -> latest normalized report; invalidated on re-ingest.
    latest_cache: Cache<String, StoredReport>,
}

impl ReportRepository {
    pub fn new(store: Arc<dyn ReportStore>, cache_ttl: Duration) -> Self {
        let latest_cache = Cache::builder()
            .time_to_live(cache_ttl)
            .max_capacity(10_000)
            .build();
        Self {
            store,
            latest_cache,
        }
    }

    /// Stores the raw payload of a run. Returns whether it differs from the
    /// payload previously stored for the same run.
    pub async fn save_raw(
        &self,
        run_id: &str,
        user_id: Uuid,
        payload: &Value,
    ) -> Result<bool, AppError> {
        if run_id.trim().is_empty() {
            return Err(AppError::BadRequest("runId cannot be empty".to_string()));
        }

        let run = RawRun {
            run_id: run_id.to_string(),
            user_id,
            payload: payload.clone(),
            payload_sha256: fingerprint(payload),
            received_at: Utc::now(),
        };
        let previous = self.store.upsert_raw_run(&run).await?;
        let changed = previous.as_deref() != Some(run.payload_sha256.as_str());

        tracing::info!(
            "Stored raw payload for run {} (user {}, changed: {})",
            run_id,
            user_id,
            changed
        );
        Ok(changed)
    }

    /// Upserts header, scores and accounts of a normalized report. Empty
    /// score or account sets issue no write.
    pub async fn save_normalized(
        &self,
        user_id: Uuid,
        report: &NormalizedReport,
    ) -> Result<SaveSummary, AppError> {
        let header = header_row(user_id, report);
        self.store
            .upsert_report_header(&header)
            .await
            .with_context(|| format!("writing report header for run {}", report.run_id))?;
        self.latest_cache.invalidate(&report.run_id).await;

        let scores = score_rows(user_id, report);
        if scores.is_empty() {
            tracing::debug!("No scores for run {}, skipping score write", report.run_id);
        } else {
            self.store
                .upsert_scores(&scores)
                .await
                .with_context(|| format!("writing scores for run {}", report.run_id))?;
        }

        let accounts = account_rows(user_id, report);
        if accounts.is_empty() {
            tracing::debug!("No accounts for run {}, skipping account write", report.run_id);
        } else {
            self.store
                .upsert_accounts(&accounts)
                .await
                .with_context(|| format!("writing accounts for run {}", report.run_id))?;
        }

        tracing::info!(
            "Saved normalized report for run {} (user {}): {} scores, {} accounts",
            report.run_id,
            user_id,
            scores.len(),
            accounts.len()
        );

        Ok(SaveSummary {
            scores: scores.len(),
            accounts: accounts.len(),
        })
    }

    /// Validates and normalizes the payload before any write, then stores
    /// the raw payload and the normalized graph.
    pub async fn ingest(
        &self,
        user_id: Uuid,
        payload: &Value,
    ) -> Result<IngestRunResponse, AppError> {
        let report = normalize(payload)?;
        let payload_changed = self.save_raw(&report.run_id, user_id, payload).await?;
        let summary = self.save_normalized(user_id, &report).await?;

        Ok(IngestRunResponse {
            run_id: report.run_id,
            payload_changed,
            scores: summary.scores,
            accounts: summary.accounts,
        })
    }

    /// Re-normalizes the stored raw payload of a run and saves it again.
    /// `None` when the run has no raw payload.
    pub async fn renormalize(&self, run_id: &str) -> Result<Option<SaveSummary>, AppError> {
        let Some(raw) = self.store.fetch_raw_run(run_id).await? else {
            return Ok(None);
        };
        let report = normalize(&raw.payload)?;
        let summary = self.save_normalized(raw.user_id, &report).await?;
        Ok(Some(summary))
    }

    /// Most recently normalized report for a run, or `None`.
    pub async fn fetch_latest(&self, run_id: &str) -> Result<Option<StoredReport>, AppError> {
        if let Some(cached) = self.latest_cache.get(run_id).await {
            tracing::debug!("Latest report cache HIT for run {}", run_id);
            return Ok(Some(cached));
        }

        let latest = self.store.fetch_latest_normalized(run_id).await?;
        if let Some(report) = &latest {
            self.latest_cache
                .insert(run_id.to_string(), report.clone())
                .await;
        }
        Ok(latest)
    }

    pub async fn run_scores(&self, run_id: &str) -> Result<Vec<NormalizedScore>, AppError> {
        self.store.fetch_run_scores(run_id).await
    }

    pub async fn run_accounts(&self, run_id: &str) -> Result<Vec<NormalizedAccount>, AppError> {
        self.store.fetch_run_accounts(run_id).await
    }

    pub async fn list_reports(
        &self,
        user_id: Uuid,
        page: &PageQuery,
    ) -> Result<Page<StoredReport>, AppError> {
        let window = page_window(page)?;
        let items = self.store.list_reports(user_id, &window).await?;
        let next_cursor = next_cursor(&items, &window, |r| PageCursor {
            collected_at: r.collected_at,
            key: r.run_id.clone(),
        });
        Ok(Page { items, next_cursor })
    }

    pub async fn list_accounts(
        &self,
        user_id: Uuid,
        page: &PageQuery,
    ) -> Result<Page<NormalizedAccount>, AppError> {
        let category = page
            .category
            .as_deref()
            .map(str::parse::<AccountCategory>)
            .transpose()
            .map_err(AppError::BadRequest)?;
        let window = page_window(page)?;
        let items = self.store.list_accounts(user_id, category, &window).await?;
        let next_cursor = next_cursor(&items, &window, |a| PageCursor {
            collected_at: a.collected_at,
            key: a.account_key.clone(),
        });
        Ok(Page { items, next_cursor })
    }
}

fn page_window(page: &PageQuery) -> Result<PageWindow, AppError> {
    let cursor = page
        .cursor
        .as_deref()
        .map(PageCursor::parse)
        .transpose()
        .map_err(AppError::BadRequest)?;
    Ok(PageWindow {
        cursor,
        limit: page.limit(),
    })
}

/// Cursor after the last item of a full page; `None` once a page comes back
/// short.
fn next_cursor<T>(
    items: &[T],
    window: &PageWindow,
    position: impl Fn(&T) -> PageCursor,
) -> Option<String> {
    if (items.len() as i64) < window.limit {
        return None;
    }
    items.last().map(|item| position(item).encode())
}

pub fn header_row(user_id: Uuid, report: &NormalizedReport) -> NormalizedReportRow {
    NormalizedReportRow {
        run_id: report.run_id.clone(),
        user_id,
        collected_at: collected_timestamp(report),
        collected_at_raw: report.collected_at.clone(),
        version: report.version.clone(),
        report: report.report_graph(),
    }
}

pub fn score_rows(user_id: Uuid, report: &NormalizedReport) -> Vec<NormalizedScore> {
    let collected_at = collected_timestamp(report);
    report
        .scores
        .iter()
        .map(|score| NormalizedScore {
            user_id,
            run_id: report.run_id.clone(),
            bureau: score.bureau,
            score: score.score,
            status: score.status.clone(),
            position: score.position,
            collected_at,
        })
        .collect()
}

/// Flattens all three buckets into one row set. Accounts sharing bureau,
/// creditor, mask and open date within a run are told apart by their
/// occurrence index, which keeps re-ingestion of the same run idempotent.
pub fn account_rows(user_id: Uuid, report: &NormalizedReport) -> Vec<NormalizedAccount> {
    let collected_at = collected_timestamp(report);
    let mut occurrences: HashMap<AccountIdentity<'_>, usize> = HashMap::new();

    report
        .accounts
        .flatten()
        .map(|account| {
            let occurrence = occurrences.entry(AccountIdentity::of(account)).or_insert(0);
            let key = account_key(account, *occurrence);
            *occurrence += 1;
            NormalizedAccount {
                user_id,
                run_id: report.run_id.clone(),
                account_key: key,
                collected_at,
                account: account.clone(),
            }
        })
        .collect()
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct AccountIdentity<'a> {
    bureau: Bureau,
    creditor: Option<&'a str>,
    mask: Option<&'a str>,
    opened_on: Option<&'a str>,
}

impl<'a> AccountIdentity<'a> {
    fn of(account: &'a ReportAccount) -> Self {
        Self {
            bureau: account.bureau,
            creditor: account.creditor.as_deref(),
            mask: account.account_number_mask.as_deref(),
            opened_on: account.opened_on.as_deref(),
        }
    }
}

/// Hex SHA-256 over the natural key fields and the occurrence index.
pub fn account_key(account: &ReportAccount, occurrence: usize) -> String {
    let mut hasher = Sha256::new();
    for part in [
        account.bureau.as_str(),
        account.creditor.as_deref().unwrap_or(""),
        account.account_number_mask.as_deref().unwrap_or(""),
        account.opened_on.as_deref().unwrap_or(""),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update(occurrence.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn collected_timestamp(report: &NormalizedReport) -> Option<chrono::DateTime<Utc>> {
    let raw = report.collected_at.as_deref()?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        tracing::warn!(
            "Run {} has unparsable collectedAt '{}', stored without timestamp",
            report.run_id,
            raw
        );
    }
    parsed
}
