//! Interface to the relational store the engine writes into.
//!
//! Each method is one statement (or one batch) against the store and is
//! atomic only at that granularity. Multi-step workflows built on top of
//! it are not wrapped in a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    AccountCategory, ConsolidationUpdate, DisputeRound, ExtractionAttempt, NormalizedAccount,
    NormalizedReportRow, NormalizedScore, PageWindow, RawRun, RoundChild, RoundStatus, RoundTradeline, StoredReport,
    TradelineHistoryEntry,
};

#[async_trait]
pub trait ReportStore: Send + Sync {
    // ---- extraction attempts ----

    /// All attempts for a report in the order they were recorded.
    async fn list_extraction_attempts(
        &self,
        report_id: Uuid,
    ) -> Result<Vec<ExtractionAttempt>, AppError>;

    /// Overwrites the consolidation fields of a report in one update.
    async fn save_consolidation(
        &self,
        report_id: Uuid,
        update: &ConsolidationUpdate,
    ) -> Result<(), AppError>;

    // ---- raw runs ----

    /// Inserts or overwrites the raw payload of a run. Returns the previous
    /// fingerprint, if the run had been stored before.
    async fn upsert_raw_run(&self, run: &RawRun) -> Result<Option<String>, AppError>;

    async fn fetch_raw_run(&self, run_id: &str) -> Result<Option<RawRun>, AppError>;

    async fn list_raw_run_ids(&self, user_id: Option<Uuid>) -> Result<Vec<String>, AppError>;

    // ---- normalized report graph ----

    async fn upsert_report_header(&self, row: &NormalizedReportRow) -> Result<(), AppError>;

    /// Batch upsert on `(user_id, run_id, bureau, position)`.
    async fn upsert_scores(&self, rows: &[NormalizedScore]) -> Result<(), AppError>;

    /// Batch upsert on `(user_id, account_key)`.
    async fn upsert_accounts(&self, rows: &[NormalizedAccount]) -> Result<(), AppError>;

    async fn fetch_latest_normalized(&self, run_id: &str)
        -> Result<Option<StoredReport>, AppError>;

    async fn fetch_run_scores(&self, run_id: &str) -> Result<Vec<NormalizedScore>, AppError>;

    async fn fetch_run_accounts(&self, run_id: &str) -> Result<Vec<NormalizedAccount>, AppError>;

    /// Report headers for a user, newest `collected_at` first, then by
    /// `run_id`. The cursor's key is a run id.
    async fn list_reports(
        &self,
        user_id: Uuid,
        window: &PageWindow,
    ) -> Result<Vec<StoredReport>, AppError>;

    /// Accounts for a user, newest `collected_at` first, then by
    /// `account_key`, optionally one category. The cursor's key is an
    /// account key.
    async fn list_accounts(
        &self,
        user_id: Uuid,
        category: Option<AccountCategory>,
        window: &PageWindow,
    ) -> Result<Vec<NormalizedAccount>, AppError>;

    // ---- dispute rounds ----

    /// Creates a draft round numbered after the user's highest round.
    async fn insert_round(
        &self,
        user_id: Uuid,
        run_id: Option<&str>,
    ) -> Result<DisputeRound, AppError>;

    async fn get_round(&self, round_id: Uuid) -> Result<Option<DisputeRound>, AppError>;

    async fn list_rounds(
        &self,
        user_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<DisputeRound>, AppError>;

    async fn update_round_status(
        &self,
        round_id: Uuid,
        status: RoundStatus,
    ) -> Result<(), AppError>;

    /// Flips the round to `deleted` and stamps `deleted_at`.
    async fn mark_round_deleted(
        &self,
        round_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn save_round_raw(&self, round_id: Uuid, payload: &Value) -> Result<(), AppError>;

    async fn insert_round_tradelines(&self, rows: &[RoundTradeline]) -> Result<(), AppError>;

    async fn insert_tradeline_history(
        &self,
        rows: &[TradelineHistoryEntry],
    ) -> Result<(), AppError>;

    /// Inserts JSON child records for any category other than tradelines.
    async fn insert_round_records(
        &self,
        category: RoundChild,
        round_id: Uuid,
        records: &[Value],
    ) -> Result<(), AppError>;

    async fn list_round_tradeline_ids(&self, round_id: Uuid) -> Result<Vec<Uuid>, AppError>;

    async fn delete_tradeline_history(&self, tradeline_ids: &[Uuid]) -> Result<u64, AppError>;

    async fn delete_round_children(
        &self,
        category: RoundChild,
        round_id: Uuid,
    ) -> Result<u64, AppError>;

    async fn delete_round_raw(&self, round_id: Uuid) -> Result<u64, AppError>;
}
