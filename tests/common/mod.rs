#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use credit_report_engine::errors::AppError;
use credit_report_engine::models::{
    AccountCategory, Bureau, ConsolidationUpdate, DisputeRound, ExtractionAttempt,
    NormalizedAccount, NormalizedReportRow, NormalizedScore, PageCursor, PageWindow, RawRun,
    RoundChild, RoundStatus, RoundTradeline, StoredReport, TradelineHistoryEntry,
};
use credit_report_engine::store::ReportStore;

/// Rows held by [`MemoryStore`], inspectable from tests.
#[derive(Default)]
pub struct MemoryState {
    pub attempts: Vec<ExtractionAttempt>,
    pub consolidations: HashMap<Uuid, ConsolidationUpdate>,
    pub raw_runs: HashMap<String, RawRun>,
    pub headers: HashMap<String, StoredReport>,
    pub scores: HashMap<(Uuid, String, Bureau, i32), NormalizedScore>,
    pub accounts: HashMap<(Uuid, String), NormalizedAccount>,
    pub rounds: HashMap<Uuid, DisputeRound>,
    pub round_raw: HashMap<Uuid, Value>,
    pub tradelines: Vec<RoundTradeline>,
    pub history: Vec<TradelineHistoryEntry>,
    pub records: Vec<(RoundChild, Uuid, Value)>,
    pub score_writes: usize,
    pub account_writes: usize,
}

impl MemoryState {
    pub fn children_of(&self, category: RoundChild, round_id: Uuid) -> usize {
        match category {
            RoundChild::Tradelines => self
                .tradelines
                .iter()
                .filter(|t| t.credit_round_id == round_id)
                .count(),
            _ => self
                .records
                .iter()
                .filter(|(c, r, _)| *c == category && *r == round_id)
                .count(),
        }
    }
}

/// Store operations that can be made to fail.
#[derive(Default)]
pub struct Failures {
    pub save_consolidation: bool,
    pub scores: bool,
    pub accounts: bool,
    pub mark_deleted: bool,
    pub history: bool,
    pub round_raw: bool,
    pub round_tradelines: bool,
    pub children: HashSet<RoundChild>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failures: Mutex<Failures>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    pub fn failures(&self) -> MutexGuard<'_, Failures> {
        self.failures.lock().unwrap()
    }

    pub fn add_attempt(&self, report_id: Uuid, text: &str, confidence: f64, method: &str) {
        self.state().attempts.push(ExtractionAttempt {
            report_id,
            extracted_text: text.to_string(),
            confidence_score: confidence,
            extraction_method: method.to_string(),
        });
    }

    fn fail_if(&self, failing: bool, what: &str) -> Result<(), AppError> {
        if failing {
            Err(AppError::StoreError(format!("injected failure: {}", what)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn list_extraction_attempts(
        &self,
        report_id: Uuid,
    ) -> Result<Vec<ExtractionAttempt>, AppError> {
        Ok(self
            .state()
            .attempts
            .iter()
            .filter(|a| a.report_id == report_id)
            .cloned()
            .collect())
    }

    async fn save_consolidation(
        &self,
        report_id: Uuid,
        update: &ConsolidationUpdate,
    ) -> Result<(), AppError> {
        self.fail_if(self.failures().save_consolidation, "save_consolidation")?;
        self.state().consolidations.insert(report_id, update.clone());
        Ok(())
    }

    async fn upsert_raw_run(&self, run: &RawRun) -> Result<Option<String>, AppError> {
        let previous = self
            .state()
            .raw_runs
            .insert(run.run_id.clone(), run.clone());
        Ok(previous.map(|p| p.payload_sha256))
    }

    async fn fetch_raw_run(&self, run_id: &str) -> Result<Option<RawRun>, AppError> {
        Ok(self.state().raw_runs.get(run_id).cloned())
    }

    async fn list_raw_run_ids(&self, user_id: Option<Uuid>) -> Result<Vec<String>, AppError> {
        let mut ids: Vec<String> = self
            .state()
            .raw_runs
            .values()
            .filter(|r| user_id.map_or(true, |u| r.user_id == u))
            .map(|r| r.run_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn upsert_report_header(&self, row: &NormalizedReportRow) -> Result<(), AppError> {
        self.state().headers.insert(
            row.run_id.clone(),
            StoredReport {
                run_id: row.run_id.clone(),
                user_id: row.user_id,
                collected_at: row.collected_at,
                version: row.version.clone(),
                report: row.report.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn upsert_scores(&self, rows: &[NormalizedScore]) -> Result<(), AppError> {
        self.fail_if(self.failures().scores, "upsert_scores")?;
        let mut state = self.state();
        state.score_writes += 1;
        for row in rows {
            state.scores.insert(
                (row.user_id, row.run_id.clone(), row.bureau, row.position),
                row.clone(),
            );
        }
        Ok(())
    }

    async fn upsert_accounts(&self, rows: &[NormalizedAccount]) -> Result<(), AppError> {
        self.fail_if(self.failures().accounts, "upsert_accounts")?;
        let mut state = self.state();
        state.account_writes += 1;
        for row in rows {
            state
                .accounts
                .insert((row.user_id, row.account_key.clone()), row.clone());
        }
        Ok(())
    }

    async fn fetch_latest_normalized(
        &self,
        run_id: &str,
    ) -> Result<Option<StoredReport>, AppError> {
        Ok(self.state().headers.get(run_id).cloned())
    }

    async fn fetch_run_scores(&self, run_id: &str) -> Result<Vec<NormalizedScore>, AppError> {
        let mut scores: Vec<NormalizedScore> = self
            .state()
            .scores
            .values()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect();
        scores.sort_by_key(|s| (s.bureau, s.position));
        Ok(scores)
    }

    async fn fetch_run_accounts(&self, run_id: &str) -> Result<Vec<NormalizedAccount>, AppError> {
        let mut accounts: Vec<NormalizedAccount> = self
            .state()
            .accounts
            .values()
            .filter(|a| a.run_id == run_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.account_key.cmp(&b.account_key));
        Ok(accounts)
    }

    async fn list_reports(
        &self,
        user_id: Uuid,
        window: &PageWindow,
    ) -> Result<Vec<StoredReport>, AppError> {
        let mut reports: Vec<StoredReport> = self
            .state()
            .headers
            .values()
            .filter(|r| r.user_id == user_id)
            .filter(|r| {
                window
                    .cursor
                    .as_ref()
                    .map_or(true, |c| after_cursor(r.collected_at, &r.run_id, c))
            })
            .cloned()
            .collect();
        reports.sort_by(|a, b| page_order(a.collected_at, &a.run_id, b.collected_at, &b.run_id));
        reports.truncate(window.limit as usize);
        Ok(reports)
    }

    async fn list_accounts(
        &self,
        user_id: Uuid,
        category: Option<AccountCategory>,
        window: &PageWindow,
    ) -> Result<Vec<NormalizedAccount>, AppError> {
        let mut accounts: Vec<NormalizedAccount> = self
            .state()
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .filter(|a| category.map_or(true, |c| a.account.category == c))
            .filter(|a| {
                window
                    .cursor
                    .as_ref()
                    .map_or(true, |c| after_cursor(a.collected_at, &a.account_key, c))
            })
            .cloned()
            .collect();
        accounts.sort_by(|a, b| {
            page_order(a.collected_at, &a.account_key, b.collected_at, &b.account_key)
        });
        accounts.truncate(window.limit as usize);
        Ok(accounts)
    }

    async fn insert_round(
        &self,
        user_id: Uuid,
        run_id: Option<&str>,
    ) -> Result<DisputeRound, AppError> {
        let mut state = self.state();
        let round_number = state
            .rounds
            .values()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.round_number)
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();
        let round = DisputeRound {
            id: Uuid::new_v4(),
            user_id,
            run_id: run_id.map(str::to_string),
            round_number,
            status: RoundStatus::Draft,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.rounds.insert(round.id, round.clone());
        Ok(round)
    }

    async fn get_round(&self, round_id: Uuid) -> Result<Option<DisputeRound>, AppError> {
        Ok(self.state().rounds.get(&round_id).cloned())
    }

    async fn list_rounds(
        &self,
        user_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<DisputeRound>, AppError> {
        let mut rounds: Vec<DisputeRound> = self
            .state()
            .rounds
            .values()
            .filter(|r| r.user_id == user_id)
            .filter(|r| include_deleted || r.status != RoundStatus::Deleted)
            .cloned()
            .collect();
        rounds.sort_by(|a, b| b.round_number.cmp(&a.round_number));
        Ok(rounds)
    }

    async fn update_round_status(
        &self,
        round_id: Uuid,
        status: RoundStatus,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        let round = state
            .rounds
            .get_mut(&round_id)
            .ok_or_else(|| AppError::StoreError(format!("round {} not found", round_id)))?;
        round.status = status;
        round.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_round_deleted(
        &self,
        round_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.fail_if(self.failures().mark_deleted, "mark_round_deleted")?;
        let mut state = self.state();
        let round = state
            .rounds
            .get_mut(&round_id)
            .ok_or_else(|| AppError::StoreError(format!("round {} not found", round_id)))?;
        round.status = RoundStatus::Deleted;
        round.deleted_at = Some(deleted_at);
        round.updated_at = deleted_at;
        Ok(())
    }

    async fn save_round_raw(&self, round_id: Uuid, payload: &Value) -> Result<(), AppError> {
        self.state().round_raw.insert(round_id, payload.clone());
        Ok(())
    }

    async fn insert_round_tradelines(&self, rows: &[RoundTradeline]) -> Result<(), AppError> {
        self.fail_if(self.failures().round_tradelines, "insert_round_tradelines")?;
        self.state().tradelines.extend_from_slice(rows);
        Ok(())
    }

    async fn insert_tradeline_history(
        &self,
        rows: &[TradelineHistoryEntry],
    ) -> Result<(), AppError> {
        self.state().history.extend_from_slice(rows);
        Ok(())
    }

    async fn insert_round_records(
        &self,
        category: RoundChild,
        round_id: Uuid,
        records: &[Value],
    ) -> Result<(), AppError> {
        let mut state = self.state();
        state
            .records
            .extend(records.iter().map(|r| (category, round_id, r.clone())));
        Ok(())
    }

    async fn list_round_tradeline_ids(&self, round_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        Ok(self
            .state()
            .tradelines
            .iter()
            .filter(|t| t.credit_round_id == round_id)
            .map(|t| t.id)
            .collect())
    }

    async fn delete_tradeline_history(&self, tradeline_ids: &[Uuid]) -> Result<u64, AppError> {
        self.fail_if(self.failures().history, "delete_tradeline_history")?;
        let mut state = self.state();
        let before = state.history.len();
        state
            .history
            .retain(|h| !tradeline_ids.contains(&h.tradeline_id));
        Ok((before - state.history.len()) as u64)
    }

    async fn delete_round_children(
        &self,
        category: RoundChild,
        round_id: Uuid,
    ) -> Result<u64, AppError> {
        let failing = self.failures().children.contains(&category);
        self.fail_if(failing, category.table())?;
        let mut state = self.state();
        let removed = if category == RoundChild::Tradelines {
            let before = state.tradelines.len();
            state.tradelines.retain(|t| t.credit_round_id != round_id);
            before - state.tradelines.len()
        } else {
            let before = state.records.len();
            state
                .records
                .retain(|(c, r, _)| !(*c == category && *r == round_id));
            before - state.records.len()
        };
        Ok(removed as u64)
    }

    async fn delete_round_raw(&self, round_id: Uuid) -> Result<u64, AppError> {
        self.fail_if(self.failures().round_raw, "delete_round_raw")?;
        Ok(self.state().round_raw.remove(&round_id).map_or(0, |_| 1))
    }
}

/// Listing order: newest `collected_at` first, undated rows last, ties by key.
fn page_order(
    a_at: Option<DateTime<Utc>>,
    a_key: &str,
    b_at: Option<DateTime<Utc>>,
    b_key: &str,
) -> Ordering {
    let by_time = match (a_at, b_at) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time.then_with(|| a_key.cmp(b_key))
}

fn after_cursor(collected_at: Option<DateTime<Utc>>, key: &str, cursor: &PageCursor) -> bool {
    page_order(collected_at, key, cursor.collected_at, &cursor.key) == Ordering::Greater
}

/// A scraper payload with two bureau scores, one revolving account with
/// payment history and a few other sections.
pub fn sample_payload(run_id: &str) -> Value {
    serde_json::json!({
        "runId": run_id,
        "collectedAt": "2024-03-01T10:00:00Z",
        "version": "v2",
        "scores": [
            {"bureau": "TransUnion", "score": 640, "status": "ok"},
            {"bureau": "Experian", "score": 655}
        ],
        "accounts": {
            "revolving": [{
                "bureau": "experian",
                "creditor": "BIG BANK",
                "accountNumber": "4111XXXX",
                "dateOpened": "2019-05-02",
                "balance": 1250.5,
                "paymentHistory": {"2024-01": "OK", "2024-02": "30"}
            }],
            "realEstate": [{
                "bureau": "equifax",
                "creditor": "HOME LOANS",
                "dateOpened": "2015-08-20T00:00:00Z"
            }]
        },
        "addresses": [{"line1": "1 Main St"}, {"line1": "2 Oak Ave"}],
        "inquiries": [{"creditor": "AUTO FIN"}]
    })
}
