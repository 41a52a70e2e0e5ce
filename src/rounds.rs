//! Dispute round lifecycle: creation, snapshots, status moves and the
//! soft-delete cascade.
//!
//! Deleting a round soft-deletes the round row and hard-deletes its child
//! rows. Only the soft delete is guaranteed: child deletes run one category
//! at a time, and a failing category is logged and reported back without
//! stopping the others or failing the call.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    DisputeRound, RawRun, RoundChild, RoundStatus, RoundTradeline, TradelineHistoryEntry,
};
use crate::normalizer::normalize;
use crate::payload::{keys, Fields};
use crate::persistence::account_rows;
use crate::store::ReportStore;

const HISTORY_TABLE: &str = "credit_round_tradeline_history";
const RAW_TABLE: &str = "credit_round_raw";

/// One cascade step that failed while deleting a round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CascadeFailure {
    pub table: String,
    pub error: String,
}

/// Outcome of a round delete. `failures` lists child tables that may still
/// hold rows for the round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundDeletion {
    pub round_id: Uuid,
    pub deleted_at: DateTime<Utc>,
    pub raw_removed: bool,
    pub failures: Vec<CascadeFailure>,
}

impl RoundDeletion {
    pub fn fully_purged(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Rows copied into a round from a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub tradelines: usize,
    pub history_entries: usize,
    pub scores: usize,
    pub other_records: usize,
}

/// Statuses only move forward along draft -> saved -> sent. Deleted rounds
/// cannot move, and deletion goes through [`RoundLifecycleManager::delete`].
pub fn check_transition(from: RoundStatus, to: RoundStatus) -> Result<(), AppError> {
    match (from.rank(), to.rank()) {
        (None, _) => Err(AppError::BadRequest(
            "round is deleted and can no longer change status".to_string(),
        )),
        (_, None) => Err(AppError::BadRequest(
            "rounds are deleted through the delete operation".to_string(),
        )),
        (Some(current), Some(target)) if target < current => Err(AppError::BadRequest(format!(
            "round status cannot move back from {} to {}",
            from, to
        ))),
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct RoundLifecycleManager {
    store: Arc<dyn ReportStore>,
}

impl RoundLifecycleManager {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }

    /// Starts a new draft round for the user, optionally populated from an
    /// ingested run.
    pub async fn create(
        &self,
        user_id: Uuid,
        run_id: Option<&str>,
    ) -> Result<DisputeRound, AppError> {
        let raw = match run_id {
            Some(run_id) => Some(self.store.fetch_raw_run(run_id).await?.ok_or_else(|| {
                AppError::BadRequest(format!("run {} has not been ingested", run_id))
            })?),
            None => None,
        };
        if let Some(raw) = &raw {
            check_owner(raw, user_id)?;
        }

        let round = self.store.insert_round(user_id, run_id).await?;
        tracing::info!(
            "Created round {} (#{}) for user {}",
            round.id,
            round.round_number,
            user_id
        );

        if let Some(raw) = raw {
            if let Err(e) = self.snapshot(round.id, &raw).await {
                tracing::error!(
                    "Snapshot of run {} into new round {} failed, discarding round: {}",
                    raw.run_id,
                    round.id,
                    e
                );
                if let Err(cleanup) = self.delete(round.id, true).await {
                    tracing::error!("Failed to discard round {}: {}", round.id, cleanup);
                }
                return Err(e);
            }
        }
        Ok(round)
    }

    /// Replaces the round's snapshot with a copy of the run's report. `None`
    /// when the round or the run does not exist. The run must belong to the
    /// round's user.
    pub async fn attach_snapshot(
        &self,
        round_id: Uuid,
        run_id: &str,
    ) -> Result<Option<SnapshotSummary>, AppError> {
        let Some(round) = self.store.get_round(round_id).await? else {
            return Ok(None);
        };
        if round.status == RoundStatus::Deleted {
            return Err(AppError::BadRequest(format!("round {} is deleted", round_id)));
        }
        let Some(raw) = self.store.fetch_raw_run(run_id).await? else {
            return Ok(None);
        };
        check_owner(&raw, round.user_id)?;

        self.clear_snapshot(round_id).await?;
        self.snapshot(round_id, &raw).await.map(Some)
    }

    /// Removes the child rows of a live round. Unlike the delete cascade,
    /// any failure aborts.
    async fn clear_snapshot(&self, round_id: Uuid) -> Result<(), AppError> {
        let ids = self.store.list_round_tradeline_ids(round_id).await?;
        if !ids.is_empty() {
            self.store.delete_tradeline_history(&ids).await?;
        }
        for category in RoundChild::ALL {
            self.store.delete_round_children(category, round_id).await?;
        }
        Ok(())
    }

    async fn snapshot(&self, round_id: Uuid, raw: &RawRun) -> Result<SnapshotSummary, AppError> {
        let report = normalize(&raw.payload)?;
        let mut summary = SnapshotSummary::default();

        let mut tradelines = Vec::new();
        let mut history = Vec::new();
        for row in account_rows(raw.user_id, &report) {
            let id = Uuid::new_v4();
            if let Some(payment_history) = &row.account.payment_history {
                history.extend(
                    history_entries(payment_history)
                        .into_iter()
                        .map(|(month, status)| TradelineHistoryEntry {
                            tradeline_id: id,
                            month,
                            status,
                        }),
                );
            }
            tradelines.push(RoundTradeline {
                id,
                credit_round_id: round_id,
                bureau: row.account.bureau,
                creditor: row.account.creditor.clone(),
                account_number_mask: row.account.account_number_mask.clone(),
                category: row.account.category,
                data: serde_json::to_value(&row)?,
            });
        }

        if !tradelines.is_empty() {
            self.store.insert_round_tradelines(&tradelines).await?;
            summary.tradelines = tradelines.len();
        }
        if !history.is_empty() {
            self.store.insert_tradeline_history(&history).await?;
            summary.history_entries = history.len();
        }

        let scores = report
            .scores
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        if !scores.is_empty() {
            self.store
                .insert_round_records(RoundChild::Scores, round_id, &scores)
                .await?;
            summary.scores = scores.len();
        }

        let root = Fields::new(&raw.payload);
        let nested = root.object(keys::REPORT);
        let body = if nested.is_object() { nested } else { root };
        for (category, aliases) in [
            (RoundChild::PersonalIdentifiers, keys::PERSONAL_IDENTIFIERS),
            (RoundChild::Addresses, keys::ADDRESSES),
            (RoundChild::Employers, keys::EMPLOYERS),
            (RoundChild::Collections, keys::COLLECTIONS),
            (RoundChild::PublicRecords, keys::PUBLIC_RECORDS),
            (RoundChild::Inquiries, keys::INQUIRIES),
        ] {
            let records = section_records(body, aliases);
            if records.is_empty() {
                continue;
            }
            self.store
                .insert_round_records(category, round_id, &records)
                .await?;
            summary.other_records += records.len();
        }

        self.store.save_round_raw(round_id, &raw.payload).await?;

        tracing::info!(
            "Snapshotted run {} into round {}: {} tradelines, {} history entries, {} scores, {} other records",
            raw.run_id,
            round_id,
            summary.tradelines,
            summary.history_entries,
            summary.scores,
            summary.other_records
        );
        Ok(summary)
    }

    /// The round, hiding deleted rounds unless `include_deleted` is set.
    pub async fn get(
        &self,
        round_id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<DisputeRound>, AppError> {
        let round = self.store.get_round(round_id).await?;
        Ok(round.filter(|r| include_deleted || r.status != RoundStatus::Deleted))
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<DisputeRound>, AppError> {
        self.store.list_rounds(user_id, include_deleted).await
    }

    /// Moves a round forward. Same-status moves are accepted as no-ops.
    pub async fn transition(
        &self,
        round_id: Uuid,
        status: RoundStatus,
    ) -> Result<Option<DisputeRound>, AppError> {
        let Some(mut round) = self.store.get_round(round_id).await? else {
            return Ok(None);
        };
        check_transition(round.status, status)?;
        if round.status == status {
            return Ok(Some(round));
        }

        self.store.update_round_status(round_id, status).await?;
        tracing::info!("Round {} moved from {} to {}", round_id, round.status, status);

        round.status = status;
        round.updated_at = Utc::now();
        Ok(Some(round))
    }

    /// Soft-deletes the round, then purges its child rows best-effort.
    ///
    /// Returns `None` when the round does not exist. Fails only when the
    /// round itself cannot be marked deleted; in that case nothing else is
    /// touched.
    pub async fn delete(
        &self,
        round_id: Uuid,
        remove_raw: bool,
    ) -> Result<Option<RoundDeletion>, AppError> {
        let Some(round) = self.store.get_round(round_id).await? else {
            return Ok(None);
        };
        if round.status == RoundStatus::Deleted {
            return Err(AppError::BadRequest(format!(
                "round {} is already deleted",
                round_id
            )));
        }

        let deleted_at = Utc::now();
        self.store.mark_round_deleted(round_id, deleted_at).await?;
        tracing::info!("Round {} marked deleted", round_id);

        let mut failures = Vec::new();
        let mut record = |table: &str, error: AppError| {
            tracing::error!(
                "Failed to purge {} for deleted round {}: {}",
                table,
                round_id,
                error
            );
            failures.push(CascadeFailure {
                table: table.to_string(),
                error: error.to_string(),
            });
        };

        // History rows hang off tradeline ids, so they go before tradelines.
        match self.store.list_round_tradeline_ids(round_id).await {
            Ok(ids) if ids.is_empty() => {}
            Ok(ids) => match self.store.delete_tradeline_history(&ids).await {
                Ok(n) => tracing::debug!("Deleted {} history rows for round {}", n, round_id),
                Err(e) => record(HISTORY_TABLE, e),
            },
            Err(e) => record(HISTORY_TABLE, e),
        }

        for category in RoundChild::ALL {
            match self.store.delete_round_children(category, round_id).await {
                Ok(n) => tracing::debug!("Deleted {} rows from {} for round {}", n, category, round_id),
                Err(e) => record(category.table(), e),
            }
        }

        let mut raw_removed = false;
        if remove_raw {
            match self.store.delete_round_raw(round_id).await {
                Ok(_) => raw_removed = true,
                Err(e) => record(RAW_TABLE, e),
            }
        }

        if failures.is_empty() {
            tracing::info!("Round {} children purged", round_id);
        } else {
            tracing::warn!(
                "Round {} deleted with {} child purge failure(s)",
                round_id,
                failures.len()
            );
        }

        Ok(Some(RoundDeletion {
            round_id,
            deleted_at,
            raw_removed,
            failures,
        }))
    }
}

fn check_owner(raw: &RawRun, user_id: Uuid) -> Result<(), AppError> {
    if raw.user_id != user_id {
        return Err(AppError::BadRequest(format!(
            "run {} does not belong to user {}",
            raw.run_id, user_id
        )));
    }
    Ok(())
}

/// Records of one payload section: each object of an array, or a single
/// object. Scalars in an array are kept as `{"value": ...}`.
fn section_records(body: Fields<'_>, aliases: &[&str]) -> Vec<Value> {
    match body.raw(aliases) {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|item| match item {
                Value::Object(_) => item.clone(),
                scalar => json!({ "value": scalar }),
            })
            .collect(),
        Some(object @ Value::Object(_)) => vec![object.clone()],
        _ => Vec::new(),
    }
}

/// Month/status pairs from a payment history, which scrapers send either
/// as `{"2024-01": "OK"}` or as `[{"month": "2024-01", "status": "OK"}]`.
fn history_entries(history: &Value) -> Vec<(String, Option<String>)> {
    match history {
        Value::Object(by_month) => by_month
            .iter()
            .map(|(month, entry)| {
                let status = match entry {
                    Value::Object(_) => Fields::new(entry).str(keys::HISTORY_STATUS),
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
                (month.clone(), status)
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let fields = Fields::new(item);
                let month = fields.str(keys::HISTORY_MONTH)?;
                Some((month, fields.str(keys::HISTORY_STATUS)))
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(check_transition(RoundStatus::Draft, RoundStatus::Saved).is_ok());
        assert!(check_transition(RoundStatus::Saved, RoundStatus::Sent).is_ok());
        assert!(check_transition(RoundStatus::Draft, RoundStatus::Sent).is_ok());
        assert!(check_transition(RoundStatus::Saved, RoundStatus::Saved).is_ok());
    }

    #[test]
    fn backward_and_deleted_transitions_are_rejected() {
        assert!(check_transition(RoundStatus::Sent, RoundStatus::Saved)
            .unwrap_err()
            .is_validation());
        assert!(check_transition(RoundStatus::Deleted, RoundStatus::Draft).is_err());
        assert!(check_transition(RoundStatus::Draft, RoundStatus::Deleted).is_err());
    }

    #[test]
    fn history_accepts_map_and_list_shapes() {
        let map = json!({"2024-01": "OK", "2024-02": {"status": "30"}, "2024-03": null});
        assert_eq!(
            history_entries(&map),
            vec![
                ("2024-01".to_string(), Some("OK".to_string())),
                ("2024-02".to_string(), Some("30".to_string())),
                ("2024-03".to_string(), None),
            ]
        );

        let list = json!([{"month": "2023-12", "code": "CO"}, {"status": "OK"}]);
        assert_eq!(
            history_entries(&list),
            vec![("2023-12".to_string(), Some("CO".to_string()))]
        );
        assert!(history_entries(&json!("OK OK 30")).is_empty());
    }

    #[test]
    fn section_records_normalise_shapes() {
        let doc = json!({
            "addresses": [{"line1": "1 Main St"}, "PO BOX 4", null],
            "personal": {"name": "JANE DOE"},
            "inquiries": "none"
        });
        let body = Fields::new(&doc);
        assert_eq!(
            section_records(body, keys::ADDRESSES),
            vec![json!({"line1": "1 Main St"}), json!({"value": "PO BOX 4"})]
        );
        assert_eq!(section_records(body, keys::PERSONAL_IDENTIFIERS).len(), 1);
        assert!(section_records(body, keys::INQUIRIES).is_empty());
        assert!(section_records(body, keys::EMPLOYERS).is_empty());
    }
}
