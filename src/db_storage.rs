use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Number, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    AccountCategory, Bureau, ConsolidationUpdate, DisputeRound, ExtractionAttempt, LateCounts,
    NormalizedAccount, NormalizedReportRow, NormalizedScore, PageCursor, PageWindow, RawRun, ReportAccount,
    RoundChild, RoundStatus, RoundTradeline, StoredReport, TradelineHistoryEntry,
};
use crate::payload::parse_date;
use crate::store::ReportStore;

/// Rows per multi-row statement; keeps account batches well under the
/// 65535 bind-parameter limit.
const UPSERT_CHUNK_ROWS: usize = 1000;

const ROUND_COLUMNS: &str =
    "id, user_id, run_id, round_number, status, created_at, updated_at, deleted_at";

const ACCOUNT_COLUMNS: &str = "user_id, run_id, account_key, category, bureau, creditor, \
     account_number_mask, account_type, opened_on, reported_on, last_activity_on, closed_on, \
     balance, credit_limit, high_balance, past_due, monthly_payment, status, rating, remarks, \
     payment_history, days_late, collected_at";

/// Postgres implementation of [`ReportStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn list_extraction_attempts(
        &self,
        report_id: Uuid,
    ) -> Result<Vec<ExtractionAttempt>, AppError> {
        sqlx::query_as::<_, ExtractionAttempt>(
            r#"
            SELECT report_id, extracted_text, confidence_score, extraction_method
            FROM report_extractions
            WHERE report_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    async fn save_consolidation(
        &self,
        report_id: Uuid,
        update: &ConsolidationUpdate,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE credit_reports
            SET raw_text = $2,
                consolidation_confidence = $3,
                consolidation_status = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(report_id)
        .bind(&update.raw_text)
        .bind(update.consolidation_confidence)
        .bind(&update.consolidation_status)
        .bind(update.updated_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(AppError::StoreError(format!(
                "credit report {} does not exist",
                report_id
            )));
        }
        Ok(())
    }

    async fn upsert_raw_run(&self, run: &RawRun) -> Result<Option<String>, AppError> {
        let previous: Option<String> = sqlx::query_scalar(
            r#"
            WITH previous AS (
                SELECT payload_sha256 FROM credit_report_runs WHERE run_id = $1
            )
            INSERT INTO credit_report_runs (run_id, user_id, payload, payload_sha256, received_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (run_id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                payload = EXCLUDED.payload,
                payload_sha256 = EXCLUDED.payload_sha256,
                updated_at = now()
            RETURNING (SELECT payload_sha256 FROM previous)
            "#,
        )
        .bind(&run.run_id)
        .bind(run.user_id)
        .bind(&run.payload)
        .bind(&run.payload_sha256)
        .bind(run.received_at)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(previous)
    }

    async fn fetch_raw_run(&self, run_id: &str) -> Result<Option<RawRun>, AppError> {
        let row = sqlx::query_as::<_, (String, Uuid, Value, String, DateTime<Utc>)>(
            r#"
            SELECT run_id, user_id, payload, payload_sha256, received_at
            FROM credit_report_runs
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(row.map(
            |(run_id, user_id, payload, payload_sha256, received_at)| RawRun {
                run_id,
                user_id,
                payload,
                payload_sha256,
                received_at,
            },
        ))
    }

    async fn list_raw_run_ids(&self, user_id: Option<Uuid>) -> Result<Vec<String>, AppError> {
        sqlx::query_scalar(
            r#"
            SELECT run_id FROM credit_report_runs
            WHERE $1::uuid IS NULL OR user_id = $1
            ORDER BY received_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    async fn upsert_report_header(&self, row: &NormalizedReportRow) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO normalized_reports (run_id, user_id, collected_at, collected_at_raw, version, report, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (run_id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                collected_at = EXCLUDED.collected_at,
                collected_at_raw = EXCLUDED.collected_at_raw,
                version = EXCLUDED.version,
                report = EXCLUDED.report,
                updated_at = now()
            "#,
        )
        .bind(&row.run_id)
        .bind(row.user_id)
        .bind(row.collected_at)
        .bind(&row.collected_at_raw)
        .bind(&row.version)
        .bind(&row.report)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(())
    }

    async fn upsert_scores(&self, rows: &[NormalizedScore]) -> Result<(), AppError> {
        for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO normalized_scores (user_id, run_id, bureau, position, score, status, collected_at) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.user_id)
                    .push_bind(row.run_id.clone())
                    .push_bind(row.bureau.as_str())
                    .push_bind(row.position)
                    .push_bind(row.score)
                    .push_bind(row.status.clone())
                    .push_bind(row.collected_at);
            });
            qb.push(
                " ON CONFLICT (user_id, run_id, bureau, position) DO UPDATE \
                 SET score = EXCLUDED.score, \
                     status = EXCLUDED.status, \
                     collected_at = EXCLUDED.collected_at, \
                     updated_at = now()",
            );
            qb.build()
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        }
        Ok(())
    }

    async fn upsert_accounts(&self, rows: &[NormalizedAccount]) -> Result<(), AppError> {
        for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO normalized_accounts ({}) ", ACCOUNT_COLUMNS));
            qb.push_values(chunk, |mut b, row| {
                let account = &row.account;
                b.push_bind(row.user_id)
                    .push_bind(row.run_id.clone())
                    .push_bind(row.account_key.clone())
                    .push_bind(account.category.as_str())
                    .push_bind(account.bureau.as_str())
                    .push_bind(account.creditor.clone())
                    .push_bind(account.account_number_mask.clone())
                    .push_bind(account.account_type.clone())
                    .push_bind(date_column(&account.opened_on))
                    .push_bind(date_column(&account.reported_on))
                    .push_bind(date_column(&account.last_activity_on))
                    .push_bind(date_column(&account.closed_on))
                    .push_bind(decimal_column(&account.balance))
                    .push_bind(decimal_column(&account.credit_limit))
                    .push_bind(decimal_column(&account.high_balance))
                    .push_bind(decimal_column(&account.past_due))
                    .push_bind(decimal_column(&account.monthly_payment))
                    .push_bind(account.status.clone())
                    .push_bind(account.rating.clone())
                    .push_bind(account.remarks.clone())
                    .push_bind(account.payment_history.clone())
                    .push_bind(serde_json::to_value(account.days_late).unwrap_or(Value::Null))
                    .push_bind(row.collected_at);
            });
            qb.push(
                " ON CONFLICT (user_id, account_key) DO UPDATE \
                 SET run_id = EXCLUDED.run_id, \
                     category = EXCLUDED.category, \
                     account_type = EXCLUDED.account_type, \
                     reported_on = EXCLUDED.reported_on, \
                     last_activity_on = EXCLUDED.last_activity_on, \
                     closed_on = EXCLUDED.closed_on, \
                     balance = EXCLUDED.balance, \
                     credit_limit = EXCLUDED.credit_limit, \
                     high_balance = EXCLUDED.high_balance, \
                     past_due = EXCLUDED.past_due, \
                     monthly_payment = EXCLUDED.monthly_payment, \
                     status = EXCLUDED.status, \
                     rating = EXCLUDED.rating, \
                     remarks = EXCLUDED.remarks, \
                     payment_history = EXCLUDED.payment_history, \
                     days_late = EXCLUDED.days_late, \
                     collected_at = EXCLUDED.collected_at, \
                     updated_at = now()",
            );
            qb.build()
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        }
        Ok(())
    }

    async fn fetch_latest_normalized(
        &self,
        run_id: &str,
    ) -> Result<Option<StoredReport>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT run_id, user_id, collected_at, version, report, updated_at
            FROM normalized_reports
            WHERE run_id = $1
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        row.as_ref()
            .map(stored_report_from_row)
            .transpose()
            .map_err(AppError::DatabaseError)
    }

    async fn fetch_run_scores(&self, run_id: &str) -> Result<Vec<NormalizedScore>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, run_id, bureau, score, status, position, collected_at
            FROM normalized_scores
            WHERE run_id = $1
            ORDER BY bureau ASC, position ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        rows.iter()
            .map(score_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::DatabaseError)
    }

    async fn fetch_run_accounts(&self, run_id: &str) -> Result<Vec<NormalizedAccount>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM normalized_accounts WHERE run_id = $1 ORDER BY category, account_key",
            ACCOUNT_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        rows.iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::DatabaseError)
    }

    async fn list_reports(
        &self,
        user_id: Uuid,
        window: &PageWindow,
    ) -> Result<Vec<StoredReport>, AppError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT run_id, user_id, collected_at, version, report, updated_at \
             FROM normalized_reports WHERE user_id = ",
        );
        qb.push_bind(user_id);
        if let Some(cursor) = &window.cursor {
            push_after_cursor(&mut qb, cursor, "run_id");
        }
        qb.push(" ORDER BY collected_at DESC NULLS LAST, run_id ASC LIMIT ")
            .push_bind(window.limit);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        rows.iter()
            .map(stored_report_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::DatabaseError)
    }

    async fn list_accounts(
        &self,
        user_id: Uuid,
        category: Option<AccountCategory>,
        window: &PageWindow,
    ) -> Result<Vec<NormalizedAccount>, AppError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM normalized_accounts WHERE user_id = ",
            ACCOUNT_COLUMNS
        ));
        qb.push_bind(user_id);
        if let Some(category) = category {
            qb.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(cursor) = &window.cursor {
            push_after_cursor(&mut qb, cursor, "account_key");
        }
        qb.push(" ORDER BY collected_at DESC NULLS LAST, account_key ASC LIMIT ")
            .push_bind(window.limit);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        rows.iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::DatabaseError)
    }

    async fn insert_round(
        &self,
        user_id: Uuid,
        run_id: Option<&str>,
    ) -> Result<DisputeRound, AppError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO credit_rounds (user_id, run_id, round_number, status)
            SELECT $1, $2, COALESCE(MAX(round_number), 0) + 1, 'draft'
            FROM credit_rounds
            WHERE user_id = $1
            RETURNING {}
            "#,
            ROUND_COLUMNS
        ))
        .bind(user_id)
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        round_from_row(&row)
    }

    async fn get_round(&self, round_id: Uuid) -> Result<Option<DisputeRound>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM credit_rounds WHERE id = $1",
            ROUND_COLUMNS
        ))
        .bind(round_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        row.as_ref().map(round_from_row).transpose()
    }

    async fn list_rounds(
        &self,
        user_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<DisputeRound>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM credit_rounds \
             WHERE user_id = $1 AND ($2 OR status <> 'deleted') \
             ORDER BY round_number DESC",
            ROUND_COLUMNS
        ))
        .bind(user_id)
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        rows.iter().map(round_from_row).collect()
    }

    async fn update_round_status(
        &self,
        round_id: Uuid,
        status: RoundStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE credit_rounds SET status = $2, updated_at = now() WHERE id = $1")
            .bind(round_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    async fn mark_round_deleted(
        &self,
        round_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE credit_rounds
            SET status = 'deleted', deleted_at = $2, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(round_id)
        .bind(deleted_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(AppError::StoreError(format!(
                "credit round {} does not exist",
                round_id
            )));
        }
        Ok(())
    }

    async fn save_round_raw(&self, round_id: Uuid, payload: &Value) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO credit_round_raw (credit_round_id, payload)
            VALUES ($1, $2)
            ON CONFLICT (credit_round_id) DO UPDATE SET payload = EXCLUDED.payload
            "#,
        )
        .bind(round_id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    async fn insert_round_tradelines(&self, rows: &[RoundTradeline]) -> Result<(), AppError> {
        for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO credit_round_tradelines \
                 (id, credit_round_id, bureau, creditor, account_number_mask, category, data) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.id)
                    .push_bind(row.credit_round_id)
                    .push_bind(row.bureau.as_str())
                    .push_bind(row.creditor.clone())
                    .push_bind(row.account_number_mask.clone())
                    .push_bind(row.category.as_str())
                    .push_bind(row.data.clone());
            });
            qb.build()
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        }
        Ok(())
    }

    async fn insert_tradeline_history(
        &self,
        rows: &[TradelineHistoryEntry],
    ) -> Result<(), AppError> {
        for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO credit_round_tradeline_history (tradeline_id, month, status) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.tradeline_id)
                    .push_bind(row.month.clone())
                    .push_bind(row.status.clone());
            });
            qb.build()
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        }
        Ok(())
    }

    async fn insert_round_records(
        &self,
        category: RoundChild,
        round_id: Uuid,
        records: &[Value],
    ) -> Result<(), AppError> {
        if category == RoundChild::Tradelines {
            return Err(AppError::InternalError(
                "tradelines are written through insert_round_tradelines".to_string(),
            ));
        }
        for chunk in records.chunks(UPSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (credit_round_id, data) ",
                category.table()
            ));
            qb.push_values(chunk, |mut b, record| {
                b.push_bind(round_id).push_bind(record.clone());
            });
            qb.build()
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        }
        Ok(())
    }

    async fn list_round_tradeline_ids(&self, round_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        sqlx::query_scalar("SELECT id FROM credit_round_tradelines WHERE credit_round_id = $1")
            .bind(round_id)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn delete_tradeline_history(&self, tradeline_ids: &[Uuid]) -> Result<u64, AppError> {
        let result =
            sqlx::query("DELETE FROM credit_round_tradeline_history WHERE tradeline_id = ANY($1)")
                .bind(tradeline_ids)
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected())
    }

    async fn delete_round_children(
        &self,
        category: RoundChild,
        round_id: Uuid,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE credit_round_id = $1",
            category.table()
        ))
        .bind(round_id)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected())
    }

    async fn delete_round_raw(&self, round_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM credit_round_raw WHERE credit_round_id = $1")
            .bind(round_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected())
    }
}

/// Rows strictly after `cursor` in `collected_at DESC NULLS LAST, <key> ASC`
/// order.
fn push_after_cursor(
    qb: &mut QueryBuilder<'_, Postgres>,
    cursor: &PageCursor,
    key_column: &str,
) {
    match cursor.collected_at {
        Some(at) => {
            qb.push(" AND (collected_at < ")
                .push_bind(at)
                .push(" OR collected_at IS NULL OR (collected_at = ")
                .push_bind(at)
                .push(format!(" AND {} > ", key_column))
                .push_bind(cursor.key.clone())
                .push("))");
        }
        None => {
            qb.push(format!(" AND collected_at IS NULL AND {} > ", key_column))
                .push_bind(cursor.key.clone());
        }
    }
}

/// Truncated source dates that do not parse are stored as NULL.
fn date_column(raw: &Option<String>) -> Option<NaiveDate> {
    let raw = raw.as_deref()?;
    let parsed = parse_date(raw);
    if parsed.is_none() {
        tracing::warn!("Unparsable account date '{}' stored as NULL", raw);
    }
    parsed
}

fn decimal_column(raw: &Option<Number>) -> Option<BigDecimal> {
    raw.as_ref()
        .and_then(|n| BigDecimal::from_str(&n.to_string()).ok())
}

fn decimal_value(raw: Option<BigDecimal>) -> Option<Number> {
    raw.and_then(|d| Number::from_str(&d.normalized().to_string()).ok())
}

fn stored_report_from_row(row: &PgRow) -> Result<StoredReport, sqlx::Error> {
    Ok(StoredReport {
        run_id: row.try_get("run_id")?,
        user_id: row.try_get("user_id")?,
        collected_at: row.try_get("collected_at")?,
        version: row.try_get("version")?,
        report: row.try_get("report")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn score_from_row(row: &PgRow) -> Result<NormalizedScore, sqlx::Error> {
    let bureau: String = row.try_get("bureau")?;
    Ok(NormalizedScore {
        user_id: row.try_get("user_id")?,
        run_id: row.try_get("run_id")?,
        bureau: bureau.parse().unwrap_or(Bureau::Unknown),
        score: row.try_get("score")?,
        status: row.try_get("status")?,
        position: row.try_get("position")?,
        collected_at: row.try_get("collected_at")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<NormalizedAccount, sqlx::Error> {
    let category: String = row.try_get("category")?;
    let bureau: String = row.try_get("bureau")?;
    let days_late: Value = row.try_get("days_late")?;
    let date = |column: &str| -> Result<Option<String>, sqlx::Error> {
        let value: Option<NaiveDate> = row.try_get(column)?;
        Ok(value.map(|d| d.format("%Y-%m-%d").to_string()))
    };
    let decimal = |column: &str| -> Result<Option<Number>, sqlx::Error> {
        Ok(decimal_value(row.try_get(column)?))
    };

    Ok(NormalizedAccount {
        user_id: row.try_get("user_id")?,
        run_id: row.try_get("run_id")?,
        account_key: row.try_get("account_key")?,
        collected_at: row.try_get("collected_at")?,
        account: ReportAccount {
            category: category.parse().unwrap_or(AccountCategory::Other),
            bureau: bureau.parse().unwrap_or(Bureau::Unknown),
            creditor: row.try_get("creditor")?,
            account_number_mask: row.try_get("account_number_mask")?,
            account_type: row.try_get("account_type")?,
            opened_on: date("opened_on")?,
            reported_on: date("reported_on")?,
            last_activity_on: date("last_activity_on")?,
            closed_on: date("closed_on")?,
            balance: decimal("balance")?,
            credit_limit: decimal("credit_limit")?,
            high_balance: decimal("high_balance")?,
            past_due: decimal("past_due")?,
            monthly_payment: decimal("monthly_payment")?,
            status: row.try_get("status")?,
            rating: row.try_get("rating")?,
            remarks: row.try_get("remarks")?,
            payment_history: row.try_get("payment_history")?,
            days_late: serde_json::from_value::<LateCounts>(days_late).unwrap_or_default(),
        },
    })
}

fn round_from_row(row: &PgRow) -> Result<DisputeRound, AppError> {
    let status: String = row.try_get("status").map_err(AppError::DatabaseError)?;
    Ok(DisputeRound {
        id: row.try_get("id").map_err(AppError::DatabaseError)?,
        user_id: row.try_get("user_id").map_err(AppError::DatabaseError)?,
        run_id: row.try_get("run_id").map_err(AppError::DatabaseError)?,
        round_number: row.try_get("round_number").map_err(AppError::DatabaseError)?,
        status: status.parse().map_err(AppError::InternalError)?,
        created_at: row.try_get("created_at").map_err(AppError::DatabaseError)?,
        updated_at: row.try_get("updated_at").map_err(AppError::DatabaseError)?,
        deleted_at: row.try_get("deleted_at").map_err(AppError::DatabaseError)?,
    })
}
