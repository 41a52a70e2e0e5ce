//! Maps one raw scraper payload onto the canonical report graph.
//!
//! Only the top level is validated: the payload must be an object carrying
//! a run id. Anything below that degrades to `null`/empty instead of failing.

use serde_json::Value;
use std::collections::HashMap;

use crate::errors::AppError;
use crate::models::{
    AccountBuckets, AccountCategory, Bureau, LateCounts, NormalizedReport, ReportAccount,
    ReportScore,
};
use crate::payload::{keys, Fields};

pub fn normalize(raw: &Value) -> Result<NormalizedReport, AppError> {
    if !raw.is_object() {
        return Err(AppError::BadRequest(
            "report payload must be a JSON object".to_string(),
        ));
    }

    let root = Fields::new(raw);
    let run_id = root
        .str(keys::RUN_ID)
        .ok_or_else(|| AppError::BadRequest("report payload is missing runId".to_string()))?;

    // Newer scraper versions nest the report body under `report`.
    let nested = root.object(keys::REPORT);
    let body = if nested.is_object() { nested } else { root };

    let scores = extract_scores(body.raw(keys::SCORES));
    let accounts = extract_accounts(body.object(keys::ACCOUNTS));

    tracing::debug!(
        "Normalized run {}: {} scores, {} accounts ({} real estate, {} revolving, {} other)",
        run_id,
        scores.len(),
        accounts.len(),
        accounts.real_estate.len(),
        accounts.revolving.len(),
        accounts.other.len()
    );

    Ok(NormalizedReport {
        run_id,
        collected_at: root.str(keys::COLLECTED_AT),
        version: root.str(keys::VERSION),
        scores,
        accounts,
    })
}

/// Scores arrive either as a list of `{bureau, score, status}` objects or as
/// an object keyed by bureau. Positions count per bureau in source order.
fn extract_scores(node: Option<&Value>) -> Vec<ReportScore> {
    let mut positions: HashMap<Bureau, i32> = HashMap::new();
    let mut scores = Vec::new();

    let mut push = |bureau: Bureau, entry: &Value| {
        let position = positions.entry(bureau).or_insert(0);
        scores.push(score_entry(bureau, entry, *position));
        *position += 1;
    };

    match node {
        Some(Value::Array(items)) => {
            for item in items.iter().filter(|v| !v.is_null()) {
                let bureau = Fields::new(item)
                    .str(keys::BUREAU)
                    .map(|b| Bureau::from_source(&b))
                    .unwrap_or(Bureau::Unknown);
                push(bureau, item);
            }
        }
        Some(Value::Object(by_bureau)) => {
            for (name, entry) in by_bureau {
                let bureau = Bureau::from_source(name);
                match entry {
                    Value::Array(items) => items.iter().for_each(|item| push(bureau, item)),
                    Value::Null => {}
                    other => push(bureau, other),
                }
            }
        }
        _ => {}
    }

    scores
}

fn score_entry(bureau: Bureau, entry: &Value, position: i32) -> ReportScore {
    let (score, status) = match entry {
        Value::Object(_) => {
            let fields = Fields::new(entry);
            (
                fields.int(keys::SCORE_VALUE),
                fields.str(keys::SCORE_STATUS),
            )
        }
        // A bare number or numeric string is the score itself.
        bare => {
            let wrapped = serde_json::json!({ "score": bare });
            (Fields::new(&wrapped).int(keys::SCORE_VALUE), None)
        }
    };

    ReportScore {
        bureau,
        score: score.and_then(|s| i32::try_from(s).ok()),
        status,
        position,
    }
}

fn extract_accounts(accounts: Fields<'_>) -> AccountBuckets {
    let mut buckets = AccountBuckets::default();

    for category in AccountCategory::ALL {
        let aliases = match category {
            AccountCategory::RealEstate => keys::REAL_ESTATE,
            AccountCategory::Revolving => keys::REVOLVING,
            AccountCategory::Other => keys::OTHER,
        };
        let bucket = buckets.bucket_mut(category);
        for item in accounts.array(aliases) {
            if !item.is_object() {
                tracing::debug!("Skipping non-object {} account entry", category);
                continue;
            }
            bucket.push(normalize_account(Fields::new(item), category));
        }
    }

    buckets
}

fn normalize_account(fields: Fields<'_>, category: AccountCategory) -> ReportAccount {
    let late = fields.object(keys::DAYS_LATE);

    ReportAccount {
        category,
        bureau: fields
            .str(keys::BUREAU)
            .map(|b| Bureau::from_source(&b))
            .unwrap_or(Bureau::Unknown),
        creditor: fields.str(keys::CREDITOR),
        account_number_mask: fields.str(keys::ACCOUNT_NUMBER),
        account_type: fields.str(keys::ACCOUNT_TYPE),
        opened_on: fields.date(keys::OPENED),
        reported_on: fields.date(keys::REPORTED),
        last_activity_on: fields.date(keys::LAST_ACTIVITY),
        closed_on: fields.date(keys::CLOSED),
        balance: fields.number(keys::BALANCE),
        credit_limit: fields.number(keys::CREDIT_LIMIT),
        high_balance: fields.number(keys::HIGH_BALANCE),
        past_due: fields.number(keys::PAST_DUE),
        monthly_payment: fields.number(keys::MONTHLY_PAYMENT),
        status: fields.str(keys::ACCOUNT_STATUS),
        rating: fields.str(keys::RATING),
        remarks: fields.str(keys::REMARKS),
        payment_history: fields.raw(keys::PAYMENT_HISTORY).cloned(),
        days_late: LateCounts {
            days_30: late.int(keys::LATE_30).unwrap_or(0),
            days_60: late.int(keys::LATE_60).unwrap_or(0),
            days_90: late.int(keys::LATE_90).unwrap_or(0),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "runId": "run-42",
            "collectedAt": "2024-06-01T08:15:00Z",
            "version": "v3",
            "scores": [
                {"bureau": "TransUnion", "score": 701, "status": "fair"},
                {"bureau": "Experian", "score": "688"},
                {"bureau": "TransUnion", "score": 705}
            ],
            "accounts": {
                "realEstate": [
                    {"bureau": "Equifax", "creditor": "HOME LOANS", "dateOpened": "2015-04-20T00:00:00Z"}
                ],
                "revolving": [
                    {"bureau": "TU", "creditor": "CARD CO", "accountNumber": "4111****", "daysLate": {"30": 2}},
                    {"bureau": "Experian", "creditor": "STORE CARD", "dateOpened": null}
                ],
                "other": [
                    {"creditor": "AUTO FIN", "balance": 9800.25, "paymentHistory": {"2024-01": "OK"}}
                ]
            }
        })
    }

    #[test]
    fn flattens_all_three_buckets() {
        let report = normalize(&sample_payload()).unwrap();
        assert_eq!(report.accounts.real_estate.len(), 1);
        assert_eq!(report.accounts.revolving.len(), 2);
        assert_eq!(report.accounts.other.len(), 1);
        assert_eq!(report.accounts.flatten().count(), 4);
    }

    #[test]
    fn metadata_is_carried_verbatim() {
        let report = normalize(&sample_payload()).unwrap();
        assert_eq!(report.run_id, "run-42");
        assert_eq!(report.collected_at.as_deref(), Some("2024-06-01T08:15:00Z"));
        assert_eq!(report.version.as_deref(), Some("v3"));
    }

    #[test]
    fn score_positions_count_per_bureau() {
        let report = normalize(&sample_payload()).unwrap();
        let positions: Vec<(Bureau, i32, Option<i32>)> = report
            .scores
            .iter()
            .map(|s| (s.bureau, s.position, s.score))
            .collect();
        assert_eq!(
            positions,
            vec![
                (Bureau::TransUnion, 0, Some(701)),
                (Bureau::Experian, 0, Some(688)),
                (Bureau::TransUnion, 1, Some(705)),
            ]
        );
    }

    #[test]
    fn scores_keyed_by_bureau_are_accepted() {
        let payload = json!({
            "runId": "r",
            "scores": {"equifax": [640, {"score": 650, "status": "ok"}], "experian": {"score": 700}}
        });
        let report = normalize(&payload).unwrap();
        let equifax: Vec<_> = report
            .scores
            .iter()
            .filter(|s| s.bureau == Bureau::Equifax)
            .collect();
        assert_eq!(equifax.len(), 2);
        assert_eq!(equifax[0].score, Some(640));
        assert_eq!(equifax[1].position, 1);
        assert_eq!(equifax[1].status.as_deref(), Some("ok"));
    }

    #[test]
    fn missing_nested_fields_become_nulls() {
        let report = normalize(&sample_payload()).unwrap();
        let store_card = &report.accounts.revolving[1];
        assert_eq!(store_card.opened_on, None);
        assert_eq!(store_card.balance, None);
        assert_eq!(store_card.payment_history, None);
        assert_eq!(store_card.days_late, LateCounts::default());

        let serialized = serde_json::to_value(store_card).unwrap();
        let object = serialized.as_object().unwrap();
        assert!(object.contains_key("openedOn"));
        assert!(object["openedOn"].is_null());
        assert!(object["paymentHistory"].is_null());
    }

    #[test]
    fn dates_are_truncated_and_buckets_default_to_zero() {
        let report = normalize(&sample_payload()).unwrap();
        assert_eq!(
            report.accounts.real_estate[0].opened_on.as_deref(),
            Some("2015-04-20")
        );
        let card = &report.accounts.revolving[0];
        assert_eq!(card.bureau, Bureau::TransUnion);
        assert_eq!(card.days_late.days_30, 2);
        assert_eq!(card.days_late.days_60, 0);
        assert_eq!(card.days_late.days_90, 0);
    }

    #[test]
    fn nested_report_body_is_supported() {
        let payload = json!({
            "run_id": "nested-1",
            "report": {"accounts": {"other": [{"creditor": "X"}]}}
        });
        let report = normalize(&payload).unwrap();
        assert_eq!(report.run_id, "nested-1");
        assert_eq!(report.accounts.other.len(), 1);
        assert_eq!(report.accounts.other[0].bureau, Bureau::Unknown);
    }

    #[test]
    fn malformed_top_level_fails() {
        let not_object = normalize(&json!(["runId"])).unwrap_err();
        assert!(not_object.is_validation());

        let missing_run = normalize(&json!({"scores": []})).unwrap_err();
        assert!(missing_run.is_validation());
        assert!(missing_run.to_string().contains("runId"));
    }

    #[test]
    fn garbage_nested_shapes_do_not_fail() {
        let payload = json!({
            "runId": 77,
            "scores": "unavailable",
            "accounts": {"revolving": [1, "x", null, {"creditor": "OK"}], "other": {"bad": true}}
        });
        let report = normalize(&payload).unwrap();
        assert_eq!(report.run_id, "77");
        assert!(report.scores.is_empty());
        assert_eq!(report.accounts.len(), 1);
    }
}
