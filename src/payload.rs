//! Schema-tolerant access to scraped report payloads.
//!
//! Scraper output changes shape between versions and after partial
//! failures, so every lookup here takes a list of accepted spellings and
//! falls back to an explicit default (`None` or an empty slice). Field
//! aliases live in [`keys`] so the tolerated shapes are listed in one place.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

/// Accepted spellings for every field the normalizer reads.
pub mod keys {
    pub const RUN_ID: &[&str] = &["runId", "run_id", "id"];
    pub const COLLECTED_AT: &[&str] = &["collectedAt", "collected_at", "timestamp"];
    pub const VERSION: &[&str] = &["version", "schemaVersion", "schema_version"];
    pub const REPORT: &[&str] = &["report", "data"];

    pub const SCORES: &[&str] = &["scores", "creditScores", "credit_scores"];
    pub const SCORE_VALUE: &[&str] = &["score", "value"];
    pub const SCORE_STATUS: &[&str] = &["status", "rating", "scoreStatus"];
    pub const BUREAU: &[&str] = &["bureau", "source", "agency"];

    pub const ACCOUNTS: &[&str] = &["accounts", "tradelines"];
    pub const REAL_ESTATE: &[&str] = &["realEstate", "real_estate", "mortgage"];
    pub const REVOLVING: &[&str] = &["revolving", "revolvingAccounts", "revolving_accounts"];
    pub const OTHER: &[&str] = &["other", "otherAccounts", "other_accounts", "installment"];

    pub const CREDITOR: &[&str] = &["creditor", "creditorName", "creditor_name", "name"];
    pub const ACCOUNT_NUMBER: &[&str] = &[
        "accountNumber",
        "account_number",
        "accountNumberMask",
        "account_number_mask",
    ];
    pub const ACCOUNT_TYPE: &[&str] = &["accountType", "account_type", "type"];
    pub const OPENED: &[&str] = &["dateOpened", "openedDate", "opened_on", "openedOn", "date_opened"];
    pub const REPORTED: &[&str] = &[
        "dateReported",
        "reportedDate",
        "reported_on",
        "reportedOn",
        "date_reported",
    ];
    pub const LAST_ACTIVITY: &[&str] = &[
        "lastActivity",
        "lastActivityDate",
        "last_activity_on",
        "lastActivityOn",
        "date_last_active",
    ];
    pub const CLOSED: &[&str] = &["dateClosed", "closedDate", "closed_on", "closedOn", "date_closed"];
    pub const BALANCE: &[&str] = &["balance", "currentBalance", "current_balance"];
    pub const CREDIT_LIMIT: &[&str] = &["creditLimit", "credit_limit", "limit"];
    pub const HIGH_BALANCE: &[&str] = &["highBalance", "high_balance", "highCredit", "high_credit"];
    pub const PAST_DUE: &[&str] = &["pastDue", "past_due", "amountPastDue"];
    pub const MONTHLY_PAYMENT: &[&str] = &["monthlyPayment", "monthly_payment", "payment"];
    pub const ACCOUNT_STATUS: &[&str] = &["accountStatus", "account_status", "status"];
    pub const RATING: &[&str] = &["paymentStatus", "payment_status", "rating"];
    pub const REMARKS: &[&str] = &["remarks", "comments", "comment"];
    pub const PAYMENT_HISTORY: &[&str] = &[
        "paymentHistory",
        "payment_history",
        "twoYearHistory",
        "two_year_history",
    ];
    pub const DAYS_LATE: &[&str] = &["daysLate", "days_late", "lateCounts", "late_counts"];
    pub const LATE_30: &[&str] = &["30", "days30", "late30"];
    pub const LATE_60: &[&str] = &["60", "days60", "late60"];
    pub const LATE_90: &[&str] = &["90", "days90", "late90"];

    pub const HISTORY_MONTH: &[&str] = &["month", "date", "period"];
    pub const HISTORY_STATUS: &[&str] = &["status", "code", "value"];

    pub const PERSONAL_IDENTIFIERS: &[&str] = &[
        "personalInformation",
        "personal_information",
        "personalIdentifiers",
        "personal",
    ];
    pub const ADDRESSES: &[&str] = &["addresses"];
    pub const EMPLOYERS: &[&str] = &["employers", "employment"];
    pub const COLLECTIONS: &[&str] = &["collections"];
    pub const PUBLIC_RECORDS: &[&str] = &["publicRecords", "public_records"];
    pub const INQUIRIES: &[&str] = &["inquiries"];
}

/// Read-only view over one (possibly absent) JSON object.
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    value: Option<&'a Value>,
}

impl<'a> Fields<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { value: Some(value) }
    }

    pub fn missing() -> Self {
        Self { value: None }
    }

    pub fn is_object(&self) -> bool {
        matches!(self.value, Some(Value::Object(_)))
    }

    pub fn as_value(&self) -> Option<&'a Value> {
        self.value
    }

    /// First alias present with a non-null value.
    pub fn raw(&self, aliases: &[&str]) -> Option<&'a Value> {
        let map = self.value?.as_object()?;
        aliases
            .iter()
            .filter_map(|key| map.get(*key))
            .find(|v| !v.is_null())
    }

    /// Non-blank string; numbers and booleans are rendered as text.
    pub fn str(&self, aliases: &[&str]) -> Option<String> {
        match self.raw(aliases)? {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Integer from a JSON number or a plain numeric string.
    pub fn int(&self, aliases: &[&str]) -> Option<i64> {
        match self.raw(aliases)? {
            Value::Number(n) => number_to_i64(n),
            Value::String(s) => s.trim().parse::<Number>().ok().and_then(|n| number_to_i64(&n)),
            _ => None,
        }
    }

    /// Numeric value passed through as-is. Strings are accepted only when
    /// they are already plain numbers; no currency parsing happens here.
    pub fn number(&self, aliases: &[&str]) -> Option<Number> {
        match self.raw(aliases)? {
            Value::Number(n) => Some(n.clone()),
            Value::String(s) => s.trim().parse::<Number>().ok(),
            _ => None,
        }
    }

    /// Date truncated to its first ten characters.
    pub fn date(&self, aliases: &[&str]) -> Option<String> {
        match self.raw(aliases)? {
            Value::String(s) => truncate_date(s),
            _ => None,
        }
    }

    pub fn object(&self, aliases: &[&str]) -> Fields<'a> {
        match self.raw(aliases) {
            Some(v @ Value::Object(_)) => Fields::new(v),
            _ => Fields::missing(),
        }
    }

    pub fn array(&self, aliases: &[&str]) -> &'a [Value] {
        self.raw(aliases)
            .and_then(|v| v.as_array())
            .map(|items| items.as_slice())
            .unwrap_or(&[])
    }
}

fn number_to_i64(n: &Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

/// Keeps the date part of an ISO-8601 value (its first ten characters).
pub fn truncate_date(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(10).collect())
}

/// Parses a truncated date for a `DATE` column. ISO first, then US format.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

/// Parses a collection timestamp: RFC 3339, a naive ISO timestamp taken as
/// UTC, or a bare date at midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    parse_date(trimmed)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Hex SHA-256 of the compact JSON rendering of a payload.
pub fn fingerprint(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
