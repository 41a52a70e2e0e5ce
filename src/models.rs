use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============ Extraction Models ============

/// One extraction attempt recorded by the PDF extraction subsystem.
///
/// Read-only to the engine: attempts are never written or deleted here.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionAttempt {
    /// Report the attempt belongs to.
    pub report_id: Uuid,
    /// Text produced by the extractor.
    pub extracted_text: String,
    /// Extractor confidence in `[0, 1]`.
    pub confidence_score: f64,
    /// Extractor tag (e.g. "pdf-text", "ocr").
    pub extraction_method: String,
}

/// Best or merged text for a report, with the confidence it was chosen at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationResult {
    pub text: String,
    pub confidence: f64,
    pub method: String,
}

/// Single-record update written onto the owning report by "save consolidation".
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationUpdate {
    pub raw_text: String,
    pub consolidation_confidence: f64,
    pub consolidation_status: String,
    pub updated_at: DateTime<Utc>,
}

// ============ Canonical Report Graph ============

/// Credit bureau a score or tradeline was reported by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bureau {
    TransUnion,
    Experian,
    Equifax,
    Unknown,
}

impl Bureau {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bureau::TransUnion => "transunion",
            Bureau::Experian => "experian",
            Bureau::Equifax => "equifax",
            Bureau::Unknown => "unknown",
        }
    }

    /// Canonicalises the many spellings scrapers use for the three bureaus.
    pub fn from_source(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "transunion" | "tu" | "tuc" | "trans" => Bureau::TransUnion,
            "experian" | "exp" | "xpn" => Bureau::Experian,
            "equifax" | "eqf" | "efx" | "eqx" => Bureau::Equifax,
            _ => Bureau::Unknown,
        }
    }
}

impl fmt::Display for Bureau {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bureau {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transunion" => Ok(Bureau::TransUnion),
            "experian" => Ok(Bureau::Experian),
            "equifax" => Ok(Bureau::Equifax),
            "unknown" => Ok(Bureau::Unknown),
            other => Err(format!("unknown bureau '{}'", other)),
        }
    }
}

/// Bucket an account was found in within the scraped report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountCategory {
    RealEstate,
    Revolving,
    Other,
}

impl AccountCategory {
    pub const ALL: [AccountCategory; 3] = [
        AccountCategory::RealEstate,
        AccountCategory::Revolving,
        AccountCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountCategory::RealEstate => "realEstate",
            AccountCategory::Revolving => "revolving",
            AccountCategory::Other => "other",
        }
    }
}

impl fmt::Display for AccountCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "realEstate" => Ok(AccountCategory::RealEstate),
            "revolving" => Ok(AccountCategory::Revolving),
            "other" => Ok(AccountCategory::Other),
            other => Err(format!(
                "unknown account category '{}' (expected realEstate, revolving or other)",
                other
            )),
        }
    }
}

/// Times an account was reported 30, 60 and 90 days late.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateCounts {
    #[serde(rename = "30")]
    pub days_30: i64,
    #[serde(rename = "60")]
    pub days_60: i64,
    #[serde(rename = "90")]
    pub days_90: i64,
}

/// A bureau score inside the canonical graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportScore {
    pub bureau: Bureau,
    pub score: Option<i32>,
    pub status: Option<String>,
    /// Index of the score within its bureau's group in the source.
    pub position: i32,
}

/// One tradeline as reported by one bureau in one run.
///
/// Every optional field serializes as an explicit `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAccount {
    pub category: AccountCategory,
    pub bureau: Bureau,
    pub creditor: Option<String>,
    pub account_number_mask: Option<String>,
    pub account_type: Option<String>,
    pub opened_on: Option<String>,
    pub reported_on: Option<String>,
    pub last_activity_on: Option<String>,
    pub closed_on: Option<String>,
    pub balance: Option<Number>,
    pub credit_limit: Option<Number>,
    pub high_balance: Option<Number>,
    pub past_due: Option<Number>,
    pub monthly_payment: Option<Number>,
    pub status: Option<String>,
    pub rating: Option<String>,
    pub remarks: Option<String>,
    pub payment_history: Option<Value>,
    pub days_late: LateCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBuckets {
    pub real_estate: Vec<ReportAccount>,
    pub revolving: Vec<ReportAccount>,
    pub other: Vec<ReportAccount>,
}

impl AccountBuckets {
    pub fn bucket_mut(&mut self, category: AccountCategory) -> &mut Vec<ReportAccount> {
        match category {
            AccountCategory::RealEstate => &mut self.real_estate,
            AccountCategory::Revolving => &mut self.revolving,
            AccountCategory::Other => &mut self.other,
        }
    }

    /// All accounts in bucket order: real estate, revolving, other.
    pub fn flatten(&self) -> impl Iterator<Item = &ReportAccount> {
        self.real_estate
            .iter()
            .chain(self.revolving.iter())
            .chain(self.other.iter())
    }

    pub fn len(&self) -> usize {
        self.real_estate.len() + self.revolving.len() + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical form of one scraper run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedReport {
    pub run_id: String,
    /// Collection timestamp exactly as the scraper sent it.
    pub collected_at: Option<String>,
    pub version: Option<String>,
    pub scores: Vec<ReportScore>,
    pub accounts: AccountBuckets,
}

impl NormalizedReport {
    /// The nested graph stored on the report header row.
    pub fn report_graph(&self) -> Value {
        serde_json::json!({
            "runId": self.run_id,
            "collectedAt": self.collected_at,
            "version": self.version,
            "scores": self.scores,
            "accounts": self.accounts,
        })
    }
}

// ============ Persisted Rows ============

/// One raw scraper payload, keyed by run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRun {
    pub run_id: String,
    pub user_id: Uuid,
    pub payload: Value,
    /// Hex SHA-256 of the serialized payload.
    pub payload_sha256: String,
    pub received_at: DateTime<Utc>,
}

/// Header row of a normalized report. Upserted on `run_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedReportRow {
    pub run_id: String,
    pub user_id: Uuid,
    pub collected_at: Option<DateTime<Utc>>,
    pub collected_at_raw: Option<String>,
    pub version: Option<String>,
    pub report: Value,
}

/// Score row. Unique on `(user_id, run_id, bureau, position)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedScore {
    pub user_id: Uuid,
    pub run_id: String,
    pub bureau: Bureau,
    pub score: Option<i32>,
    pub status: Option<String>,
    pub position: i32,
    pub collected_at: Option<DateTime<Utc>>,
}

/// Flattened account row. Unique on `(user_id, account_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedAccount {
    pub user_id: Uuid,
    pub run_id: String,
    pub account_key: String,
    pub collected_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub account: ReportAccount,
}

/// Latest normalized report for a run, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReport {
    pub run_id: String,
    pub user_id: Uuid,
    pub collected_at: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub report: Value,
    pub updated_at: DateTime<Utc>,
}

// ============ Pagination ============

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 200;

/// Listing parameters as received over HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub category: Option<String>,
    pub limit: Option<i64>,
    /// Opaque `next_cursor` of the previous page.
    pub cursor: Option<String>,
}

impl PageQuery {
    /// Requested limit clamped to `[1, 200]`.
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }
}

/// Position after the last item of a page. Listings are ordered by
/// `collected_at` descending (nulls last), then by a unique key ascending,
/// so the pair never splits rows that share a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub collected_at: Option<DateTime<Utc>>,
    pub key: String,
}

impl PageCursor {
    /// `<rfc3339 timestamp>|<key>`, with an empty timestamp for null.
    pub fn encode(&self) -> String {
        let at = self
            .collected_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true))
            .unwrap_or_default();
        format!("{}|{}", at, self.key)
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let (at, key) = raw
            .split_once('|')
            .ok_or_else(|| format!("malformed cursor '{}'", raw))?;
        let collected_at = if at.is_empty() {
            None
        } else {
            let parsed = DateTime::parse_from_rfc3339(at)
                .map_err(|e| format!("malformed cursor timestamp '{}': {}", at, e))?;
            Some(parsed.with_timezone(&Utc))
        };
        Ok(Self {
            collected_at,
            key: key.to_string(),
        })
    }
}

/// Validated window handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWindow {
    pub cursor: Option<PageCursor>,
    pub limit: i64,
}

impl Default for PageWindow {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Pass back as `cursor` to fetch the next page; absent on the last page.
    pub next_cursor: Option<String>,
}

// ============ Dispute Rounds ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Draft,
    #[serde(alias = "open")]
    Saved,
    Sent,
    Deleted,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Draft => "draft",
            RoundStatus::Saved => "saved",
            RoundStatus::Sent => "sent",
            RoundStatus::Deleted => "deleted",
        }
    }

    /// Position on the forward-only edit path; `None` for `Deleted`.
    pub fn rank(&self) -> Option<u8> {
        match self {
            RoundStatus::Draft => Some(0),
            RoundStatus::Saved => Some(1),
            RoundStatus::Sent => Some(2),
            RoundStatus::Deleted => None,
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(RoundStatus::Draft),
            // "open" is the older spelling of a user-editable saved round
            "saved" | "open" => Ok(RoundStatus::Saved),
            "sent" => Ok(RoundStatus::Sent),
            "deleted" => Ok(RoundStatus::Deleted),
            other => Err(format!("unknown round status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeRound {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Run the round was snapshotted from, if any.
    pub run_id: Option<String>,
    pub round_number: i32,
    pub status: RoundStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Child record categories owned by a round through `credit_round_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoundChild {
    PersonalIdentifiers,
    Addresses,
    Employers,
    Scores,
    Collections,
    PublicRecords,
    Inquiries,
    Tradelines,
}

impl RoundChild {
    /// Cascade order used when a round is deleted. Tradelines go last so
    /// their history can be located first.
    pub const ALL: [RoundChild; 8] = [
        RoundChild::PersonalIdentifiers,
        RoundChild::Addresses,
        RoundChild::Employers,
        RoundChild::Scores,
        RoundChild::Collections,
        RoundChild::PublicRecords,
        RoundChild::Inquiries,
        RoundChild::Tradelines,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            RoundChild::PersonalIdentifiers => "credit_round_personal_identifiers",
            RoundChild::Addresses => "credit_round_addresses",
            RoundChild::Employers => "credit_round_employers",
            RoundChild::Scores => "credit_round_scores",
            RoundChild::Collections => "credit_round_collections",
            RoundChild::PublicRecords => "credit_round_public_records",
            RoundChild::Inquiries => "credit_round_inquiries",
            RoundChild::Tradelines => "credit_round_tradelines",
        }
    }
}

impl fmt::Display for RoundChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Tradeline copied into a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundTradeline {
    pub id: Uuid,
    pub credit_round_id: Uuid,
    pub bureau: Bureau,
    pub creditor: Option<String>,
    pub account_number_mask: Option<String>,
    pub category: AccountCategory,
    pub data: Value,
}

/// One month of a round tradeline's payment history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradelineHistoryEntry {
    pub tradeline_id: Uuid,
    pub month: String,
    pub status: Option<String>,
}

// ============ API Request/Response Models ============

/// Body of `POST /api/v1/runs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRunRequest {
    pub user_id: Uuid,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRunResponse {
    pub run_id: String,
    /// False when the same payload had already been ingested for this run.
    pub payload_changed: bool,
    pub scores: usize,
    pub accounts: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoundRequest {
    pub user_id: Uuid,
    /// When set, the round is populated from this run's report.
    pub run_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoundStatusRequest {
    pub status: RoundStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRoundQuery {
    #[serde(default)]
    pub remove_raw: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRoundsQuery {
    #[serde(default)]
    pub include_deleted: bool,
}
