//! Picks or merges the best text among competing extraction attempts.

use chrono::Utc;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{ConsolidationResult, ConsolidationUpdate, ExtractionAttempt};
use crate::store::ReportStore;

pub const MERGED_METHOD: &str = "merged";
const MERGE_SEPARATOR: &str = "\n\n";

/// When merging is attempted and how many attempts it may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    /// Top texts shorter than this (in characters) get continuations appended.
    pub min_chars: usize,
    /// Attempts considered in total, the top one included.
    pub max_attempts: usize,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            min_chars: 1000,
            max_attempts: 3,
        }
    }
}

/// Decides whether a candidate text adds nothing to what was accumulated.
pub trait DuplicateDetector: Send + Sync {
    fn is_duplicate(&self, accumulated: &str, candidate: &str) -> bool;
}

/// Lower-cased whitespace tokens; a candidate is a duplicate when more than
/// `threshold` of its tokens already occur in the accumulated text.
#[derive(Debug, Clone, Copy)]
pub struct TokenOverlap {
    pub threshold: f64,
}

impl Default for TokenOverlap {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl DuplicateDetector for TokenOverlap {
    fn is_duplicate(&self, accumulated: &str, candidate: &str) -> bool {
        let seen: HashSet<String> = tokens(accumulated).collect();
        let candidate: Vec<String> = tokens(candidate).collect();
        if candidate.is_empty() {
            return true;
        }
        let repeated = candidate.iter().filter(|t| seen.contains(*t)).count();
        (repeated as f64 / candidate.len() as f64) > self.threshold
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(|t| t.to_lowercase())
}

/// Attempts sorted by confidence, highest first. Stable, so equal scores
/// keep their recorded order.
pub fn rank_attempts(mut attempts: Vec<ExtractionAttempt>) -> Vec<ExtractionAttempt> {
    attempts.sort_by(|a, b| {
        b.confidence_score
            .partial_cmp(&a.confidence_score)
            .unwrap_or(Ordering::Equal)
    });
    attempts
}

/// Result of merging ranked attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub text: String,
    /// Number of lower-confidence attempts appended to the top text.
    pub appended: usize,
}

/// Starts from the top attempt and, while it is short, appends up to
/// `max_attempts - 1` further attempts that are not duplicates of the text
/// accumulated so far. `ranked` must already be in confidence order.
pub fn merge_ranked(
    ranked: &[ExtractionAttempt],
    policy: MergePolicy,
    detector: &dyn DuplicateDetector,
) -> MergeOutcome {
    let Some(top) = ranked.first() else {
        return MergeOutcome {
            text: String::new(),
            appended: 0,
        };
    };

    let mut text = top.extracted_text.clone();
    let mut appended = 0;

    if text.chars().count() >= policy.min_chars || ranked.len() < 2 {
        return MergeOutcome { text, appended };
    }

    let extra = policy.max_attempts.saturating_sub(1);
    for candidate in ranked.iter().skip(1).take(extra) {
        if detector.is_duplicate(&text, &candidate.extracted_text) {
            tracing::debug!(
                "Skipping {} extraction (confidence {:.2}) as duplicate",
                candidate.extraction_method,
                candidate.confidence_score
            );
            continue;
        }
        text.push_str(MERGE_SEPARATOR);
        text.push_str(&candidate.extracted_text);
        appended += 1;
    }

    MergeOutcome { text, appended }
}

/// Extraction selector over the attempts held by a [`ReportStore`].
#[derive(Clone)]
pub struct ExtractionSelector {
    store: Arc<dyn ReportStore>,
    policy: MergePolicy,
    detector: Arc<dyn DuplicateDetector>,
}

impl ExtractionSelector {
    pub fn new(store: Arc<dyn ReportStore>, policy: MergePolicy) -> Self {
        Self::with_detector(store, policy, Arc::new(TokenOverlap::default()))
    }

    pub fn with_detector(
        store: Arc<dyn ReportStore>,
        policy: MergePolicy,
        detector: Arc<dyn DuplicateDetector>,
    ) -> Self {
        Self {
            store,
            policy,
            detector,
        }
    }

    async fn ranked(&self, report_id: Uuid) -> Result<Vec<ExtractionAttempt>, AppError> {
        let attempts = self.store.list_extraction_attempts(report_id).await?;
        Ok(rank_attempts(attempts))
    }

    /// Highest-confidence attempt, or `None` when no attempts exist.
    pub async fn select_best(
        &self,
        report_id: Uuid,
    ) -> Result<Option<ConsolidationResult>, AppError> {
        let ranked = self.ranked(report_id).await?;
        Ok(ranked.into_iter().next().map(|top| ConsolidationResult {
            text: top.extracted_text,
            confidence: clamp_confidence(top.confidence_score),
            method: top.extraction_method,
        }))
    }

    /// Merged text; empty when no attempts exist.
    pub async fn merge(&self, report_id: Uuid) -> Result<String, AppError> {
        let ranked = self.ranked(report_id).await?;
        Ok(merge_ranked(&ranked, self.policy, self.detector.as_ref()).text)
    }

    /// Merged text together with the top confidence. The method is the top
    /// attempt's unless something was appended.
    pub async fn consolidate(
        &self,
        report_id: Uuid,
    ) -> Result<Option<ConsolidationResult>, AppError> {
        let ranked = self.ranked(report_id).await?;
        let Some(top) = ranked.first() else {
            return Ok(None);
        };

        let outcome = merge_ranked(&ranked, self.policy, self.detector.as_ref());
        let method = if outcome.appended > 0 {
            MERGED_METHOD.to_string()
        } else {
            top.extraction_method.clone()
        };

        tracing::info!(
            "Consolidated report {} from {} attempt(s): {} appended, method {}",
            report_id,
            ranked.len(),
            outcome.appended,
            method
        );

        Ok(Some(ConsolidationResult {
            text: outcome.text,
            confidence: clamp_confidence(top.confidence_score),
            method,
        }))
    }

    /// Writes the consolidated text onto the owning report. Store errors are
    /// returned as-is, without retry.
    pub async fn persist_consolidation(
        &self,
        report_id: Uuid,
        text: &str,
        confidence: f64,
        status: &str,
    ) -> Result<(), AppError> {
        let update = ConsolidationUpdate {
            raw_text: text.to_string(),
            consolidation_confidence: clamp_confidence(confidence),
            consolidation_status: status.to_string(),
            updated_at: Utc::now(),
        };
        self.store.save_consolidation(report_id, &update).await?;
        tracing::info!(
            "Saved consolidation for report {} (confidence {:.2}, status {})",
            report_id,
            update.consolidation_confidence,
            status
        );
        Ok(())
    }

    /// `consolidate` followed by `persist_consolidation`.
    pub async fn consolidate_and_persist(
        &self,
        report_id: Uuid,
    ) -> Result<Option<ConsolidationResult>, AppError> {
        let Some(result) = self.consolidate(report_id).await? else {
            tracing::info!("No extraction attempts for report {}", report_id);
            return Ok(None);
        };
        let status = if result.method == MERGED_METHOD {
            "merged"
        } else {
            "consolidated"
        };
        self.persist_consolidation(report_id, &result.text, result.confidence, status)
            .await?;
        Ok(Some(result))
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(text: &str, confidence: f64, method: &str) -> ExtractionAttempt {
        ExtractionAttempt {
            report_id: Uuid::nil(),
            extracted_text: text.to_string(),
            confidence_score: confidence,
            extraction_method: method.to_string(),
        }
    }

    fn short_base() -> String {
        // 900 characters of repeated tokens
        "AAAA ".repeat(180)
    }

    #[test]
    fn ranking_is_descending_and_stable() {
        let ranked = rank_attempts(vec![
            attempt("a", 0.4, "first"),
            attempt("b", 0.9, "second"),
            attempt("c", 0.9, "third"),
        ]);
        let methods: Vec<_> = ranked.iter().map(|a| a.extraction_method.as_str()).collect();
        assert_eq!(methods, vec!["second", "third", "first"]);
    }

    #[test]
    fn appends_new_content_and_drops_duplicates() {
        let base = short_base();
        assert_eq!(base.chars().count(), 900);
        let ranked = rank_attempts(vec![
            attempt(&base, 0.9, "pdf"),
            attempt("AAAA plus BBBB new info", 0.5, "ocr"),
            attempt(&base, 0.2, "ocr-retry"),
        ]);

        let outcome = merge_ranked(&ranked, MergePolicy::default(), &TokenOverlap::default());
        assert!(outcome.text.starts_with(&base));
        assert!(outcome.text.ends_with("AAAA plus BBBB new info"));
        assert_eq!(outcome.appended, 1);
        assert_eq!(
            outcome.text.chars().count(),
            900 + MERGE_SEPARATOR.len() + "AAAA plus BBBB new info".len()
        );
    }

    #[test]
    fn long_top_text_is_returned_untouched() {
        let long = "word ".repeat(200);
        let ranked = vec![
            attempt(&long, 0.8, "pdf"),
            attempt("entirely different content here", 0.7, "ocr"),
        ];
        let outcome = merge_ranked(&ranked, MergePolicy::default(), &TokenOverlap::default());
        assert_eq!(outcome.text, long);
        assert_eq!(outcome.appended, 0);
    }

    #[test]
    fn considers_at_most_max_attempts() {
        let ranked = vec![
            attempt("alpha", 0.9, "a"),
            attempt("beta", 0.8, "b"),
            attempt("gamma", 0.7, "c"),
            attempt("delta", 0.6, "d"),
        ];
        let outcome = merge_ranked(&ranked, MergePolicy::default(), &TokenOverlap::default());
        assert_eq!(outcome.text, "alpha\n\nbeta\n\ngamma");
    }

    #[test]
    fn empty_attempts_merge_to_empty_text() {
        let outcome = merge_ranked(&[], MergePolicy::default(), &TokenOverlap::default());
        assert_eq!(outcome.text, "");
    }

    #[test]
    fn overlap_threshold_is_strictly_greater_than_half() {
        let detector = TokenOverlap::default();
        // exactly half of the candidate's tokens seen: kept
        assert!(!detector.is_duplicate("one two", "one three"));
        // two of three seen: duplicate
        assert!(detector.is_duplicate("one two", "One TWO three"));
        assert!(detector.is_duplicate("anything", "   "));
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }
}
