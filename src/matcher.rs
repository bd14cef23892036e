// 🔍 Match Engine - pair statement lines with internal ledger entries
// Amount must match exactly; dates more than a week apart never match.
// Local equivalent of the server-side auto_match_smart routine.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::db::{LedgerEntry, ReconciliationStatus, StatementLine, StatementStore};

/// Amount comparisons on parsed floats
const AMOUNT_EPSILON: f64 = 0.001;

// ============================================================================
// MATCH CANDIDATE
// ============================================================================

/// A proposed pairing between a statement line and a ledger entry,
/// with the signals that produced its confidence score. Transient -
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub line_id: String,
    pub entry_id: String,
    pub confidence: f64,
    pub amount_delta: f64,
    pub date_delta_days: i64,
    pub text_similarity: f64,
}

/// Aggregate outcome of one auto-match pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Lines auto-matched at high confidence
    pub matched_count: usize,
    /// Lines given a tentative match awaiting review
    pub suggested_count: usize,
    /// Lines already matched or recorded, left untouched
    pub skipped_count: usize,
}

// ============================================================================
// DESCRIPTION SIMILARITY
// ============================================================================

/// Normalized text similarity in [0, 1]:
/// 1.0 when equal after lowercasing/trimming, 0.8 when one side contains
/// the other, otherwise the fraction of shared words over the larger
/// word count.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return 0.8;
    }

    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let larger = words_a.len().max(words_b.len());
    if larger == 0 {
        return 0.0;
    }

    let common = words_a.intersection(&words_b).count();
    common as f64 / larger as f64
}

// ============================================================================
// MATCH ENGINE
// ============================================================================

pub struct MatchEngine {
    /// Hard date window in days; beyond it a pair can never match
    pub date_tolerance_days: i64,

    /// Confidence at or above which a line is auto-matched
    pub match_threshold: f64,

    /// Confidence at or above which a match is suggested for review
    pub review_threshold: f64,
}

impl MatchEngine {
    pub fn new() -> Self {
        MatchEngine {
            date_tolerance_days: 7,
            match_threshold: 0.85,
            review_threshold: 0.70,
        }
    }

    pub fn with_thresholds(match_threshold: f64, review_threshold: f64) -> Self {
        MatchEngine {
            date_tolerance_days: 7,
            match_threshold,
            review_threshold,
        }
    }

    /// Score one line/entry pair. Returns None when the pair is ineligible:
    /// amount differs, the line has no amount, or the dates are more than
    /// `date_tolerance_days` apart.
    pub fn score(&self, line: &StatementLine, entry: &LedgerEntry) -> Option<MatchCandidate> {
        let line_amount = line.amount();
        if line_amount == 0.0 {
            return None;
        }

        let amount_delta = (line_amount - entry.amount).abs();
        if amount_delta > AMOUNT_EPSILON {
            return None;
        }

        let date_delta_days = (line.transaction_date - entry.entry_date).num_days().abs();
        if date_delta_days > self.date_tolerance_days {
            return None;
        }

        let text = text_similarity(&line.description, &entry.description);
        let date_score = 1.0 - date_delta_days as f64 / (self.date_tolerance_days as f64 + 1.0);

        // Weighted combination: amount 40%, date 30%, description 30%.
        // Amount contributes its full weight because candidates are already
        // filtered on exact equality.
        let confidence = 0.4 + 0.3 * date_score + 0.3 * text;

        Some(MatchCandidate {
            line_id: line.id.clone(),
            entry_id: entry.id.clone(),
            confidence,
            amount_delta,
            date_delta_days,
            text_similarity: text,
        })
    }

    /// Band a confidence score into a statement-line status.
    pub fn classify(&self, confidence: f64) -> ReconciliationStatus {
        if confidence >= self.match_threshold {
            ReconciliationStatus::Matched
        } else if confidence >= self.review_threshold {
            ReconciliationStatus::NeedsReview
        } else {
            ReconciliationStatus::Unmatched
        }
    }

    /// Run one matching pass over an account.
    ///
    /// Lines already `matched`/`recorded` are skipped; lines already
    /// `needs_review` keep their tentative match untouched. Remaining
    /// unmatched lines are scored against every unclaimed ledger entry and
    /// claims are made greedily in score order, so an entry is never
    /// assigned to two lines. Re-running the pass is idempotent.
    pub fn auto_match(
        &self,
        store: &dyn StatementStore,
        bank_account_id: &str,
    ) -> Result<MatchOutcome> {
        let lines = store.lines_for_account(bank_account_id, None)?;
        let entries = store.unreconciled_entries(bank_account_id)?;

        let mut outcome = MatchOutcome::default();
        let mut open_lines = Vec::new();

        for line in &lines {
            match line.status {
                ReconciliationStatus::Matched | ReconciliationStatus::Recorded => {
                    outcome.skipped_count += 1;
                }
                ReconciliationStatus::NeedsReview => {
                    // Keeps its suggestion until confirmed or rejected
                }
                ReconciliationStatus::Unmatched => open_lines.push(line),
            }
        }

        let mut candidates = Vec::new();
        for line in &open_lines {
            for entry in &entries {
                if let Some(candidate) = self.score(line, entry) {
                    if candidate.confidence >= self.review_threshold {
                        candidates.push(candidate);
                    }
                }
            }
        }

        // Best scores claim first; each line and entry at most once
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });

        let mut claimed_lines: HashSet<&str> = HashSet::new();
        let mut claimed_entries: HashSet<&str> = HashSet::new();

        for candidate in &candidates {
            if claimed_lines.contains(candidate.line_id.as_str())
                || claimed_entries.contains(candidate.entry_id.as_str())
            {
                continue;
            }

            let status = self.classify(candidate.confidence);
            store.update_line_status(&candidate.line_id, status, Some(&candidate.entry_id))?;

            claimed_lines.insert(&candidate.line_id);
            claimed_entries.insert(&candidate.entry_id);

            match status {
                ReconciliationStatus::Matched => outcome.matched_count += 1,
                ReconciliationStatus::NeedsReview => outcome.suggested_count += 1,
                _ => {}
            }
        }

        Ok(outcome)
    }
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
