// Reconciliation state controller - apply user decisions to statement lines
// and derive filtered views / dashboard counts from a loaded line set.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::db::{ReconciliationStatus, StatementLine, StatementStore};

// ============================================================================
// USER DECISIONS
// ============================================================================

/// Accept a suggested match. Requires the line to be `needs_review` (or
/// already `matched`, making confirmation idempotent) and to carry a
/// tentative entry link.
pub fn confirm_match(store: &dyn StatementStore, line_id: &str) -> Result<StatementLine> {
    let line = store
        .get_line(line_id)?
        .with_context(|| format!("statement line not found: {}", line_id))?;

    match line.status {
        ReconciliationStatus::NeedsReview | ReconciliationStatus::Matched => {}
        other => bail!("cannot confirm a line in status '{}'", other.as_str()),
    }

    let entry_id = line
        .matched_entry_id
        .clone()
        .context("line has no suggested entry to confirm")?;

    store.update_line_status(line_id, ReconciliationStatus::Matched, Some(&entry_id))?;

    store
        .get_line(line_id)?
        .with_context(|| format!("statement line vanished: {}", line_id))
}

/// Reject a suggested or confirmed match: the line returns to `unmatched`
/// with its entry link cleared, so a later auto-match pass (or a manually
/// created entry) can pick it up again. `recorded` is terminal and cannot
/// be rejected.
pub fn reject_match(store: &dyn StatementStore, line_id: &str) -> Result<StatementLine> {
    let line = store
        .get_line(line_id)?
        .with_context(|| format!("statement line not found: {}", line_id))?;

    if line.status == ReconciliationStatus::Recorded {
        bail!("cannot reject a recorded line");
    }

    store.update_line_status(line_id, ReconciliationStatus::Unmatched, None)?;

    store
        .get_line(line_id)?
        .with_context(|| format!("statement line vanished: {}", line_id))
}

/// Mark a line `recorded` after a new internal entry was created directly
/// from it. Only an `unmatched` line can be recorded; the transition is
/// terminal.
pub fn record_line(
    store: &dyn StatementStore,
    line_id: &str,
    entry_id: &str,
) -> Result<StatementLine> {
    let line = store
        .get_line(line_id)?
        .with_context(|| format!("statement line not found: {}", line_id))?;

    if line.status != ReconciliationStatus::Unmatched {
        bail!(
            "only an unmatched line can be recorded, found '{}'",
            line.status.as_str()
        );
    }

    store.update_line_status(line_id, ReconciliationStatus::Recorded, Some(entry_id))?;

    store
        .get_line(line_id)?
        .with_context(|| format!("statement line vanished: {}", line_id))
}

// ============================================================================
// FILTERED VIEWS
// ============================================================================

/// View selector over a loaded line set. `Unlinked` means no entry link,
/// regardless of status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Unlinked,
    Status(ReconciliationStatus),
}

impl StatusFilter {
    pub fn parse(s: &str) -> Self {
        match s {
            "all" => Self::All,
            "unlinked" => Self::Unlinked,
            other => Self::Status(ReconciliationStatus::parse(other)),
        }
    }
}

/// Pure filter over an already-loaded line slice.
pub fn filter_by_status(lines: &[StatementLine], filter: StatusFilter) -> Vec<StatementLine> {
    lines
        .iter()
        .filter(|line| match filter {
            StatusFilter::All => true,
            StatusFilter::Unlinked => line.matched_entry_id.is_none(),
            StatusFilter::Status(status) => line.status == status,
        })
        .cloned()
        .collect()
}

// ============================================================================
// SUMMARY
// ============================================================================

/// Per-status counts over a loaded line set, for dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub total: usize,
    pub unmatched: usize,
    pub needs_review: usize,
    pub matched: usize,
    pub recorded: usize,
    pub unlinked: usize,
}

impl ReconciliationSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} lines: {} matched, {} need review, {} unmatched, {} recorded ({} unlinked)",
            self.total, self.matched, self.needs_review, self.unmatched, self.recorded,
            self.unlinked
        )
    }
}

/// Single pass over the loaded lines; never re-queries the store.
pub fn summarize(lines: &[StatementLine]) -> ReconciliationSummary {
    let mut counts = ReconciliationSummary {
        total: lines.len(),
        ..Default::default()
    };

    for line in lines {
        match line.status {
            ReconciliationStatus::Unmatched => counts.unmatched += 1,
            ReconciliationStatus::NeedsReview => counts.needs_review += 1,
            ReconciliationStatus::Matched => counts.matched += 1,
            ReconciliationStatus::Recorded => counts.recorded += 1,
        }
        if line.matched_entry_id.is_none() {
            counts.unlinked += 1;
        }
    }

    counts
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BankAccount, LedgerEntry, SqliteStore};
    use chrono::NaiveDate;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn setup() -> (SqliteStore, BankAccount) {
        let store = SqliteStore::open_in_memory().unwrap();
        let account = BankAccount::new("Operating", "BCA", "1234567890");
        store.insert_bank_account(&account).unwrap();
        (store, account)
    }

    fn insert_line(store: &SqliteStore, account_id: &str, d: u32, desc: &str) -> StatementLine {
        let line = StatementLine::new(
            account_id,
            date(d),
            desc.to_string(),
            None,
            0.0,
            100_000.0,
            0.0,
        );
        store.upsert_lines(&[line.clone()]).unwrap();
        line
    }

    fn suggest(store: &SqliteStore, account_id: &str, line: &StatementLine) -> LedgerEntry {
        let entry = LedgerEntry::new(account_id, line.transaction_date, "entry", 100_000.0);
        store.insert_entries(&[entry.clone()]).unwrap();
        store
            .update_line_status(&line.id, ReconciliationStatus::NeedsReview, Some(&entry.id))
            .unwrap();
        entry
    }

    #[test]
    fn test_confirm_is_idempotent() {
        let (store, account) = setup();
        let line = insert_line(&store, &account.id, 1, "Payment ABC");
        let entry = suggest(&store, &account.id, &line);

        let once = confirm_match(&store, &line.id).unwrap();
        assert_eq!(once.status, ReconciliationStatus::Matched);
        assert_eq!(once.matched_entry_id.as_deref(), Some(entry.id.as_str()));

        let twice = confirm_match(&store, &line.id).unwrap();
        assert_eq!(twice.status, ReconciliationStatus::Matched);
        assert_eq!(twice.matched_entry_id.as_deref(), Some(entry.id.as_str()));
    }

    #[test]
    fn test_confirm_requires_suggestion() {
        let (store, account) = setup();
        let line = insert_line(&store, &account.id, 1, "Payment ABC");

        // Still unmatched: nothing to confirm
        assert!(confirm_match(&store, &line.id).is_err());
    }

    #[test]
    fn test_reject_resets_cleanly() {
        let (store, account) = setup();

        // From needs_review
        let suggested = insert_line(&store, &account.id, 1, "Payment ABC");
        suggest(&store, &account.id, &suggested);
        let reset = reject_match(&store, &suggested.id).unwrap();
        assert_eq!(reset.status, ReconciliationStatus::Unmatched);
        assert!(reset.matched_entry_id.is_none());

        // From matched
        let confirmed = insert_line(&store, &account.id, 2, "Transfer DEF");
        suggest(&store, &account.id, &confirmed);
        confirm_match(&store, &confirmed.id).unwrap();
        let reset = reject_match(&store, &confirmed.id).unwrap();
        assert_eq!(reset.status, ReconciliationStatus::Unmatched);
        assert!(reset.matched_entry_id.is_none());

        // From unmatched: a no-op reset
        let plain = insert_line(&store, &account.id, 3, "Fee");
        let reset = reject_match(&store, &plain.id).unwrap();
        assert_eq!(reset.status, ReconciliationStatus::Unmatched);
    }

    #[test]
    fn test_recorded_is_terminal() {
        let (store, account) = setup();
        let line = insert_line(&store, &account.id, 1, "Cash deposit");
        let entry = LedgerEntry::new(&account.id, date(1), "Cash deposit", 100_000.0);
        store.insert_entries(&[entry.clone()]).unwrap();

        let recorded = record_line(&store, &line.id, &entry.id).unwrap();
        assert_eq!(recorded.status, ReconciliationStatus::Recorded);
        assert_eq!(recorded.matched_entry_id.as_deref(), Some(entry.id.as_str()));

        assert!(reject_match(&store, &line.id).is_err());
        assert!(confirm_match(&store, &line.id).is_err());
        assert!(record_line(&store, &line.id, &entry.id).is_err());
    }

    #[test]
    fn test_record_requires_unmatched() {
        let (store, account) = setup();
        let line = insert_line(&store, &account.id, 1, "Payment ABC");
        let entry = suggest(&store, &account.id, &line);

        assert!(record_line(&store, &line.id, &entry.id).is_err());
    }

    #[test]
    fn test_filter_by_status() {
        let (store, account) = setup();

        let unmatched = insert_line(&store, &account.id, 1, "one");
        let reviewed = insert_line(&store, &account.id, 2, "two");
        suggest(&store, &account.id, &reviewed);
        let confirmed = insert_line(&store, &account.id, 3, "three");
        suggest(&store, &account.id, &confirmed);
        confirm_match(&store, &confirmed.id).unwrap();

        let lines = store.lines_for_account(&account.id, None).unwrap();

        assert_eq!(filter_by_status(&lines, StatusFilter::All).len(), 3);

        let unlinked = filter_by_status(&lines, StatusFilter::Unlinked);
        assert_eq!(unlinked.len(), 1);
        assert_eq!(unlinked[0].id, unmatched.id);

        let review = filter_by_status(
            &lines,
            StatusFilter::parse("needs_review"),
        );
        assert_eq!(review.len(), 1);
        assert_eq!(review[0].id, reviewed.id);

        assert_eq!(
            filter_by_status(&lines, StatusFilter::parse("matched")).len(),
            1
        );
    }

    #[test]
    fn test_summarize_counts() {
        let (store, account) = setup();

        insert_line(&store, &account.id, 1, "one");
        let reviewed = insert_line(&store, &account.id, 2, "two");
        suggest(&store, &account.id, &reviewed);
        let confirmed = insert_line(&store, &account.id, 3, "three");
        suggest(&store, &account.id, &confirmed);
        confirm_match(&store, &confirmed.id).unwrap();

        let lines = store.lines_for_account(&account.id, None).unwrap();
        let counts = summarize(&lines);

        assert_eq!(counts.total, 3);
        assert_eq!(counts.unmatched, 1);
        assert_eq!(counts.needs_review, 1);
        assert_eq!(counts.matched, 1);
        assert_eq!(counts.recorded, 0);
        assert_eq!(counts.unlinked, 1);

        println!("✅ {}", counts.summary());
    }
}
