// Statement store - data model + embedded SQLite implementation
// An in-memory connection satisfies the same contract, so the matching
// engine is testable without a hosted database.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

// ============================================================================
// RECONCILIATION STATUS
// ============================================================================

/// Lifecycle of an imported statement line.
///
/// `unmatched ⇄ needs_review → matched`; `unmatched → recorded` (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// No candidate found, or best candidate below the review threshold
    Unmatched,

    /// Candidate found with mid-band confidence, awaiting human confirmation
    NeedsReview,

    /// Confirmed, by auto-match at high confidence or by a human
    Matched,

    /// A new internal entry was created directly from this line (terminal)
    Recorded,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::NeedsReview => "needs_review",
            Self::Matched => "matched",
            Self::Recorded => "recorded",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "needs_review" => Self::NeedsReview,
            "matched" => Self::Matched,
            "recorded" => Self::Recorded,
            _ => Self::Unmatched,
        }
    }
}

// ============================================================================
// BANK ACCOUNT
// ============================================================================

/// Reference data for one bank account. Created by an admin flow; the
/// reconciliation core only reads it to scope lines and entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: String,
    pub name: String,
    pub bank_name: String,
    pub account_number: String,
}

impl BankAccount {
    pub fn new(name: &str, bank_name: &str, account_number: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            bank_name: bank_name.to_string(),
            account_number: account_number.to_string(),
        }
    }
}

// ============================================================================
// STATEMENT LINE
// ============================================================================

/// One imported bank transaction. Exactly one of debit/credit is normally
/// nonzero. `(bank_account_id, transaction_hash)` is unique, so re-importing
/// the same statement never creates duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementLine {
    pub id: String,
    pub bank_account_id: String,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub debit_amount: f64,
    pub credit_amount: f64,
    pub running_balance: f64,
    pub status: ReconciliationStatus,
    pub matched_entry_id: Option<String>,
    pub notes: Option<String>,
    pub transaction_hash: String,
}

impl StatementLine {
    pub fn new(
        bank_account_id: &str,
        transaction_date: NaiveDate,
        description: String,
        reference: Option<String>,
        debit_amount: f64,
        credit_amount: f64,
        running_balance: f64,
    ) -> Self {
        let transaction_hash = compute_transaction_hash(
            bank_account_id,
            transaction_date,
            &description,
            reference.as_deref(),
            debit_amount,
            credit_amount,
        );

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            bank_account_id: bank_account_id.to_string(),
            transaction_date,
            description,
            reference,
            debit_amount,
            credit_amount,
            running_balance,
            status: ReconciliationStatus::Unmatched,
            matched_entry_id: None,
            notes: None,
            transaction_hash,
        }
    }

    /// The nonzero side of the line (debit wins if both are set).
    pub fn amount(&self) -> f64 {
        if self.debit_amount != 0.0 {
            self.debit_amount
        } else {
            self.credit_amount
        }
    }

    pub fn is_linked(&self) -> bool {
        self.matched_entry_id.is_some()
    }
}

/// Content hash for duplicate detection on import.
/// NOTE: this is for DEDUPLICATION, not identity - identity is the row id.
pub fn compute_transaction_hash(
    bank_account_id: &str,
    transaction_date: NaiveDate,
    description: &str,
    reference: Option<&str>,
    debit_amount: f64,
    credit_amount: f64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}|{}|{:.2}|{:.2}",
        bank_account_id,
        transaction_date,
        description,
        reference.unwrap_or(""),
        debit_amount,
        credit_amount,
    ));
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// LEDGER ENTRY
// ============================================================================

/// An internal ledger entry (payment or receipt recorded in the books) -
/// the other side of every match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub bank_account_id: String,
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub amount: f64,
    pub reconciled: bool,
}

impl LedgerEntry {
    pub fn new(
        bank_account_id: &str,
        entry_date: NaiveDate,
        description: &str,
        amount: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            bank_account_id: bank_account_id.to_string(),
            entry_date,
            description: description.to_string(),
            reference: None,
            amount,
            reconciled: false,
        }
    }

    pub fn with_reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// Result of an upsert: the lines actually inserted, plus how many were
/// silently skipped because their hash already existed for the account.
#[derive(Debug, Clone, Default)]
pub struct UpsertOutcome {
    pub inserted: Vec<StatementLine>,
    pub duplicates: usize,
}

/// The persistence contract the reconciliation core needs. `SqliteStore`
/// implements it over an embedded database; a hosted backend can satisfy
/// the same interface.
pub trait StatementStore {
    /// Insert lines, skipping any whose `(bank_account_id, transaction_hash)`
    /// already exists. Duplicates are not an error.
    fn upsert_lines(&self, lines: &[StatementLine]) -> Result<UpsertOutcome>;

    /// Lines for one account, newest transaction date first. `range` bounds
    /// are inclusive.
    fn lines_for_account(
        &self,
        bank_account_id: &str,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<StatementLine>>;

    fn get_line(&self, line_id: &str) -> Result<Option<StatementLine>>;

    /// Set a line's status and match link in one step. Refuses to store a
    /// `matched`/`needs_review` line without a linked entry.
    fn update_line_status(
        &self,
        line_id: &str,
        status: ReconciliationStatus,
        matched_entry_id: Option<&str>,
    ) -> Result<()>;

    /// Ledger entries still available as match candidates: not flagged
    /// reconciled, and not claimed by any line in a non-unmatched status.
    fn unreconciled_entries(&self, bank_account_id: &str) -> Result<Vec<LedgerEntry>>;
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let store = Self { conn };
        store.setup()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self { conn };
        store.setup()?;
        Ok(store)
    }

    fn setup(&self) -> Result<()> {
        // WAL mode for crash recovery
        self.conn.pragma_update(None, "journal_mode", "WAL")?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS bank_accounts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                bank_name TEXT NOT NULL,
                account_number TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS statement_lines (
                id TEXT PRIMARY KEY,
                bank_account_id TEXT NOT NULL,
                transaction_date TEXT NOT NULL,
                description TEXT NOT NULL,
                reference TEXT,
                debit_amount REAL NOT NULL,
                credit_amount REAL NOT NULL,
                running_balance REAL NOT NULL,
                reconciliation_status TEXT NOT NULL DEFAULT 'unmatched',
                matched_entry_id TEXT,
                notes TEXT,
                transaction_hash TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(bank_account_id, transaction_hash)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                id TEXT PRIMARY KEY,
                bank_account_id TEXT NOT NULL,
                entry_date TEXT NOT NULL,
                description TEXT NOT NULL,
                reference TEXT,
                amount REAL NOT NULL,
                reconciled INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_lines_account
             ON statement_lines(bank_account_id, transaction_date)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_lines_status
             ON statement_lines(reconciliation_status)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_account
             ON ledger_entries(bank_account_id, reconciled)",
            [],
        )?;

        Ok(())
    }

    pub fn insert_bank_account(&self, account: &BankAccount) -> Result<()> {
        self.conn.execute(
            "INSERT INTO bank_accounts (id, name, bank_name, account_number)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                account.id,
                account.name,
                account.bank_name,
                account.account_number
            ],
        )?;
        Ok(())
    }

    pub fn bank_accounts(&self) -> Result<Vec<BankAccount>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, bank_name, account_number FROM bank_accounts ORDER BY name",
        )?;

        let accounts = stmt
            .query_map([], |row| {
                Ok(BankAccount {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    bank_name: row.get(2)?,
                    account_number: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    pub fn get_bank_account(&self, id: &str) -> Result<Option<BankAccount>> {
        let account = self
            .conn
            .query_row(
                "SELECT id, name, bank_name, account_number FROM bank_accounts WHERE id = ?1",
                params![id],
                |row| {
                    Ok(BankAccount {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        bank_name: row.get(2)?,
                        account_number: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(account)
    }

    pub fn insert_entries(&self, entries: &[LedgerEntry]) -> Result<usize> {
        let mut inserted = 0;

        for entry in entries {
            self.conn.execute(
                "INSERT INTO ledger_entries (
                    id, bank_account_id, entry_date, description, reference, amount, reconciled
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.id,
                    entry.bank_account_id,
                    entry.entry_date.to_string(),
                    entry.description,
                    entry.reference,
                    entry.amount,
                    entry.reconciled as i64,
                ],
            )?;
            inserted += 1;
        }

        Ok(inserted)
    }

    pub fn get_entry(&self, entry_id: &str) -> Result<Option<LedgerEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT id, bank_account_id, entry_date, description, reference, amount, reconciled
                 FROM ledger_entries WHERE id = ?1",
                params![entry_id],
                map_entry,
            )
            .optional()?;

        Ok(entry)
    }

    pub fn line_count(&self, bank_account_id: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM statement_lines WHERE bank_account_id = ?1",
            params![bank_account_id],
            |row| row.get(0),
        )?;

        Ok(count)
    }
}

fn map_line(row: &rusqlite::Row) -> rusqlite::Result<StatementLine> {
    let date_str: String = row.get(2)?;
    let status_str: String = row.get(8)?;

    Ok(StatementLine {
        id: row.get(0)?,
        bank_account_id: row.get(1)?,
        transaction_date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        description: row.get(3)?,
        reference: row.get(4)?,
        debit_amount: row.get(5)?,
        credit_amount: row.get(6)?,
        running_balance: row.get(7)?,
        status: ReconciliationStatus::parse(&status_str),
        matched_entry_id: row.get(9)?,
        notes: row.get(10)?,
        transaction_hash: row.get(11)?,
    })
}

fn map_entry(row: &rusqlite::Row) -> rusqlite::Result<LedgerEntry> {
    let date_str: String = row.get(2)?;
    let reconciled: i64 = row.get(6)?;

    Ok(LedgerEntry {
        id: row.get(0)?,
        bank_account_id: row.get(1)?,
        entry_date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        description: row.get(3)?,
        reference: row.get(4)?,
        amount: row.get(5)?,
        reconciled: reconciled != 0,
    })
}

const LINE_COLUMNS: &str = "id, bank_account_id, transaction_date, description, reference,
    debit_amount, credit_amount, running_balance, reconciliation_status,
    matched_entry_id, notes, transaction_hash";

impl StatementStore for SqliteStore {
    fn upsert_lines(&self, lines: &[StatementLine]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();

        for line in lines {
            let result = self.conn.execute(
                "INSERT INTO statement_lines (
                    id, bank_account_id, transaction_date, description, reference,
                    debit_amount, credit_amount, running_balance,
                    reconciliation_status, matched_entry_id, notes, transaction_hash
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    line.id,
                    line.bank_account_id,
                    line.transaction_date.to_string(),
                    line.description,
                    line.reference,
                    line.debit_amount,
                    line.credit_amount,
                    line.running_balance,
                    line.status.as_str(),
                    line.matched_entry_id,
                    line.notes,
                    line.transaction_hash,
                ],
            );

            match result {
                Ok(_) => outcome.inserted.push(line.clone()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    outcome.duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(outcome)
    }

    fn lines_for_account(
        &self,
        bank_account_id: &str,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<StatementLine>> {
        let lines = match range {
            Some((from, to)) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {LINE_COLUMNS} FROM statement_lines
                     WHERE bank_account_id = ?1
                       AND transaction_date BETWEEN ?2 AND ?3
                     ORDER BY transaction_date DESC, id"
                ))?;

                let rows = stmt.query_map(
                    params![bank_account_id, from.to_string(), to.to_string()],
                    map_line,
                )?
                .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {LINE_COLUMNS} FROM statement_lines
                     WHERE bank_account_id = ?1
                     ORDER BY transaction_date DESC, id"
                ))?;

                let rows = stmt.query_map(params![bank_account_id], map_line)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        Ok(lines)
    }

    fn get_line(&self, line_id: &str) -> Result<Option<StatementLine>> {
        let line = self
            .conn
            .query_row(
                &format!("SELECT {LINE_COLUMNS} FROM statement_lines WHERE id = ?1"),
                params![line_id],
                map_line,
            )
            .optional()?;

        Ok(line)
    }

    fn update_line_status(
        &self,
        line_id: &str,
        status: ReconciliationStatus,
        matched_entry_id: Option<&str>,
    ) -> Result<()> {
        // A matched or suggested line must always carry its entry link
        if matched_entry_id.is_none()
            && matches!(
                status,
                ReconciliationStatus::Matched | ReconciliationStatus::NeedsReview
            )
        {
            bail!(
                "refusing to set status '{}' without a matched entry",
                status.as_str()
            );
        }

        let updated = self.conn.execute(
            "UPDATE statement_lines
             SET reconciliation_status = ?2, matched_entry_id = ?3
             WHERE id = ?1",
            params![line_id, status.as_str(), matched_entry_id],
        )?;

        if updated == 0 {
            bail!("statement line not found: {}", line_id);
        }

        Ok(())
    }

    fn unreconciled_entries(&self, bank_account_id: &str) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, bank_account_id, entry_date, description, reference, amount, reconciled
             FROM ledger_entries
             WHERE bank_account_id = ?1
               AND reconciled = 0
               AND id NOT IN (
                   SELECT matched_entry_id FROM statement_lines
                   WHERE bank_account_id = ?1
                     AND matched_entry_id IS NOT NULL
                     AND reconciliation_status != 'unmatched'
               )
             ORDER BY entry_date DESC, id",
        )?;

        let entries = stmt
            .query_map(params![bank_account_id], map_entry)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_account(store: &SqliteStore) -> BankAccount {
        let account = BankAccount::new("Operating", "BCA", "1234567890");
        store.insert_bank_account(&account).unwrap();
        account
    }

    fn test_line(account_id: &str, day: u32, description: &str, credit: f64) -> StatementLine {
        StatementLine::new(
            account_id,
            date(2024, 3, day),
            description.to_string(),
            None,
            0.0,
            credit,
            0.0,
        )
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let account = test_account(&store);

        let lines = vec![
            test_line(&account.id, 1, "Payment ABC", 500_000.0),
            test_line(&account.id, 2, "Transfer DEF", 250_000.0),
            test_line(&account.id, 3, "Fee", 10_000.0),
        ];

        let first = store.upsert_lines(&lines).unwrap();
        assert_eq!(first.inserted.len(), 3);
        assert_eq!(first.duplicates, 0);

        // Re-import of the same content: new ids, same hashes
        let again: Vec<StatementLine> = lines
            .iter()
            .map(|l| {
                StatementLine::new(
                    &l.bank_account_id,
                    l.transaction_date,
                    l.description.clone(),
                    l.reference.clone(),
                    l.debit_amount,
                    l.credit_amount,
                    l.running_balance,
                )
            })
            .collect();

        let second = store.upsert_lines(&again).unwrap();
        assert_eq!(second.inserted.len(), 0, "second import should insert nothing");
        assert_eq!(second.duplicates, 3);
        assert_eq!(store.line_count(&account.id).unwrap(), 3);
    }

    #[test]
    fn test_transaction_hash_is_stable() {
        let a = compute_transaction_hash("acct", date(2024, 3, 1), "Payment", None, 0.0, 500.0);
        let b = compute_transaction_hash("acct", date(2024, 3, 1), "Payment", None, 0.0, 500.0);
        let c = compute_transaction_hash("acct", date(2024, 3, 2), "Payment", None, 0.0, 500.0);

        assert_eq!(a, b, "same content should produce same hash");
        assert_ne!(a, c, "different date should change the hash");
        assert_eq!(a.len(), 64, "SHA-256 hash should be 64 hex characters");
    }

    #[test]
    fn test_lines_ordered_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let account = test_account(&store);

        let lines = vec![
            test_line(&account.id, 5, "middle", 1.0),
            test_line(&account.id, 9, "newest", 2.0),
            test_line(&account.id, 1, "oldest", 3.0),
        ];
        store.upsert_lines(&lines).unwrap();

        let loaded = store.lines_for_account(&account.id, None).unwrap();
        assert_eq!(loaded[0].description, "newest");
        assert_eq!(loaded[2].description, "oldest");

        let bounded = store
            .lines_for_account(&account.id, Some((date(2024, 3, 2), date(2024, 3, 9))))
            .unwrap();
        assert_eq!(bounded.len(), 2);
        assert!(bounded.iter().all(|l| l.description != "oldest"));
    }

    #[test]
    fn test_update_status_guards_missing_link() {
        let store = SqliteStore::open_in_memory().unwrap();
        let account = test_account(&store);

        let line = test_line(&account.id, 1, "Payment", 500.0);
        store.upsert_lines(&[line.clone()]).unwrap();

        let err = store.update_line_status(&line.id, ReconciliationStatus::Matched, None);
        assert!(err.is_err(), "matched with no entry link must be rejected");

        store
            .update_line_status(&line.id, ReconciliationStatus::Matched, Some("entry-1"))
            .unwrap();
        let loaded = store.get_line(&line.id).unwrap().unwrap();
        assert_eq!(loaded.status, ReconciliationStatus::Matched);
        assert_eq!(loaded.matched_entry_id.as_deref(), Some("entry-1"));
    }

    #[test]
    fn test_unreconciled_entries_exclude_claimed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let account = test_account(&store);

        let open = LedgerEntry::new(&account.id, date(2024, 3, 1), "Open invoice", 100.0);
        let claimed = LedgerEntry::new(&account.id, date(2024, 3, 2), "Claimed invoice", 200.0);
        let mut settled =
            LedgerEntry::new(&account.id, date(2024, 3, 3), "Settled long ago", 300.0);
        settled.reconciled = true;
        store
            .insert_entries(&[open.clone(), claimed.clone(), settled])
            .unwrap();

        let line = test_line(&account.id, 2, "Claimed invoice", 200.0);
        store.upsert_lines(&[line.clone()]).unwrap();
        store
            .update_line_status(&line.id, ReconciliationStatus::NeedsReview, Some(&claimed.id))
            .unwrap();

        let available = store.unreconciled_entries(&account.id).unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, open.id);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ReconciliationStatus::Unmatched,
            ReconciliationStatus::NeedsReview,
            ReconciliationStatus::Matched,
            ReconciliationStatus::Recorded,
        ] {
            assert_eq!(ReconciliationStatus::parse(status.as_str()), status);
        }

        // Unknown strings fall back to unmatched
        assert_eq!(
            ReconciliationStatus::parse("garbage"),
            ReconciliationStatus::Unmatched
        );
    }
}
