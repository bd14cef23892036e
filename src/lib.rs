// Rekon - Bank Statement Reconciliation Core
// Exposes all modules for use in the CLI, API server, and tests

pub mod db;
pub mod ingest;
pub mod matcher;
pub mod reconcile;

// Re-export commonly used types
pub use db::{
    compute_transaction_hash, BankAccount, LedgerEntry, ReconciliationStatus, SqliteStore,
    StatementLine, StatementStore, UpsertOutcome,
};
pub use ingest::{
    import_statement, parse_cell_amount, parse_cell_date, parse_statement_rows, read_rows,
    Cell, ColumnMap, ImportSummary, ParsedStatement,
};
pub use matcher::{text_similarity, MatchCandidate, MatchEngine, MatchOutcome};
pub use reconcile::{
    confirm_match, filter_by_status, record_line, reject_match, summarize,
    ReconciliationSummary, StatusFilter,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
