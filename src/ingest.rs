// 📄 Statement Ingestor - tabular bank exports → StatementLine candidates
// First row is the header; rows without a parseable date are dropped
// (trailing footer/summary rows are common in bank exports).

use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::db::{StatementLine, StatementStore};

// ============================================================================
// CELLS
// ============================================================================

/// One cell of an imported sheet. CSV input only ever yields `Text`;
/// workbooks also yield `Number` (including serial dates).
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
        }
    }
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => Cell::Number(dt.as_f64()),
        Data::DateTimeIso(s) => Cell::Text(s.clone()),
        Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(_) => Cell::Empty,
    }
}

// ============================================================================
// FILE READERS
// ============================================================================

/// Read a delimited file into raw cells. Unreadable records are skipped,
/// matching the per-row recovery policy of the importer.
pub fn read_csv_rows(path: &Path) -> Result<Vec<Vec<Cell>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let Ok(record) = result else { continue };
        let row = record
            .iter()
            .map(|field| {
                let field = field.trim();
                if field.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(field.to_string())
                }
            })
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

/// Read the first sheet of a workbook (xlsx/xls/ods) into raw cells.
pub fn read_workbook_rows(path: &Path) -> Result<Vec<Vec<Cell>>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| anyhow!("Failed to open workbook {}: {}", path.display(), e))?;

    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("Workbook has no sheets: {}", path.display()))?;

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| anyhow!("Failed to read sheet '{}': {}", sheet, e))?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect();

    Ok(rows)
}

/// Dispatch on extension: workbooks go through calamine, everything else is
/// treated as a delimited file.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<Cell>>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_workbook_rows(path),
        _ => read_csv_rows(path),
    }
}

// ============================================================================
// COLUMN RESOLUTION
// ============================================================================

/// Resolved column indexes for one statement layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub date: usize,
    pub description: usize,
    pub reference: Option<usize>,
    pub debit: usize,
    pub credit: usize,
    pub balance: usize,
}

impl Default for ColumnMap {
    fn default() -> Self {
        // Positional fallback when headers are unrecognizable
        Self {
            date: 0,
            description: 1,
            reference: None,
            debit: 2,
            credit: 3,
            balance: 4,
        }
    }
}

/// Locate columns by header text, case-insensitive substring match.
/// Recognizes English and Indonesian labels; any column that cannot be
/// identified keeps its positional default.
pub fn resolve_columns(header: &[Cell]) -> ColumnMap {
    let mut date = None;
    let mut description = None;
    let mut reference = None;
    let mut debit = None;
    let mut credit = None;
    let mut balance = None;

    for (i, cell) in header.iter().enumerate() {
        let label = cell.as_text().to_lowercase();
        if label.is_empty() {
            continue;
        }

        if date.is_none() && (label.contains("date") || label.contains("tanggal")) {
            date = Some(i);
        } else if description.is_none()
            && (label.contains("desc")
                || label.contains("keterangan")
                || label.contains("uraian"))
        {
            description = Some(i);
        } else if reference.is_none() && label.contains("ref") {
            reference = Some(i);
        } else if debit.is_none() && (label.contains("debit") || label.contains("keluar")) {
            debit = Some(i);
        } else if credit.is_none()
            && (label.contains("credit") || label.contains("kredit") || label.contains("masuk"))
        {
            credit = Some(i);
        } else if balance.is_none() && (label.contains("balance") || label.contains("saldo")) {
            balance = Some(i);
        }
    }

    let defaults = ColumnMap::default();
    ColumnMap {
        date: date.unwrap_or(defaults.date),
        description: description.unwrap_or(defaults.description),
        reference,
        debit: debit.unwrap_or(defaults.debit),
        credit: credit.unwrap_or(defaults.credit),
        balance: balance.unwrap_or(defaults.balance),
    }
}

// ============================================================================
// DATE & AMOUNT PARSING
// ============================================================================

/// Spreadsheet serial day count, offset from the 1899-12-30 epoch used by
/// common spreadsheet formats.
fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=200_000.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial as i64))
}

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    // Bare number in a date column: a serial that survived CSV export
    if !s.contains(['/', '-', '.']) {
        return s.parse::<f64>().ok().and_then(serial_to_date);
    }

    let delim = ['/', '-', '.'].into_iter().find(|d| s.contains(*d))?;
    let parts: Vec<&str> = s.split(delim).map(str::trim).collect();
    if parts.len() != 3 {
        return None;
    }

    let nums: Vec<i64> = parts
        .iter()
        .map(|p| p.parse::<i64>())
        .collect::<Result<_, _>>()
        .ok()?;

    // Leading 4-digit segment means Y-M-D; otherwise assume D-M-Y
    let (year, month, day) = if parts[0].len() == 4 {
        (nums[0], nums[1], nums[2])
    } else {
        (nums[2], nums[1], nums[0])
    };

    let year = if year < 100 { year + 2000 } else { year };
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
}

/// Parse a date cell: serial numbers and `/`-, `-`- or `.`-delimited strings.
pub fn parse_cell_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Empty => None,
        Cell::Number(n) => serial_to_date(*n),
        Cell::Text(s) => parse_date_text(s),
    }
}

/// Parse an amount cell. Strips everything except digits, `.` and `-`;
/// unparseable or empty values become 0.
pub fn parse_cell_amount(cell: &Cell) -> f64 {
    match cell {
        Cell::Empty => 0.0,
        Cell::Number(n) => *n,
        Cell::Text(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse().unwrap_or(0.0)
        }
    }
}

// ============================================================================
// ROW → STATEMENT LINE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ParsedStatement {
    pub lines: Vec<StatementLine>,
    pub skipped_rows: usize,
}

/// Turn raw rows (header + data) into statement line candidates for one
/// bank account. Rows with no parseable date are counted and dropped.
pub fn parse_statement_rows(bank_account_id: &str, rows: &[Vec<Cell>]) -> ParsedStatement {
    let Some((header, data)) = rows.split_first() else {
        return ParsedStatement::default();
    };

    let columns = resolve_columns(header);
    let mut parsed = ParsedStatement::default();

    for row in data {
        let Some(date) = row.get(columns.date).and_then(parse_cell_date) else {
            parsed.skipped_rows += 1;
            continue;
        };

        let description = row
            .get(columns.description)
            .map(|c| c.as_text().trim().to_string())
            .unwrap_or_default();

        let reference = columns
            .reference
            .and_then(|i| row.get(i))
            .map(|c| c.as_text().trim().to_string())
            .filter(|s| !s.is_empty());

        let debit = row.get(columns.debit).map(parse_cell_amount).unwrap_or(0.0);
        let credit = row.get(columns.credit).map(parse_cell_amount).unwrap_or(0.0);
        let balance = row
            .get(columns.balance)
            .map(parse_cell_amount)
            .unwrap_or(0.0);

        parsed.lines.push(StatementLine::new(
            bank_account_id,
            date,
            description,
            reference,
            debit,
            credit,
            balance,
        ));
    }

    parsed
}

// ============================================================================
// IMPORT DRIVER
// ============================================================================

/// Aggregate outcome of one statement import.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Lines actually inserted
    pub imported: usize,
    /// Lines skipped because their content hash already existed
    pub duplicates: usize,
    /// Rows dropped for having no parseable date
    pub skipped_rows: usize,
}

/// Import one statement file for one bank account: read, parse, upsert.
/// Bad rows are dropped; a storage failure aborts the whole import.
pub fn import_statement(
    store: &dyn StatementStore,
    bank_account_id: &str,
    path: &Path,
) -> Result<ImportSummary> {
    let rows = read_rows(path)?;
    let parsed = parse_statement_rows(bank_account_id, &rows);
    let outcome = store.upsert_lines(&parsed.lines)?;

    Ok(ImportSummary {
        imported: outcome.inserted.len(),
        duplicates: outcome.duplicates,
        skipped_rows: parsed.skipped_rows,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BankAccount, ReconciliationStatus, SqliteStore};

    fn text_row(fields: &[&str]) -> Vec<Cell> {
        fields
            .iter()
            .map(|f| {
                if f.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(f.to_string())
                }
            })
            .collect()
    }

    #[test]
    fn test_resolve_columns_english() {
        let header = text_row(&["Date", "Description", "Reference", "Debit", "Credit", "Balance"]);
        let map = resolve_columns(&header);

        assert_eq!(map.date, 0);
        assert_eq!(map.description, 1);
        assert_eq!(map.reference, Some(2));
        assert_eq!(map.debit, 3);
        assert_eq!(map.credit, 4);
        assert_eq!(map.balance, 5);
    }

    #[test]
    fn test_resolve_columns_indonesian() {
        let header = text_row(&["Tanggal", "Uraian", "Keluar", "Masuk", "Saldo"]);
        let map = resolve_columns(&header);

        assert_eq!(map.date, 0);
        assert_eq!(map.description, 1);
        assert_eq!(map.debit, 2);
        assert_eq!(map.credit, 3);
        assert_eq!(map.balance, 4);

        // "Kredit" must land on credit even though it shares letters with debit
        let header = text_row(&["Tanggal Transaksi", "Keterangan", "Debit", "Kredit", "Saldo"]);
        let map = resolve_columns(&header);
        assert_eq!(map.debit, 2);
        assert_eq!(map.credit, 3);
    }

    #[test]
    fn test_resolve_columns_positional_fallback() {
        let header = text_row(&["A", "B", "C", "D", "E"]);
        let map = resolve_columns(&header);
        assert_eq!(map, ColumnMap::default());
    }

    #[test]
    fn test_parse_date_formats() {
        // D-M-Y with slashes (the common bank export layout)
        assert_eq!(
            parse_date_text("01/03/2024"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        // Leading 4-digit year means Y-M-D
        assert_eq!(
            parse_date_text("2024-03-01"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        // Dotted D-M-Y
        assert_eq!(
            parse_date_text("15.08.2024"),
            NaiveDate::from_ymd_opt(2024, 8, 15)
        );
        // Two-digit year
        assert_eq!(
            parse_date_text("01/03/24"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );

        assert_eq!(parse_date_text("bad-date"), None);
        assert_eq!(parse_date_text(""), None);
        assert_eq!(parse_date_text("32/13/2024"), None);
    }

    #[test]
    fn test_parse_serial_date() {
        // 45000 days past the 1899-12-30 epoch
        assert_eq!(
            parse_cell_date(&Cell::Number(45000.0)),
            NaiveDate::from_ymd_opt(2023, 3, 15)
        );
        // Serial that survived a CSV round-trip as text
        assert_eq!(
            parse_cell_date(&Cell::Text("45000".to_string())),
            NaiveDate::from_ymd_opt(2023, 3, 15)
        );
        // Out of plausible range
        assert_eq!(parse_cell_date(&Cell::Number(0.0)), None);
        assert_eq!(parse_cell_date(&Cell::Number(20_240_301.0)), None);
    }

    #[test]
    fn test_parse_amounts() {
        assert_eq!(parse_cell_amount(&Cell::Text("Rp 1,500,000".to_string())), 1_500_000.0);
        assert_eq!(parse_cell_amount(&Cell::Text("-250.75".to_string())), -250.75);
        assert_eq!(parse_cell_amount(&Cell::Number(10_000.0)), 10_000.0);
        assert_eq!(parse_cell_amount(&Cell::Empty), 0.0);
        assert_eq!(parse_cell_amount(&Cell::Text("n/a".to_string())), 0.0);
        // Indonesian thousands separators collapse into an unparseable float
        assert_eq!(parse_cell_amount(&Cell::Text("1.500.000".to_string())), 0.0);
    }

    #[test]
    fn test_parse_statement_rows_drops_undated() {
        let rows = vec![
            text_row(&["Date", "Description", "Debit", "Credit", "Balance"]),
            text_row(&["01/03/2024", "Payment ABC", "", "500000", "1500000"]),
            text_row(&["02/03/2024", "Fee", "10000", "", "1490000"]),
            text_row(&["bad-date", "Junk", "", "", ""]),
        ];

        let parsed = parse_statement_rows("acct-1", &rows);

        assert_eq!(parsed.lines.len(), 2, "footer row must be dropped");
        assert_eq!(parsed.skipped_rows, 1);
        assert!(parsed
            .lines
            .iter()
            .all(|l| l.status == ReconciliationStatus::Unmatched));

        let payment = &parsed.lines[0];
        assert_eq!(payment.description, "Payment ABC");
        assert_eq!(payment.credit_amount, 500_000.0);
        assert_eq!(payment.debit_amount, 0.0);
        assert_eq!(
            payment.transaction_date,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );

        let fee = &parsed.lines[1];
        assert_eq!(fee.debit_amount, 10_000.0);
        assert_eq!(fee.amount(), 10_000.0);
    }

    #[test]
    fn test_import_statement_twice_adds_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let account = BankAccount::new("Operating", "BCA", "1234567890");
        store.insert_bank_account(&account).unwrap();

        let csv_path = std::env::temp_dir().join(format!(
            "rekon-import-test-{}.csv",
            uuid::Uuid::new_v4()
        ));
        std::fs::write(
            &csv_path,
            "Date,Description,Debit,Credit,Balance\n\
             01/03/2024,Payment ABC,,500000,1500000\n\
             02/03/2024,Fee,10000,,1490000\n\
             bad-date,Junk,,,\n",
        )
        .unwrap();

        let first = import_statement(&store, &account.id, &csv_path).unwrap();
        assert_eq!(first.imported, 2);
        assert_eq!(first.duplicates, 0);
        assert_eq!(first.skipped_rows, 1);

        let second = import_statement(&store, &account.id, &csv_path).unwrap();
        assert_eq!(second.imported, 0, "re-import must not create duplicates");
        assert_eq!(second.duplicates, 2);
        assert_eq!(store.line_count(&account.id).unwrap(), 2);

        std::fs::remove_file(&csv_path).ok();
    }
}
