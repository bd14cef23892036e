// Rekon CLI - import bank statements, run auto-match, review the result

use anyhow::{bail, Result};
use std::env;
use std::path::{Path, PathBuf};

use rekon::{
    confirm_match, filter_by_status, import_statement, reject_match, summarize, BankAccount,
    MatchEngine, SqliteStore, StatementStore, StatusFilter,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let Some(command) = args.get(1) else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "init" => run_init(),
        "account" => run_account(&args[2..]),
        "accounts" => run_accounts(),
        "import" => run_import(&args[2..]),
        "match" => run_match(&args[2..]),
        "confirm" => run_confirm(&args[2..]),
        "reject" => run_reject(&args[2..]),
        "status" => run_status(&args[2..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("rekon {} - bank statement reconciliation", rekon::VERSION);
    println!();
    println!("Usage:");
    println!("  rekon init                                  create the database");
    println!("  rekon account <name> <bank> <number>        register a bank account");
    println!("  rekon accounts                              list bank accounts");
    println!("  rekon import <account-id> <file>            import a statement (csv/xlsx)");
    println!("  rekon match <account-id>                    run auto-match");
    println!("  rekon confirm <line-id>                     accept a suggested match");
    println!("  rekon reject <line-id>                      reset a line to unmatched");
    println!("  rekon status <account-id> [filter]          reconciliation report");
    println!();
    println!("Database path comes from REKON_DB (default: rekon.db)");
}

fn db_path() -> PathBuf {
    PathBuf::from(env::var("REKON_DB").unwrap_or_else(|_| "rekon.db".to_string()))
}

fn open_store() -> Result<SqliteStore> {
    SqliteStore::open(&db_path())
}

fn run_init() -> Result<()> {
    let path = db_path();
    SqliteStore::open(&path)?;
    println!("✓ Database initialized: {}", path.display());
    Ok(())
}

fn run_account(args: &[String]) -> Result<()> {
    let [name, bank, number] = args else {
        bail!("usage: rekon account <name> <bank> <number>");
    };

    let store = open_store()?;
    let account = BankAccount::new(name, bank, number);
    store.insert_bank_account(&account)?;

    println!("✓ Registered account '{}' ({})", account.name, account.id);
    Ok(())
}

fn run_accounts() -> Result<()> {
    let store = open_store()?;
    let accounts = store.bank_accounts()?;

    if accounts.is_empty() {
        println!("No bank accounts registered yet.");
        return Ok(());
    }

    for account in accounts {
        println!(
            "{}  {} / {} / {}",
            account.id, account.name, account.bank_name, account.account_number
        );
    }
    Ok(())
}

fn run_import(args: &[String]) -> Result<()> {
    let [account_id, file] = args else {
        bail!("usage: rekon import <account-id> <file>");
    };

    let store = open_store()?;
    require_account(&store, account_id)?;

    let summary = import_statement(&store, account_id, Path::new(file))?;

    println!("✓ Imported: {} lines", summary.imported);
    println!("✓ Skipped duplicates: {}", summary.duplicates);
    if summary.skipped_rows > 0 {
        println!("✓ Dropped rows without a date: {}", summary.skipped_rows);
    }
    Ok(())
}

fn run_match(args: &[String]) -> Result<()> {
    let [account_id] = args else {
        bail!("usage: rekon match <account-id>");
    };

    let store = open_store()?;
    require_account(&store, account_id)?;

    let outcome = MatchEngine::new().auto_match(&store, account_id)?;

    println!("✓ Auto-matched: {}", outcome.matched_count);
    println!("✓ Suggested for review: {}", outcome.suggested_count);
    println!("✓ Skipped (already settled): {}", outcome.skipped_count);
    Ok(())
}

fn run_confirm(args: &[String]) -> Result<()> {
    let [line_id] = args else {
        bail!("usage: rekon confirm <line-id>");
    };

    let store = open_store()?;
    let line = confirm_match(&store, line_id)?;

    println!(
        "✓ Confirmed {} -> entry {}",
        line.id,
        line.matched_entry_id.as_deref().unwrap_or("-")
    );
    Ok(())
}

fn run_reject(args: &[String]) -> Result<()> {
    let [line_id] = args else {
        bail!("usage: rekon reject <line-id>");
    };

    let store = open_store()?;
    let line = reject_match(&store, line_id)?;

    println!("✓ Reset {} to {}", line.id, line.status.as_str());
    Ok(())
}

fn run_status(args: &[String]) -> Result<()> {
    let Some(account_id) = args.first() else {
        bail!("usage: rekon status <account-id> [all|unlinked|<status>]");
    };

    let store = open_store()?;
    let account = require_account(&store, account_id)?;
    let lines = store.lines_for_account(account_id, None)?;
    let counts = summarize(&lines);

    println!("Account: {} ({})", account.name, account.bank_name);
    println!("{}", counts.summary());

    if let Some(filter) = args.get(1) {
        let filter = StatusFilter::parse(filter);
        println!();
        for line in filter_by_status(&lines, filter) {
            println!(
                "{}  {}  {:>15.2}  {:<12}  {}",
                line.id,
                line.transaction_date,
                line.amount(),
                line.status.as_str(),
                line.description
            );
        }
    }
    Ok(())
}

fn require_account(store: &SqliteStore, account_id: &str) -> Result<BankAccount> {
    match store.get_bank_account(account_id)? {
        Some(account) => Ok(account),
        None => bail!("bank account not found: {}", account_id),
    }
}
