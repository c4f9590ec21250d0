use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use libmirrorcast::types::{IdMapping, RunRecord};
use libmirrorcast::{Config, Database, PinState};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "mirror-state")]
#[command(version, about = "Inspect the local mirroring state")]
#[command(long_about = r#"Inspect the local mirroring state: pinned-post state, id mappings and run history.

EXAMPLES:
    # Every configured account
    mirror-state

    # One account, more history
    mirror-state --account alice --limit 50

    # JSON output for scripting
    mirror-state --format json | jq '.[] | .pin'

    # JSONL output (one account per line)
    mirror-state --format jsonl

OUTPUT FORMATS:
    text  - Human-readable summary per account (default)
    json  - JSON array
    jsonl - JSON lines, one account per line

EXIT CODES:
    0 - Success (including accounts with no state)
    1 - Error (database not found, query failed, etc.)
"#)]
struct Args {
    /// Configuration file (default: $MIRRORCAST_CONFIG or ~/.config/mirrorcast/config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Only show this account
    #[arg(short, long, value_name = "NAME")]
    account: Option<String>,

    /// Mappings and runs to show per account
    #[arg(short, long, default_value = "10", value_name = "N")]
    limit: usize,

    /// Output format
    #[arg(short, long, default_value = "text", value_name = "FORMAT")]
    #[arg(value_parser = ["text", "json", "jsonl"])]
    format: String,
}

#[derive(Debug, Serialize)]
struct AccountState {
    account: String,
    pin: PinState,
    mapping_count: i64,
    recent_mappings: Vec<IdMapping>,
    recent_runs: Vec<RunRecord>,
}

async fn load_state(db: &Database, account: &str, limit: usize) -> Result<AccountState> {
    Ok(AccountState {
        account: account.to_string(),
        pin: db.load_pin_state(account).await?,
        mapping_count: db.mapping_count(account).await?,
        recent_mappings: db.recent_mappings(account, limit).await?,
        recent_runs: db.recent_runs(account, limit).await?,
    })
}

fn timestamp(seconds: i64) -> String {
    chrono::DateTime::from_timestamp(seconds, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| seconds.to_string())
}

fn print_text(state: &AccountState) {
    println!("{}", state.account);
    println!("  pin: {}", state.pin);
    println!("  mapped posts: {}", state.mapping_count);

    for mapping in &state.recent_mappings {
        println!(
            "    {} | {} -> {}",
            timestamp(mapping.mirrored_at),
            mapping.source_id,
            mapping.destination_id
        );
    }

    if state.recent_runs.is_empty() {
        println!("  runs: none");
    } else {
        println!("  runs:");
    }
    for run in &state.recent_runs {
        let symbol = if run.success { "✓" } else { "✗" };
        print!(
            "    {} {} | mirrored {}, skipped {}",
            symbol,
            timestamp(run.started_at),
            run.mirrored,
            run.skipped
        );
        match (&run.error_message, run.finished_at) {
            (Some(error), _) => println!(" | {}", error),
            (None, None) => println!(" | unfinished"),
            (None, Some(_)) => println!(),
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    libmirrorcast::logging::init_default();

    let args = Args::parse();
    tracing::debug!("mirror-state started with args: {:?}", args);

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    let db_path = shellexpand::tilde(&config.database.path).to_string();
    if !Path::new(&db_path).exists() {
        eprintln!("Error: Database not found at {}", db_path);
        eprintln!("Nothing has been mirrored yet. Try: mirror-run");
        std::process::exit(1);
    }

    let db = Database::new(&db_path)
        .await
        .context("Failed to open database")?;

    let accounts: Vec<&str> = match &args.account {
        Some(name) => {
            if config.account(name).is_none() {
                anyhow::bail!("no account named '{}' in configuration", name);
            }
            vec![name.as_str()]
        }
        None => config.accounts.iter().map(|a| a.name.as_str()).collect(),
    };

    let mut states = Vec::with_capacity(accounts.len());
    for account in accounts {
        let state = load_state(&db, account, args.limit)
            .await
            .with_context(|| format!("Failed to read state of '{}'", account))?;
        states.push(state);
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&states)?),
        "jsonl" => {
            for state in &states {
                println!("{}", serde_json::to_string(state)?);
            }
        }
        _ => states.iter().for_each(print_text),
    }

    Ok(())
}
