//! mirror-run - Mirror Twitter accounts to the Fediverse
//!
//! Runs one pass per configured account: new posts are mirrored, the
//! profile is synced and the pinned post is reconciled.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use libmirrorcast::logging::{LogFormat, LoggingConfig, LOG_LEVEL_ENV};
use libmirrorcast::mirror::cursor::StartDatePrompt;
use libmirrorcast::service::events::{Event, EventReceiver};
use libmirrorcast::service::{AccountSummary, MirrorService};
use libmirrorcast::{Config, MirrorError, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinError, JoinHandle};

#[derive(Parser, Debug)]
#[command(name = "mirror-run")]
#[command(version)]
#[command(about = "Mirror Twitter accounts to Pleroma/Mastodon")]
#[command(long_about = "\
mirror-run - Mirror Twitter accounts to Pleroma/Mastodon

DESCRIPTION:
    Runs one mirroring pass for every configured account, in order. Each
    pass syncs the profile, mirrors posts created since the newest post on
    the destination and keeps the pinned post in step with the source.

    A failing account is logged and recorded; the remaining accounts still
    run.

USAGE:
    # Mirror every account
    mirror-run

    # Only some accounts, from cron (never prompts)
    mirror-run --account alice --account bob --non-interactive --no-progress

    # Structured logs for a log collector
    mirror-run --log-format json

FIRST RUN:
    With no run history and an empty destination account, mirror-run asks
    where to start unless `first_run_start` is configured:
      <Enter>     earliest date possible (2010-11-06)
      continue    the last two days
      YYYY-MM-DD  that date
    With --non-interactive or no terminal, it continues from two days ago.

EXIT CODES:
    0 - All accounts succeeded
    1 - At least one account failed (platform or database error)
    2 - Configuration error
    3 - Invalid input
")]
struct Cli {
    /// Configuration file (default: $MIRRORCAST_CONFIG or ~/.config/mirrorcast/config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Only run this account (repeatable)
    #[arg(short, long = "account", value_name = "NAME")]
    accounts: Vec<String>,

    /// Never prompt for a first-run start date
    #[arg(long)]
    non_interactive: bool,

    /// Disable the progress spinner
    #[arg(long)]
    no_progress: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log format: text, json or pretty
    #[arg(long, value_name = "FORMAT", env = "MIRRORCAST_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    LoggingConfig::new(cli.log_format, level, cli.verbose).init();

    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let (config, accounts, service) = match prepare(&cli).await {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };

    tracing::debug!(accounts = accounts.len(), database = %config.database.path, "Starting mirror run");

    let spinner = (!cli.no_progress && atty::is(atty::Stream::Stderr)).then(new_spinner);
    let progress = spinner
        .clone()
        .map(|spinner| watch_progress(service.subscribe(), spinner));

    let interactive = !cli.non_interactive && atty::is(atty::Stream::Stdin);
    let prompt = interactive.then(|| ConsolePrompt {
        spinner: spinner.clone(),
    });

    let worker = tokio::spawn(async move {
        let prompt = prompt.as_ref().map(|p| p as &dyn StartDatePrompt);
        service.run_all(&accounts, prompt).await
    });

    match join_worker(worker, progress).await {
        Ok(summaries) => report(&summaries),
        Err(e) => {
            eprintln!("Error: mirror worker stopped unexpectedly: {}", e);
            1
        }
    }
}

/// Wait for the worker, then for the progress task, before surfacing the
/// worker's outcome. The bus closes when the worker drops the service, even
/// when it panics, so the progress task always ends.
async fn join_worker<T>(
    worker: JoinHandle<T>,
    progress: Option<JoinHandle<()>>,
) -> std::result::Result<T, JoinError> {
    let outcome = worker.await;
    if let Some(progress) = progress {
        let _ = progress.await;
    }
    outcome
}

async fn prepare(cli: &Cli) -> Result<(Config, Vec<libmirrorcast::AccountSettings>, MirrorService)> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let accounts = config.resolve_accounts(&cli.accounts)?;
    if accounts.is_empty() {
        tracing::warn!("No accounts configured, nothing to do");
    }

    let service = MirrorService::from_config(&config).await?;
    Ok((config, accounts, service))
}

/// Print one line per account and pick the exit code of the worst failure
fn report(summaries: &[AccountSummary]) -> i32 {
    let mut exit_code = 0;

    for summary in summaries {
        match &summary.result {
            Ok(pass) => println!(
                "{}: mirrored {}, skipped {}",
                summary.account,
                pass.mirrored(),
                pass.skipped()
            ),
            Err(e) => {
                println!("{}: failed: {}", summary.account, e);
                exit_code = exit_code.max(e.exit_code());
            }
        }
    }

    exit_code
}

fn new_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn watch_progress(mut events: EventReceiver, spinner: ProgressBar) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => spinner.set_message(describe(&event)),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        spinner.finish_and_clear();
    })
}

fn describe(event: &Event) -> String {
    match event {
        Event::PassStarted { account } => format!("{}: starting", account),
        Event::PostMirrored {
            account, source_id, ..
        } => format!("{}: mirrored {}", account, source_id),
        Event::PostSkipped { account, source_id } => {
            format!("{}: {} already mirrored", account, source_id)
        }
        Event::AttachmentDropped {
            account, source_id, ..
        } => format!("{}: dropped an attachment of {}", account, source_id),
        Event::PinChanged {
            account,
            source_id: Some(id),
            ..
        } => format!("{}: pinned {}", account, id),
        Event::PinChanged { account, .. } => format!("{}: unpinned", account),
        Event::PassCompleted {
            account, mirrored, ..
        } => format!("{}: done ({} mirrored)", account, mirrored),
        Event::PassFailed { account, .. } => format!("{}: failed", account),
    }
}

/// Reads the first-run answer from the terminal
struct ConsolePrompt {
    spinner: Option<ProgressBar>,
}

#[async_trait]
impl StartDatePrompt for ConsolePrompt {
    async fn ask(&self, account: &str) -> Result<String> {
        let spinner = self.spinner.clone();
        let account = account.to_string();

        let answer = tokio::task::spawn_blocking(move || {
            let read = || read_answer(&account);
            match spinner {
                Some(spinner) => spinner.suspend(read),
                None => read(),
            }
        })
        .await
        .map_err(|e| MirrorError::InvalidInput(format!("prompt was interrupted: {}", e)))?;

        answer.map_err(|e| MirrorError::InvalidInput(format!("could not read answer: {}", e)))
    }
}

fn read_answer(account: &str) -> io::Result<String> {
    let mut stderr = io::stderr();
    writeln!(
        stderr,
        "{}: no posts mirrored yet. Start from the earliest date possible (2010-11-06),",
        account
    )?;
    write!(
        stderr,
        "continue from the last two days, or a date? [Enter / continue / YYYY-MM-DD]: "
    )?;
    stderr.flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
