//! Service layer for Mirrorcast
//!
//! `MirrorService` is the single entry point the binaries use. It owns the
//! database and the event bus, and runs one pass per account:
//!
//! 1. probe the destination's capabilities
//! 2. sync the profile (when enabled)
//! 3. read destination history and compute the fetch cursor
//! 4. mirror every post in the window, oldest first
//! 5. reconcile the pinned post
//!
//! Every pass is recorded in the run history, including failed ones.
//!
//! # Example
//!
//! ```no_run
//! use libmirrorcast::service::MirrorService;
//! use libmirrorcast::Config;
//!
//! # async fn example() -> libmirrorcast::Result<()> {
//! let config = Config::load()?;
//! let accounts = config.resolve_accounts(&[])?;
//! let service = MirrorService::from_config(&config).await?;
//!
//! for summary in service.run_all(&accounts, None).await {
//!     println!("{}: {:?}", summary.account, summary.result.is_ok());
//! }
//! # Ok(())
//! # }
//! ```

pub mod events;

use chrono::Utc;
use tracing::Instrument;

use self::events::{Event, EventBus, EventReceiver};
use crate::config::AccountSettings;
use crate::error::Result;
use crate::mirror::capabilities;
use crate::mirror::cursor::{compute_cursor, needs_start_mode, resolve_start_mode, StartDatePrompt};
use crate::mirror::pin::PinReconciler;
use crate::mirror::pipeline::{PassReport, Pipeline};
use crate::mirror::profile::{ProfileOptions, ProfileSync};
use crate::mirror::transform::TransformOptions;
use crate::platforms::fediverse::FediverseClient;
use crate::platforms::twitter::TwitterClient;
use crate::platforms::{DestinationPlatform, SourcePlatform};
use crate::template::{render, TemplateVars};
use crate::{Config, Database};

/// Result of one account's pass inside [`MirrorService::run_all`]
#[derive(Debug)]
pub struct AccountSummary {
    pub account: String,
    pub result: Result<PassReport>,
}

/// Build the real platform clients for an account
pub fn create_clients(
    settings: &AccountSettings,
) -> Result<(Box<dyn SourcePlatform>, Box<dyn DestinationPlatform>)> {
    let source = TwitterClient::new(settings)?;
    let destination = FediverseClient::new(settings)?;
    Ok((Box::new(source), Box::new(destination)))
}

pub struct MirrorService {
    db: Database,
    event_bus: EventBus,
}

impl MirrorService {
    pub fn new(db: Database, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    /// Open the configured database and set up a fresh event bus
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;
        Ok(Self::new(db, EventBus::default()))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    /// Run every account in order. A failed account never stops the others.
    pub async fn run_all(
        &self,
        accounts: &[AccountSettings],
        prompt: Option<&dyn StartDatePrompt>,
    ) -> Vec<AccountSummary> {
        let mut summaries = Vec::with_capacity(accounts.len());

        for settings in accounts {
            let result = match create_clients(settings) {
                Ok((source, destination)) => {
                    self.run_pass(settings, source.as_ref(), destination.as_ref(), prompt)
                        .await
                }
                Err(error) => {
                    tracing::error!(account = %settings.name, %error, "Could not create platform clients");
                    self.event_bus.emit(Event::PassFailed {
                        account: settings.name.clone(),
                        error: error.to_string(),
                    });
                    Err(error)
                }
            };

            summaries.push(AccountSummary {
                account: settings.name.clone(),
                result,
            });
        }

        summaries
    }

    /// One full pass for one account against the given platforms.
    ///
    /// The run is recorded whatever the outcome; its counts include posts
    /// mirrored before a failure.
    pub async fn run_pass(
        &self,
        settings: &AccountSettings,
        source: &dyn SourcePlatform,
        destination: &dyn DestinationPlatform,
        prompt: Option<&dyn StartDatePrompt>,
    ) -> Result<PassReport> {
        let account = settings.name.as_str();
        let span = tracing::info_span!("mirror_pass", account);

        async move {
            self.event_bus.emit(Event::PassStarted {
                account: account.to_string(),
            });

            let run_id = match self.db.start_run(account).await {
                Ok(id) => id,
                Err(error) => {
                    self.event_bus.emit(Event::PassFailed {
                        account: account.to_string(),
                        error: error.to_string(),
                    });
                    return Err(error);
                }
            };
            let mut report = PassReport::default();

            let result = self
                .execute(settings, source, destination, prompt, &mut report)
                .await;

            let error_message = result.as_ref().err().map(ToString::to_string);
            let finished = self
                .db
                .finish_run(&run_id, report.mirrored(), report.skipped(), error_message.as_deref())
                .await;

            if let (Err(_), Err(record_error)) = (&result, &finished) {
                tracing::warn!(%record_error, "Could not record the failed run");
            }

            match result.and(finished) {
                Ok(()) => {
                    tracing::info!(
                        mirrored = report.mirrored(),
                        skipped = report.skipped(),
                        "Pass completed"
                    );
                    self.event_bus.emit(Event::PassCompleted {
                        account: account.to_string(),
                        mirrored: report.mirrored(),
                        skipped: report.skipped(),
                    });
                    Ok(report)
                }
                Err(error) => {
                    tracing::error!(%error, mirrored = report.mirrored(), "Pass failed");
                    self.event_bus.emit(Event::PassFailed {
                        account: account.to_string(),
                        error: error.to_string(),
                    });
                    Err(error)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        settings: &AccountSettings,
        source: &dyn SourcePlatform,
        destination: &dyn DestinationPlatform,
        prompt: Option<&dyn StartDatePrompt>,
        report: &mut PassReport,
    ) -> Result<()> {
        let account = settings.name.as_str();

        let capabilities = capabilities::probe(destination).await?;

        let vars = TemplateVars::new()
            .with("source_username", settings.source_username.as_str())
            .with("destination_username", settings.destination_username.as_str())
            .with(
                "destination_base_url",
                settings.destination_base_url.as_str().trim_end_matches('/'),
            )
            .with("nitter_base_url", settings.nitter_base_url.as_str());
        let source_url = render(&settings.source_url_template, &vars)?;
        let vars = vars.with("source_url", source_url.as_str());

        if settings.update_profile {
            let options = ProfileOptions {
                display_name: settings.display_name.clone(),
                bio_text: settings.bio_text.clone(),
            };
            ProfileSync::new(source, destination, &capabilities)
                .sync(&options, &vars)
                .await?;
        }

        let history = destination.account_history().await?;
        let first_run = self.db.is_first_run(account).await?;

        let start_mode = if needs_start_mode(&history, first_run) {
            Some(resolve_start_mode(account, settings.first_run_start, prompt).await?)
        } else {
            None
        };

        let cursor = compute_cursor(
            &history,
            first_run,
            start_mode,
            settings.max_posts,
            settings.fallback_lookback,
            Utc::now(),
        )?;

        let options = TransformOptions {
            signature: settings.signature,
            source_url,
            visibility: settings.visibility,
            sensitive_override: settings.sensitive,
            rich_text: capabilities.allow_rich_text(settings.rich_text),
            content_type: settings.content_type.clone(),
        };

        let pipeline = Pipeline {
            account,
            source,
            destination,
            db: &self.db,
            events: &self.event_bus,
            capabilities: &capabilities,
            options: &options,
            media_upload: settings.media_upload,
        };

        pipeline.run(cursor, report).await?;
        PinReconciler::new(&pipeline).reconcile(report).await?;

        Ok(())
    }
}
