//! Pinned-post reconciliation
//!
//! Keeps the destination's pinned status aligned with the source's pinned
//! post across runs. The persisted [`PinState`] is written after every
//! destination call, so a crash leaves a state the next run can resume
//! from without repeating an unpin.

use crate::error::Result;
use crate::mirror::pipeline::{PassReport, Pipeline, PostOutcome};
use crate::service::events::Event;
use crate::types::PinState;

/// What a reconciliation step must do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinAction {
    Keep,
    Pin { source_id: String },
    Repin { unpin_destination_id: String, source_id: String },
    Unpin { destination_id: String },
}

/// Decide the action from the stored state and the source's current pin
pub fn plan(previous: &PinState, current: Option<&str>) -> PinAction {
    match (previous, current) {
        (PinState::Unpinned, None) => PinAction::Keep,
        (PinState::Unpinned, Some(id)) => PinAction::Pin {
            source_id: id.to_string(),
        },
        (PinState::Pinned { source_id, .. }, Some(id)) if source_id == id => PinAction::Keep,
        (PinState::Pinned { destination_id, .. }, Some(id)) => PinAction::Repin {
            unpin_destination_id: destination_id.clone(),
            source_id: id.to_string(),
        },
        (PinState::Pinned { destination_id, .. }, None) => PinAction::Unpin {
            destination_id: destination_id.clone(),
        },
    }
}

pub struct PinReconciler<'p, 'a> {
    pipeline: &'p Pipeline<'a>,
}

impl<'p, 'a> PinReconciler<'p, 'a> {
    pub fn new(pipeline: &'p Pipeline<'a>) -> Self {
        Self { pipeline }
    }

    /// Run one reconciliation step and return the resulting state.
    ///
    /// A pinned post that was never mirrored is mirrored out of band; its
    /// outcome is appended to `report`.
    pub async fn reconcile(&self, report: &mut PassReport) -> Result<PinState> {
        let account = self.pipeline.account;
        let db = self.pipeline.db;

        let previous = db.load_pin_state(account).await?;
        let current = self.pipeline.source.pinned_post_id().await?;
        let action = plan(&previous, current.as_deref());

        tracing::debug!(account, previous = %previous, current = ?current, action = ?action, "Reconciling pinned post");

        match action {
            PinAction::Keep => Ok(previous),
            PinAction::Pin { source_id } => self.pin(&source_id, report).await,
            PinAction::Repin {
                unpin_destination_id,
                source_id,
            } => {
                self.unpin(&unpin_destination_id).await?;
                self.pin(&source_id, report).await
            }
            PinAction::Unpin { destination_id } => {
                self.unpin(&destination_id).await?;
                self.announce(&PinState::Unpinned);
                Ok(PinState::Unpinned)
            }
        }
    }

    async fn unpin(&self, destination_id: &str) -> Result<()> {
        let account = self.pipeline.account;

        self.pipeline.destination.unpin(destination_id).await?;
        self.pipeline
            .db
            .save_pin_state(account, &PinState::Unpinned)
            .await?;

        tracing::info!(account, destination_id, "Unpinned post");
        Ok(())
    }

    async fn pin(&self, source_id: &str, report: &mut PassReport) -> Result<PinState> {
        let account = self.pipeline.account;

        let destination_id = match self.pipeline.db.destination_id_for(account, source_id).await? {
            Some(id) => id,
            None => {
                tracing::info!(account, source_id, "Pinned post not mirrored yet, mirroring it now");
                let post = self.pipeline.source.get_post(source_id).await?;
                let (id, dropped) = self.pipeline.submit(&post).await?;
                report
                    .outcomes
                    .push(PostOutcome::mirrored(&post.id, id.clone(), dropped));
                id
            }
        };

        self.pipeline.destination.pin(&destination_id).await?;

        let state = PinState::Pinned {
            source_id: source_id.to_string(),
            destination_id: destination_id.clone(),
        };
        self.pipeline.db.save_pin_state(account, &state).await?;

        tracing::info!(account, source_id, destination_id = %destination_id, "Pinned post");
        self.announce(&state);
        Ok(state)
    }

    fn announce(&self, state: &PinState) {
        let (source_id, destination_id) = match state {
            PinState::Unpinned => (None, None),
            PinState::Pinned {
                source_id,
                destination_id,
            } => (Some(source_id.clone()), Some(destination_id.clone())),
        };
        self.pipeline.events.emit(Event::PinChanged {
            account: self.pipeline.account.to_string(),
            source_id,
            destination_id,
        });
    }
}
