//! Shield state controller.
//!
//! The only writer of the shield flag and the activity selection. Every
//! operation holds the controller lock across both the enforcer call and the
//! preference write, so concurrent triggers (foreground activation and a
//! background task firing together) are serialized.
//!
//! Enforcement goes first. If it fails, nothing is persisted and the error
//! is returned. If enforcement succeeds but the write fails, the controller
//! is flagged for repair and [`ShieldController::reassert`] (run by every
//! reconciliation) re-drives both from the in-memory state.

use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result, StoreError};
use crate::events::{Event, EventBus};
use crate::selection::ActivitySelection;
use crate::services::ShieldEnforcer;
use crate::storage::Preferences;

/// Whether restrictions are currently enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShieldState {
    Blocked,
    Unblocked,
}

impl ShieldState {
    pub fn from_unblocked(unblocked: bool) -> Self {
        if unblocked {
            ShieldState::Unblocked
        } else {
            ShieldState::Blocked
        }
    }

    pub fn is_unblocked(self) -> bool {
        self == ShieldState::Unblocked
    }
}

#[derive(Debug)]
struct Inner {
    state: ShieldState,
    selection: ActivitySelection,
    unblocked_since: Option<DateTime<Local>>,
    needs_repair: bool,
}

pub struct ShieldController {
    enforcer: Arc<dyn ShieldEnforcer>,
    prefs: Preferences,
    events: EventBus,
    inner: Mutex<Inner>,
}

impl ShieldController {
    /// Load the persisted state. Missing or malformed values fall back to
    /// blocked with an empty selection.
    pub fn load(enforcer: Arc<dyn ShieldEnforcer>, prefs: Preferences, events: EventBus) -> Self {
        let inner = Inner {
            state: ShieldState::from_unblocked(prefs.apps_unblocked()),
            selection: prefs.selection(),
            unblocked_since: prefs.unblocked_at(),
            needs_repair: false,
        };
        Self {
            enforcer,
            prefs,
            events,
            inner: Mutex::new(inner),
        }
    }

    pub async fn state(&self) -> ShieldState {
        self.inner.lock().await.state
    }

    pub async fn selection(&self) -> ActivitySelection {
        self.inner.lock().await.selection.clone()
    }

    pub async fn unblocked_since(&self) -> Option<DateTime<Local>> {
        self.inner.lock().await.unblocked_since
    }

    /// A persistence write failed after enforcement succeeded.
    pub async fn needs_repair(&self) -> bool {
        self.inner.lock().await.needs_repair
    }

    /// Restrict exactly `selection` and mark the shield blocked.
    pub async fn activate_shield(&self, selection: ActivitySelection, at: DateTime<Local>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.enforce(ShieldState::Blocked, &selection).await?;

        inner.state = ShieldState::Blocked;
        inner.selection = selection;
        let persisted = self
            .prefs
            .set_apps_unblocked(false)
            .and_then(|_| self.prefs.set_selection(&inner.selection));
        self.settle(&mut inner, persisted)?;

        info!(tokens = inner.selection.len(), "shield activated");
        self.events.publish(Event::ShieldActivated {
            selection_len: inner.selection.len(),
            at,
        });
        Ok(())
    }

    /// Re-activate with the current selection.
    pub async fn reapply(&self, at: DateTime<Local>) -> Result<()> {
        let selection = self.selection().await;
        self.activate_shield(selection, at).await
    }

    /// Clear every restriction facet and mark the shield unblocked.
    ///
    /// Idempotent: clearing an already-cleared shield keeps the original
    /// unblock time.
    pub async fn clear_shield(&self, at: DateTime<Local>) -> Result<()> {
        self.clear(at, false).await
    }

    /// Clear and restart the unblocked period at `at`. Used when a missed
    /// nightly reset is folded into a decision that stays unblocked.
    pub async fn renew_unblock(&self, at: DateTime<Local>) -> Result<()> {
        self.clear(at, true).await
    }

    async fn clear(&self, at: DateTime<Local>, restamp: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.enforce(ShieldState::Unblocked, &inner.selection).await?;

        let was_blocked = inner.state == ShieldState::Blocked;
        inner.state = ShieldState::Unblocked;
        if was_blocked || restamp || inner.unblocked_since.is_none() {
            inner.unblocked_since = Some(at);
        }
        let persisted = self
            .prefs
            .set_apps_unblocked(true)
            .and_then(|_| self.prefs.set_unblocked_at(inner.unblocked_since));
        self.settle(&mut inner, persisted)?;

        if was_blocked {
            info!("shield cleared");
        } else {
            debug!("shield already clear");
        }
        self.events.publish(Event::ShieldCleared { at });
        Ok(())
    }

    /// Replace the selection. Persists only when it differs from the current
    /// one and never touches enforcement. Returns whether it changed.
    pub async fn replace_selection(&self, selection: ActivitySelection, at: DateTime<Local>) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.selection == selection {
            return Ok(false);
        }
        self.prefs.set_selection(&selection)?;
        inner.selection = selection;
        info!(tokens = inner.selection.len(), "activity selection replaced");
        self.events.publish(Event::SelectionReplaced {
            selection_len: inner.selection.len(),
            at,
        });
        Ok(true)
    }

    /// Clear the shield and forget the selection.
    pub async fn reset(&self, at: DateTime<Local>) -> Result<()> {
        self.clear_shield(at).await?;
        self.replace_selection(ActivitySelection::default(), at).await?;
        Ok(())
    }

    /// Re-drive the enforcer and the preference store from the in-memory
    /// state, repairing a half-applied transition.
    pub async fn reassert(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.enforce(inner.state, &inner.selection).await?;
        let persisted = self
            .prefs
            .set_apps_unblocked(inner.state.is_unblocked())
            .and_then(|_| self.prefs.set_selection(&inner.selection))
            .and_then(|_| self.prefs.set_unblocked_at(inner.unblocked_since));
        let was_dirty = inner.needs_repair;
        self.settle(&mut inner, persisted)?;
        if was_dirty {
            info!(state = ?inner.state, "shield state repaired");
        }
        Ok(())
    }

    /// Clear all facets, then apply the full selection when blocking.
    async fn enforce(&self, state: ShieldState, selection: &ActivitySelection) -> Result<()> {
        self.enforcer.clear_restriction().await?;
        if state == ShieldState::Blocked && !selection.is_empty() {
            self.enforcer.set_restriction(selection).await?;
        }
        Ok(())
    }

    fn settle(&self, inner: &mut Inner, persisted: Result<(), StoreError>) -> Result<()> {
        match persisted {
            Ok(()) => {
                inner.needs_repair = false;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "shield enforced but state not persisted, will repair");
                inner.needs_repair = true;
                Err(CoreError::from(e))
            }
        }
    }
}
