use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Capability;
use crate::services::AuthorizationStatus;
use crate::tasks::TaskKind;

/// Every state change in the core produces an Event.
/// The presentation layer subscribes; the core never reads them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    ShieldActivated {
        selection_len: usize,
        at: DateTime<Local>,
    },
    ShieldCleared {
        at: DateTime<Local>,
    },
    SelectionReplaced {
        selection_len: usize,
        at: DateTime<Local>,
    },
    StepCountChanged {
        step_count: u64,
        at: DateTime<Local>,
    },
    TaskScheduled {
        kind: TaskKind,
        earliest: DateTime<Local>,
        at: DateTime<Local>,
    },
    /// The host refused a submission. Reconciliation retries later.
    TaskSubmissionFailed {
        kind: TaskKind,
        reason: String,
        at: DateTime<Local>,
    },
    TaskCancelled {
        kind: TaskKind,
        at: DateTime<Local>,
    },
    TaskCompleted {
        kind: TaskKind,
        success: bool,
        at: DateTime<Local>,
    },
    /// An invocation ran out of its time budget.
    TaskExpired {
        kind: TaskKind,
        rescheduled_for: Option<DateTime<Local>>,
        at: DateTime<Local>,
    },
    AuthorizationChanged {
        capability: Capability,
        status: AuthorizationStatus,
        at: DateTime<Local>,
    },
    /// The stored sign-in is no longer valid; onboarding must run again.
    OnboardingReset {
        at: DateTime<Local>,
    },
}

/// Fan-out of core events to any number of subscribers.
///
/// Publishing never blocks and never fails: with no subscriber the event is
/// dropped, and slow subscribers observe a lag instead of stalling the core.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}
