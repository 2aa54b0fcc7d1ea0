use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::kind::TaskKind;
use crate::gating::Decision;

/// One firing of a background task, as handed over by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInvocation {
    pub kind: TaskKind,
    pub fired_at: DateTime<Local>,
    /// Host-imposed execution budget. A hard deadline.
    pub budget: Duration,
}

impl TaskInvocation {
    pub fn new(kind: TaskKind, fired_at: DateTime<Local>, budget: Duration) -> Self {
        Self {
            kind,
            fired_at,
            budget,
        }
    }

    /// Time the handler may spend on its work, keeping `grace` back so the
    /// expiration path can persist its outcome before the host deadline.
    pub fn work_budget(&self, grace: Duration) -> Duration {
        let grace = grace.min(self.budget / 2);
        self.budget.saturating_sub(grace)
    }
}

/// What a handler reports back to the host when it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub kind: TaskKind,
    pub success: bool,
    /// The work did not finish within its budget.
    pub expired: bool,
    pub rescheduled_for: Option<DateTime<Local>>,
    /// The gating decision taken, when the work finished.
    pub decision: Option<Decision>,
}
