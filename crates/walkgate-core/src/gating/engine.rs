//! Gating decision engine.
//!
//! Pure functions: they read their inputs and describe the next shield state
//! and which background tasks to arm. Callers apply the shield state through
//! the shield controller and hand the task requests to the dispatcher.
//!
//! ## Branches
//!
//! ```text
//! blocked   + steps >= threshold -> Reached   : unblock, Reblock tomorrow, cancel StepCheck
//! blocked   + steps <  threshold -> Walking   : stay blocked, StepCheck in 15 min
//! unblocked + any steps          -> Unblocked : stay unblocked until the nightly reset
//! Reblock fires                  -> DayReset  : block, StepCheck in 15 min
//! ```
//!
//! Once unblocked, the shield stays down for the rest of the day even if
//! the observed count later reads below the threshold. Only the Reblock task
//! puts it back, or a reconciliation that finds the reblock time has already
//! passed since the shield was cleared (the Reblock task was dropped).

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::policy::{next_reblock_at, GatePolicy};
use crate::shield::ShieldState;
use crate::tasks::{TaskKind, TaskRequest};

/// Inputs to one gating decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateInput {
    pub step_count: u64,
    pub threshold: u64,
    pub state: ShieldState,
    /// When the shield was last cleared, if known.
    pub unblocked_since: Option<DateTime<Local>>,
    pub now: DateTime<Local>,
}

impl GateInput {
    /// Whether the nightly reset should already have happened.
    pub fn reset_overdue(&self, policy: &GatePolicy) -> bool {
        match (self.state, self.unblocked_since) {
            (ShieldState::Unblocked, Some(since)) => self.now >= next_reblock_at(&since, policy),
            _ => false,
        }
    }
}

/// Which rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateBranch {
    /// Goal met while blocked.
    Reached,
    /// Goal not met while blocked.
    Walking,
    /// Already unblocked for the day.
    Unblocked,
    /// Nightly reset.
    DayReset,
}

/// Outcome of the engine. Describes effects, performs none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub branch: GateBranch,
    pub next_state: ShieldState,
    /// Tasks to arm, at most one per kind.
    pub schedule: Vec<TaskRequest>,
    /// Pending tasks that became redundant.
    pub cancel: Vec<TaskKind>,
    /// The nightly reset was missed and is folded into this decision.
    #[serde(default)]
    pub reset_overdue: bool,
}

impl Decision {
    /// Whether applying this decision changes the shield.
    pub fn changes(&self, from: ShieldState) -> bool {
        self.next_state != from
    }

    /// The request for `kind`, if this decision arms one.
    pub fn request_for(&self, kind: TaskKind) -> Option<&TaskRequest> {
        self.schedule.iter().find(|r| r.kind == kind)
    }
}

/// Whether `step_count` satisfies `threshold`. A zero threshold is always met.
pub fn goal_reached(step_count: u64, threshold: u64) -> bool {
    step_count >= threshold
}

/// Decide the next shield state and tasks for the current observation.
pub fn decide(input: &GateInput, policy: &GatePolicy) -> Decision {
    let reset_overdue = input.reset_overdue(policy);
    let state = if reset_overdue {
        ShieldState::Blocked
    } else {
        input.state
    };

    let mut decision = match state {
        ShieldState::Blocked if goal_reached(input.step_count, input.threshold) => Decision {
            branch: GateBranch::Reached,
            next_state: ShieldState::Unblocked,
            schedule: vec![TaskRequest::new(
                TaskKind::Reblock,
                next_reblock_at(&input.now, policy),
            )],
            cancel: vec![TaskKind::StepCheck],
            reset_overdue: false,
        },
        ShieldState::Blocked => Decision {
            branch: GateBranch::Walking,
            next_state: ShieldState::Blocked,
            schedule: vec![TaskRequest::new(
                TaskKind::StepCheck,
                policy.next_step_check_at(&input.now),
            )],
            cancel: Vec::new(),
            reset_overdue: false,
        },
        // The reset belongs to the day the shield came down, not to `now`.
        ShieldState::Unblocked => Decision {
            branch: GateBranch::Unblocked,
            next_state: ShieldState::Unblocked,
            schedule: vec![TaskRequest::new(
                TaskKind::Reblock,
                next_reblock_at(&input.unblocked_since.unwrap_or(input.now), policy),
            )],
            cancel: vec![TaskKind::StepCheck],
            reset_overdue: false,
        },
    };
    decision.reset_overdue = reset_overdue;
    decision
}

/// Decision for the nightly Reblock firing at `fired_at`.
pub fn day_reset(fired_at: &DateTime<Local>, policy: &GatePolicy) -> Decision {
    Decision {
        branch: GateBranch::DayReset,
        next_state: ShieldState::Blocked,
        schedule: vec![TaskRequest::new(
            TaskKind::StepCheck,
            policy.next_step_check_at(fired_at),
        )],
        cancel: Vec::new(),
        reset_overdue: false,
    }
}
