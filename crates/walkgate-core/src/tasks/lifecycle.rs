//! Per-kind task state machine.
//!
//! ```text
//! Idle -> Pending -> Running -> Idle              (finished, nothing armed)
//!                           \-> Pending           (finished, successor armed while running)
//! ```
//!
//! Each kind has at most one outstanding instance. A second invocation of a
//! kind that is already running is refused.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::kind::TaskKind;
use crate::error::TaskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TaskPhase {
    #[default]
    Idle,
    /// Submitted to the host. `earliest` is unknown when learned from the
    /// host's pending list rather than from our own submission.
    Pending {
        earliest: Option<DateTime<Local>>,
    },
    Running {
        since: DateTime<Local>,
        /// Successor armed during this run.
        next: Option<DateTime<Local>>,
    },
}

impl TaskPhase {
    fn name(&self) -> &'static str {
        match self {
            TaskPhase::Idle => "idle",
            TaskPhase::Pending { .. } => "pending",
            TaskPhase::Running { .. } => "running",
        }
    }
}

/// Phases of both task kinds.
#[derive(Debug, Default)]
pub struct TaskBoard {
    phases: Mutex<BTreeMap<TaskKind, TaskPhase>>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn phases(&self) -> MutexGuard<'_, BTreeMap<TaskKind, TaskPhase>> {
        self.phases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self, kind: TaskKind) -> TaskPhase {
        self.phases().get(&kind).copied().unwrap_or_default()
    }

    /// An invocation of `kind` started.
    pub fn begin(&self, kind: TaskKind, at: DateTime<Local>) -> Result<(), TaskError> {
        let mut phases = self.phases();
        let phase = phases.entry(kind).or_default();
        if matches!(phase, TaskPhase::Running { .. }) {
            return Err(TaskError::AlreadyRunning(kind));
        }
        *phase = TaskPhase::Running {
            since: at,
            next: None,
        };
        Ok(())
    }

    /// The running invocation of `kind` reported completion.
    pub fn finish(&self, kind: TaskKind) -> Result<TaskPhase, TaskError> {
        let mut phases = self.phases();
        let phase = phases.entry(kind).or_default();
        let finished = match *phase {
            TaskPhase::Running { next: Some(earliest), .. } => TaskPhase::Pending {
                earliest: Some(earliest),
            },
            TaskPhase::Running { next: None, .. } => TaskPhase::Idle,
            other => {
                return Err(TaskError::InvalidTransition {
                    kind,
                    from: other.name(),
                    to: "idle",
                })
            }
        };
        *phase = finished;
        Ok(finished)
    }

    /// The host accepted a submission for `kind`.
    pub fn mark_pending(&self, kind: TaskKind, earliest: DateTime<Local>) {
        let mut phases = self.phases();
        let phase = phases.entry(kind).or_default();
        *phase = match *phase {
            TaskPhase::Running { since, .. } => TaskPhase::Running {
                since,
                next: Some(earliest),
            },
            _ => TaskPhase::Pending {
                earliest: Some(earliest),
            },
        };
    }

    /// The outstanding request for `kind` was withdrawn.
    pub fn mark_cancelled(&self, kind: TaskKind) {
        let mut phases = self.phases();
        let phase = phases.entry(kind).or_default();
        *phase = match *phase {
            TaskPhase::Running { since, .. } => TaskPhase::Running { since, next: None },
            _ => TaskPhase::Idle,
        };
    }

    /// Align non-running kinds with the host's pending list.
    pub fn sync_pending(&self, pending: &BTreeSet<TaskKind>) {
        let mut phases = self.phases();
        for kind in TaskKind::ALL {
            let phase = phases.entry(kind).or_default();
            match (*phase, pending.contains(&kind)) {
                (TaskPhase::Idle, true) => *phase = TaskPhase::Pending { earliest: None },
                (TaskPhase::Pending { .. }, false) => *phase = TaskPhase::Idle,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let board = TaskBoard::new();
        assert_eq!(board.phase(TaskKind::StepCheck), TaskPhase::Idle);
    }

    #[test]
    fn run_without_successor_ends_idle() {
        let board = TaskBoard::new();
        let now = Local::now();
        board.mark_pending(TaskKind::Reblock, now);
        board.begin(TaskKind::Reblock, now).unwrap();
        assert_eq!(board.finish(TaskKind::Reblock).unwrap(), TaskPhase::Idle);
    }

    #[test]
    fn successor_armed_while_running_ends_pending() {
        let board = TaskBoard::new();
        let now = Local::now();
        let next = now + chrono::Duration::minutes(15);
        board.begin(TaskKind::StepCheck, now).unwrap();
        board.mark_pending(TaskKind::StepCheck, next);
        assert_eq!(
            board.finish(TaskKind::StepCheck).unwrap(),
            TaskPhase::Pending {
                earliest: Some(next)
            }
        );
    }

    #[test]
    fn concurrent_invocation_is_refused() {
        let board = TaskBoard::new();
        let now = Local::now();
        board.begin(TaskKind::StepCheck, now).unwrap();
        assert_eq!(
            board.begin(TaskKind::StepCheck, now),
            Err(TaskError::AlreadyRunning(TaskKind::StepCheck))
        );
        board.begin(TaskKind::Reblock, now).unwrap();
    }

    #[test]
    fn finish_without_begin_is_invalid() {
        let board = TaskBoard::new();
        assert!(matches!(
            board.finish(TaskKind::Reblock),
            Err(TaskError::InvalidTransition { from: "idle", .. })
        ));
    }

    #[test]
    fn sync_follows_host_but_leaves_running_alone() {
        let board = TaskBoard::new();
        let now = Local::now();
        board.mark_pending(TaskKind::Reblock, now);
        board.begin(TaskKind::StepCheck, now).unwrap();

        let mut host = BTreeSet::new();
        host.insert(TaskKind::StepCheck);
        board.sync_pending(&host);

        assert_eq!(board.phase(TaskKind::Reblock), TaskPhase::Idle);
        assert!(matches!(board.phase(TaskKind::StepCheck), TaskPhase::Running { .. }));
    }
}
