//! Binds gating decisions to the host's background scheduler.
//!
//! Submissions are fire-and-forget. A rejected submission is logged,
//! published and otherwise ignored: the next foreground reconciliation
//! notices the missing task and submits it again.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::kind::{TaskKind, TaskRequest};
use super::lifecycle::{TaskBoard, TaskPhase};
use crate::error::{SchedulingError, TaskError};
use crate::events::{Event, EventBus};
use crate::gating::Decision;
use crate::services::BackgroundScheduler;

/// A submission the host refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedTask {
    pub kind: TaskKind,
    pub reason: String,
    pub retryable: bool,
}

/// What the dispatcher did for one decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub submitted: Vec<TaskRequest>,
    pub already_pending: Vec<TaskKind>,
    pub rejected: Vec<RejectedTask>,
    pub cancelled: Vec<TaskKind>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

pub struct TaskDispatcher {
    scheduler: Arc<dyn BackgroundScheduler>,
    board: TaskBoard,
    events: EventBus,
}

impl TaskDispatcher {
    pub fn new(scheduler: Arc<dyn BackgroundScheduler>, events: EventBus) -> Self {
        Self {
            scheduler,
            board: TaskBoard::new(),
            events,
        }
    }

    pub fn phase(&self, kind: TaskKind) -> TaskPhase {
        self.board.phase(kind)
    }

    /// Kinds the host currently holds a request for.
    pub async fn pending(&self) -> BTreeSet<TaskKind> {
        let pending = self.scheduler.pending().await;
        self.board.sync_pending(&pending);
        pending
    }

    /// Submit `request`, replacing any outstanding request of the same kind.
    ///
    /// Returns the rejection, if any. Rejections are never fatal.
    pub async fn request(&self, request: &TaskRequest) -> Result<(), SchedulingError> {
        match self.scheduler.submit(request).await {
            Ok(()) => {
                info!(kind = %request.kind, earliest = %request.earliest, "scheduled background task");
                self.board.mark_pending(request.kind, request.earliest);
                self.events.publish(Event::TaskScheduled {
                    kind: request.kind,
                    earliest: request.earliest,
                    at: Local::now(),
                });
                Ok(())
            }
            Err(err) => {
                match &err {
                    SchedulingError::Unavailable => {
                        warn!(kind = %request.kind, "background task scheduler is unavailable")
                    }
                    SchedulingError::TooManyPending => {
                        warn!(kind = %request.kind, "too many pending task requests")
                    }
                    SchedulingError::NotPermitted => {
                        warn!(kind = %request.kind, "app is not permitted to schedule background tasks")
                    }
                    SchedulingError::Unclassified { code, message } => {
                        warn!(kind = %request.kind, code, %message, "unclassified scheduler error")
                    }
                }
                self.events.publish(Event::TaskSubmissionFailed {
                    kind: request.kind,
                    reason: err.to_string(),
                    at: Local::now(),
                });
                Err(err)
            }
        }
    }

    /// Withdraw the outstanding request for `kind`. Best effort.
    pub async fn cancel(&self, kind: TaskKind) {
        self.scheduler.cancel(kind).await;
        self.board.mark_cancelled(kind);
        debug!(%kind, "cancelled background task");
        self.events.publish(Event::TaskCancelled {
            kind,
            at: Local::now(),
        });
    }

    /// Submit every request of `decision` and withdraw what it cancels.
    pub async fn apply(&self, decision: &Decision) -> DispatchReport {
        let mut report = DispatchReport::default();
        for request in &decision.schedule {
            self.submit_into(request, &mut report).await;
        }
        for kind in &decision.cancel {
            self.cancel(*kind).await;
            report.cancelled.push(*kind);
        }
        report
    }

    /// Like [`apply`](Self::apply), but only submits kinds the host does not
    /// already hold and only cancels kinds that are actually pending.
    pub async fn ensure(&self, decision: &Decision) -> DispatchReport {
        let pending = self.pending().await;
        let mut report = DispatchReport::default();
        for request in &decision.schedule {
            if pending.contains(&request.kind) {
                debug!(kind = %request.kind, "already pending, not resubmitting");
                report.already_pending.push(request.kind);
            } else {
                self.submit_into(request, &mut report).await;
            }
        }
        for kind in &decision.cancel {
            if pending.contains(kind) {
                self.cancel(*kind).await;
                report.cancelled.push(*kind);
            }
        }
        report
    }

    async fn submit_into(&self, request: &TaskRequest, report: &mut DispatchReport) {
        match self.request(request).await {
            Ok(()) => report.submitted.push(*request),
            Err(err) => report.rejected.push(RejectedTask {
                kind: request.kind,
                reason: err.to_string(),
                retryable: err.is_retryable(),
            }),
        }
    }

    /// An invocation of `kind` started at `at`.
    pub fn begin(&self, kind: TaskKind, at: DateTime<Local>) -> Result<(), TaskError> {
        self.board.begin(kind, at)
    }

    /// The running invocation of `kind` reported completion.
    pub fn finish(&self, kind: TaskKind, success: bool) {
        match self.board.finish(kind) {
            Ok(phase) => debug!(%kind, success, ?phase, "task finished"),
            Err(e) => warn!(%kind, error = %e, "task finished outside of a run"),
        }
        self.events.publish(Event::TaskCompleted {
            kind,
            success,
            at: Local::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gating::{decide, GateInput, GatePolicy};
    use crate::services::memory::MemoryScheduler;
    use crate::shield::ShieldState;
    use chrono::TimeZone;

    fn walking_decision() -> Decision {
        let now = Local.with_ymd_and_hms(2024, 1, 8, 10, 0, 0).unwrap();
        decide(
            &GateInput {
                step_count: 10,
                threshold: 5000,
                state: ShieldState::Blocked,
                unblocked_since: None,
                now,
            },
            &GatePolicy::default(),
        )
    }

    #[tokio::test]
    async fn ensure_does_not_double_schedule() {
        let scheduler = Arc::new(MemoryScheduler::new());
        let dispatcher = TaskDispatcher::new(scheduler.clone(), EventBus::default());
        let decision = walking_decision();

        let first = dispatcher.ensure(&decision).await;
        assert_eq!(first.submitted.len(), 1);

        let second = dispatcher.ensure(&decision).await;
        assert!(second.submitted.is_empty());
        assert_eq!(second.already_pending, vec![TaskKind::StepCheck]);
        assert_eq!(scheduler.submissions_of(TaskKind::StepCheck).len(), 1);
    }

    #[tokio::test]
    async fn rejection_is_reported_not_raised() {
        let scheduler = Arc::new(MemoryScheduler::new());
        scheduler.reject_with(Some(SchedulingError::NotPermitted));
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let dispatcher = TaskDispatcher::new(scheduler.clone(), events);

        let report = dispatcher.apply(&walking_decision()).await;
        assert!(!report.is_clean());
        assert_eq!(report.rejected[0].kind, TaskKind::StepCheck);
        assert!(!report.rejected[0].retryable);
        assert_eq!(dispatcher.phase(TaskKind::StepCheck), TaskPhase::Idle);
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::TaskSubmissionFailed { kind: TaskKind::StepCheck, .. }
        ));
    }

    #[tokio::test]
    async fn ensure_only_cancels_what_is_pending() {
        let scheduler = Arc::new(MemoryScheduler::new());
        let dispatcher = TaskDispatcher::new(scheduler.clone(), EventBus::default());
        let mut decision = walking_decision();
        decision.cancel = vec![TaskKind::Reblock];

        let report = dispatcher.ensure(&decision).await;
        assert!(report.cancelled.is_empty());
        assert!(scheduler.cancellations().is_empty());
    }

    #[tokio::test]
    async fn pending_syncs_board_with_host() {
        let scheduler = Arc::new(MemoryScheduler::new());
        let dispatcher = TaskDispatcher::new(scheduler.clone(), EventBus::default());
        dispatcher.apply(&walking_decision()).await;
        assert!(matches!(
            dispatcher.phase(TaskKind::StepCheck),
            TaskPhase::Pending { earliest: Some(_) }
        ));

        scheduler.drop_pending(TaskKind::StepCheck);
        assert!(dispatcher.pending().await.is_empty());
        assert_eq!(dispatcher.phase(TaskKind::StepCheck), TaskPhase::Idle);
    }
}
