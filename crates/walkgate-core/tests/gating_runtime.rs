//! Integration tests for the gating loop.
//!
//! These drive `GateRuntime` end to end against the in-memory collaborators:
//! foreground reconciliation, both background task handlers and their
//! expiration paths.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use walkgate_core::services::memory::{
    MemoryIdentity, MemoryNotifier, MemoryScheduler, MemoryShield, MemorySteps,
};
use walkgate_core::services::{AuthorizationStatus, ShieldEnforcer, StepCallback, StepSource};
use walkgate_core::{
    ActivitySelection, Config, Event, GateBranch, GateRuntime, Preferences, RuntimeServices,
    CoreError, SchedulingError, ServiceError, ShieldState, TaskError, TaskInvocation, TaskKind,
};

// ============================================================================
// Harness
// ============================================================================

struct Device {
    shield: Arc<MemoryShield>,
    scheduler: Arc<MemoryScheduler>,
    notifier: Arc<MemoryNotifier>,
    prefs: Preferences,
}

fn build(steps: Arc<dyn StepSource>, prefs: Preferences) -> (GateRuntime, Device) {
    let device = Device {
        shield: Arc::new(MemoryShield::default()),
        scheduler: Arc::new(MemoryScheduler::new()),
        notifier: Arc::new(MemoryNotifier::default()),
        prefs: prefs.clone(),
    };
    let services = RuntimeServices {
        steps,
        shield: device.shield.clone(),
        scheduler: device.scheduler.clone(),
        notifier: device.notifier.clone(),
        identity: Arc::new(MemoryIdentity::default()),
    };
    let runtime = GateRuntime::new(services, prefs, Config::default()).unwrap();
    (runtime, device)
}

fn with_steps(step_count: u64, threshold: u64) -> (GateRuntime, Device) {
    let prefs = Preferences::in_memory();
    prefs.set_step_threshold(threshold).unwrap();
    build(Arc::new(MemorySteps::new(step_count)), prefs)
}

fn social() -> ActivitySelection {
    ActivitySelection::new(["app.chat", "app.photos"], ["social"], ["feed.example"])
}

/// Monday 2024-01-08.
fn monday(h: u32, m: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 1, 8, h, m, 0).unwrap()
}

fn tuesday(h: u32, m: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 1, 9, h, m, 0).unwrap()
}

/// A step source whose queries never answer within a task budget.
struct StalledSteps;

#[async_trait]
impl StepSource for StalledSteps {
    async fn today_step_count(&self) -> Result<u64, ServiceError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(0)
    }

    fn subscribe(&self, _callback: StepCallback) {}

    async fn authorization_status(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }

    async fn request_authorization(&self) -> Result<AuthorizationStatus, ServiceError> {
        Ok(AuthorizationStatus::Authorized)
    }
}

// ============================================================================
// Foreground reconciliation
// ============================================================================

#[tokio::test]
async fn test_under_goal_stays_blocked_and_checks_again() {
    let (rt, device) = with_steps(4999, 5000);

    let report = rt.reconcile(monday(10, 0)).await.unwrap();

    assert_eq!(report.state_after, ShieldState::Blocked);
    assert_eq!(report.decision.unwrap().branch, GateBranch::Walking);
    assert_eq!(device.scheduler.pending_at(TaskKind::StepCheck), Some(monday(10, 15)));
    assert_eq!(device.scheduler.pending_at(TaskKind::Reblock), None);
}

#[tokio::test]
async fn test_goal_met_unblocks_until_tomorrow() {
    let (rt, device) = with_steps(5001, 5000);
    rt.update_selection(social(), monday(8, 0)).await.unwrap();
    assert_eq!(device.shield.restriction(), Some(social()));

    let report = rt.reconcile(monday(14, 0)).await.unwrap();

    assert_eq!(report.state_after, ShieldState::Unblocked);
    assert_eq!(device.shield.restriction(), None);
    assert_eq!(device.scheduler.pending_at(TaskKind::Reblock), Some(tuesday(4, 0)));
    assert!(device.prefs.apps_unblocked());
}

#[tokio::test]
async fn test_reconcile_never_double_schedules() {
    let (rt, device) = with_steps(10, 5000);

    rt.reconcile(monday(10, 0)).await.unwrap();
    let second = rt.reconcile(monday(10, 5)).await.unwrap();
    rt.reconcile(monday(10, 9)).await.unwrap();

    assert_eq!(second.dispatch.already_pending, vec![TaskKind::StepCheck]);
    assert_eq!(device.scheduler.submissions_of(TaskKind::StepCheck).len(), 1);
}

#[tokio::test]
async fn test_rejected_submission_is_retried_next_activation() {
    let (rt, device) = with_steps(10, 5000);
    device
        .scheduler
        .reject_with(Some(SchedulingError::from_code(2, "too many pending")));

    let first = rt.reconcile(monday(10, 0)).await.unwrap();
    assert_eq!(first.dispatch.rejected.len(), 1);
    assert!(device.scheduler.pending_at(TaskKind::StepCheck).is_none());

    device.scheduler.reject_with(None);
    let second = rt.reconcile(monday(11, 0)).await.unwrap();
    assert_eq!(second.dispatch.submitted.len(), 1);
    assert_eq!(device.scheduler.pending_at(TaskKind::StepCheck), Some(monday(11, 15)));
}

#[tokio::test]
async fn test_unblocked_stays_unblocked_below_goal() {
    let steps = Arc::new(MemorySteps::new(6000));
    let prefs = Preferences::in_memory();
    prefs.set_step_threshold(5000).unwrap();
    let (rt, device) = build(steps.clone(), prefs);
    rt.reconcile(monday(14, 0)).await.unwrap();

    // The count source corrects itself downward later that day.
    steps.set_count(3000);
    let report = rt.reconcile(monday(18, 0)).await.unwrap();

    assert_eq!(report.decision.unwrap().branch, GateBranch::Unblocked);
    assert_eq!(report.state_after, ShieldState::Unblocked);
    assert_eq!(device.shield.restriction(), None);
}

#[tokio::test]
async fn test_goal_met_cancels_pending_step_check() {
    let steps = Arc::new(MemorySteps::new(4999));
    let prefs = Preferences::in_memory();
    prefs.set_step_threshold(5000).unwrap();
    let (rt, device) = build(steps.clone(), prefs);
    rt.reconcile(monday(10, 0)).await.unwrap();
    assert_eq!(device.scheduler.pending_at(TaskKind::StepCheck), Some(monday(10, 15)));

    steps.set_count(5001);
    let report = rt.reconcile(monday(10, 10)).await.unwrap();

    assert_eq!(report.state_after, ShieldState::Unblocked);
    assert_eq!(device.scheduler.pending_at(TaskKind::StepCheck), None);
    assert_eq!(device.scheduler.pending_at(TaskKind::Reblock), Some(tuesday(4, 0)));
    assert_eq!(device.scheduler.cancellations(), vec![TaskKind::StepCheck]);
}

#[tokio::test]
async fn test_dropped_reblock_is_rearmed_for_the_unblock_day() {
    let prefs = Preferences::in_memory();
    prefs.set_step_threshold(5000).unwrap();
    prefs.set_apps_unblocked(true).unwrap();
    prefs.set_unblocked_at(Some(monday(14, 0))).unwrap();
    let (rt, device) = build(Arc::new(MemorySteps::new(100)), prefs);

    // Past midnight, before the reset: the host lost the Reblock.
    let report = rt.reconcile(tuesday(1, 0)).await.unwrap();

    assert!(!report.decision.as_ref().unwrap().reset_overdue);
    assert_eq!(report.state_after, ShieldState::Unblocked);
    assert_eq!(device.scheduler.pending_at(TaskKind::Reblock), Some(tuesday(4, 0)));
}

#[tokio::test]
async fn test_missed_reblock_is_caught_up() {
    let prefs = Preferences::in_memory();
    prefs.set_step_threshold(5000).unwrap();
    prefs.set_selection(&social()).unwrap();
    prefs.set_apps_unblocked(true).unwrap();
    prefs.set_unblocked_at(Some(monday(14, 0))).unwrap();
    let (rt, device) = build(Arc::new(MemorySteps::new(200)), prefs);

    let report = rt.reconcile(tuesday(9, 0)).await.unwrap();

    assert!(report.decision.as_ref().unwrap().reset_overdue);
    assert_eq!(report.state_after, ShieldState::Blocked);
    assert_eq!(device.shield.restriction(), Some(social()));
    assert_eq!(device.scheduler.pending_at(TaskKind::StepCheck), Some(tuesday(9, 15)));
}

#[tokio::test]
async fn test_reconcile_repairs_dropped_enforcement() {
    let (rt, device) = with_steps(0, 5000);
    rt.update_selection(social(), monday(8, 0)).await.unwrap();

    // The device lost the restriction behind our back.
    device.shield.clear_restriction().await.unwrap();
    assert_eq!(device.shield.restriction(), None);

    rt.reconcile(monday(9, 0)).await.unwrap();
    assert_eq!(device.shield.restriction(), Some(social()));
    assert!(!rt.shield().needs_repair().await);
}

// ============================================================================
// Background tasks
// ============================================================================

#[tokio::test]
async fn test_reblock_fires_and_resets_the_day() {
    let prefs = Preferences::in_memory();
    prefs.set_step_threshold(5000).unwrap();
    prefs.set_selection(&social()).unwrap();
    prefs.set_apps_unblocked(true).unwrap();
    prefs.set_unblocked_at(Some(monday(14, 0))).unwrap();
    let (rt, device) = build(Arc::new(MemorySteps::new(0)), prefs);

    let invocation = TaskInvocation::new(TaskKind::Reblock, tuesday(4, 0), Duration::from_secs(30));
    let done = rt.handle_reblock(invocation).await.unwrap();

    assert!(done.success);
    assert_eq!(rt.shield().state().await, ShieldState::Blocked);
    assert_eq!(device.shield.restriction(), Some(social()));
    assert_eq!(device.scheduler.pending_at(TaskKind::StepCheck), Some(tuesday(4, 15)));
    assert_eq!(
        device.notifier.sent()[0].title,
        "Walk 5000 Steps To Unblock Your Apps"
    );
}

#[tokio::test]
async fn test_step_check_rearms_itself_while_walking() {
    let (rt, device) = with_steps(1200, 5000);

    let invocation = TaskInvocation::new(TaskKind::StepCheck, monday(10, 0), Duration::from_secs(30));
    let done = rt.handle_step_check(invocation).await.unwrap();

    assert!(done.success);
    assert_eq!(done.rescheduled_for, Some(monday(10, 15)));
    assert_eq!(device.scheduler.pending_at(TaskKind::StepCheck), Some(monday(10, 15)));
}

#[tokio::test(start_paused = true)]
async fn test_expired_step_check_reschedules_from_fire_time() {
    let prefs = Preferences::in_memory();
    prefs.set_step_threshold(5000).unwrap();
    let (rt, device) = build(Arc::new(StalledSteps), prefs);
    let mut events = rt.events().subscribe();

    let invocation = TaskInvocation::new(TaskKind::StepCheck, monday(10, 0), Duration::from_secs(30));
    let done = rt.handle_step_check(invocation).await.unwrap();

    assert!(!done.success);
    assert!(done.expired);
    assert_eq!(done.rescheduled_for, Some(monday(10, 15)));
    assert_eq!(device.scheduler.pending_at(TaskKind::StepCheck), Some(monday(10, 15)));

    let mut saw_expiry = false;
    while let Ok(event) = events.try_recv() {
        if let Event::TaskExpired { kind, rescheduled_for, .. } = event {
            assert_eq!(kind, TaskKind::StepCheck);
            assert_eq!(rescheduled_for, Some(monday(10, 15)));
            saw_expiry = true;
        }
    }
    assert!(saw_expiry);
}

#[tokio::test(start_paused = true)]
async fn test_expired_reblock_is_not_rescheduled() {
    let prefs = Preferences::in_memory();
    prefs.set_apps_unblocked(true).unwrap();
    let shield = Arc::new(StalledShield::default());
    let (rt, device) = {
        let device = Device {
            shield: Arc::new(MemoryShield::default()),
            scheduler: Arc::new(MemoryScheduler::new()),
            notifier: Arc::new(MemoryNotifier::default()),
            prefs: prefs.clone(),
        };
        let services = RuntimeServices {
            steps: Arc::new(MemorySteps::new(0)),
            shield: shield.clone(),
            scheduler: device.scheduler.clone(),
            notifier: device.notifier.clone(),
            identity: Arc::new(MemoryIdentity::default()),
        };
        (GateRuntime::new(services, prefs, Config::default()).unwrap(), device)
    };

    let invocation = TaskInvocation::new(TaskKind::Reblock, tuesday(4, 0), Duration::from_secs(30));
    let done = rt.handle_reblock(invocation).await.unwrap();

    assert!(done.expired);
    assert_eq!(done.rescheduled_for, None);
    assert!(device.scheduler.submissions().is_empty());
    assert!(device.prefs.apps_unblocked());
}

#[tokio::test(start_paused = true)]
async fn test_second_invocation_of_running_kind_is_refused() {
    let prefs = Preferences::in_memory();
    prefs.set_step_threshold(5000).unwrap();
    let (rt, _device) = build(Arc::new(StalledSteps), prefs);

    let first = TaskInvocation::new(TaskKind::StepCheck, monday(10, 0), Duration::from_secs(30));
    let second = TaskInvocation::new(TaskKind::StepCheck, monday(10, 1), Duration::from_secs(30));
    let (a, b) = tokio::join!(rt.handle_step_check(first), rt.handle_step_check(second));

    assert!(a.unwrap().expired);
    assert!(matches!(
        b,
        Err(CoreError::Task(TaskError::AlreadyRunning(TaskKind::StepCheck)))
    ));
}

/// A shield whose calls never return within a task budget.
#[derive(Default)]
struct StalledShield;

#[async_trait]
impl ShieldEnforcer for StalledShield {
    async fn set_restriction(&self, _selection: &ActivitySelection) -> Result<(), ServiceError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(())
    }

    async fn clear_restriction(&self) -> Result<(), ServiceError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(())
    }

    async fn authorization_status(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }

    async fn request_authorization(&self) -> Result<AuthorizationStatus, ServiceError> {
        Ok(AuthorizationStatus::Authorized)
    }
}
