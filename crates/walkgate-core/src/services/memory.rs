//! In-memory collaborators.
//!
//! Every fake records what it was asked to do and can be told to fail, so
//! the runtime can be exercised end to end without a device.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Local};

use super::traits::{
    AuthorizationStatus, BackgroundScheduler, CredentialState, IdentityProvider, Notification,
    Notifier, ShieldEnforcer, StepCallback, StepSource,
};
use crate::error::{Capability, SchedulingError, ServiceError};
use crate::selection::ActivitySelection;
use crate::tasks::{TaskKind, TaskRequest};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Current grant plus the answer the user gives when asked.
#[derive(Debug)]
pub struct Grant {
    capability: Capability,
    status: Mutex<AuthorizationStatus>,
    answer: Mutex<AuthorizationStatus>,
    requests: Mutex<u32>,
}

impl Grant {
    fn new(capability: Capability, status: AuthorizationStatus) -> Self {
        Self {
            capability,
            status: Mutex::new(status),
            answer: Mutex::new(AuthorizationStatus::Authorized),
            requests: Mutex::new(0),
        }
    }

    pub fn status(&self) -> AuthorizationStatus {
        *lock(&self.status)
    }

    pub fn set_status(&self, status: AuthorizationStatus) {
        *lock(&self.status) = status;
    }

    /// What the next authorization request resolves to.
    pub fn answer_with(&self, answer: AuthorizationStatus) {
        *lock(&self.answer) = answer;
    }

    /// How many times authorization was requested.
    pub fn requests(&self) -> u32 {
        *lock(&self.requests)
    }

    fn request(&self) -> Result<AuthorizationStatus, ServiceError> {
        *lock(&self.requests) += 1;
        let answer = *lock(&self.answer);
        self.set_status(answer);
        match answer {
            AuthorizationStatus::Denied => Err(ServiceError::AuthorizationDenied {
                capability: self.capability,
            }),
            other => Ok(other),
        }
    }
}

// ── Steps ────────────────────────────────────────────────────────────

pub struct MemorySteps {
    count: Mutex<u64>,
    callbacks: Mutex<Vec<StepCallback>>,
    fail_fetch: AtomicBool,
    pub grant: Grant,
}

impl Default for MemorySteps {
    fn default() -> Self {
        Self {
            count: Mutex::new(0),
            callbacks: Mutex::new(Vec::new()),
            fail_fetch: AtomicBool::new(false),
            grant: Grant::new(Capability::StepObservation, AuthorizationStatus::Authorized),
        }
    }
}

impl MemorySteps {
    pub fn new(count: u64) -> Self {
        let steps = Self::default();
        *lock(&steps.count) = count;
        steps
    }

    /// Record a new cumulative count and notify subscribers.
    pub fn set_count(&self, count: u64) {
        *lock(&self.count) = count;
        for callback in lock(&self.callbacks).iter() {
            callback(count);
        }
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StepSource for MemorySteps {
    async fn today_step_count(&self) -> Result<u64, ServiceError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ServiceError::failed("steps", "query failed"));
        }
        if !self.grant.status().is_authorized() {
            return Err(ServiceError::AuthorizationDenied {
                capability: Capability::StepObservation,
            });
        }
        Ok(*lock(&self.count))
    }

    fn subscribe(&self, callback: StepCallback) {
        lock(&self.callbacks).push(callback);
    }

    async fn authorization_status(&self) -> AuthorizationStatus {
        self.grant.status()
    }

    async fn request_authorization(&self) -> Result<AuthorizationStatus, ServiceError> {
        self.grant.request()
    }
}

// ── Shield ───────────────────────────────────────────────────────────

/// One call made to the enforcer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShieldCall {
    Set(ActivitySelection),
    Clear,
}

pub struct MemoryShield {
    restriction: Mutex<Option<ActivitySelection>>,
    calls: Mutex<Vec<ShieldCall>>,
    fail_next: AtomicBool,
    pub grant: Grant,
}

impl Default for MemoryShield {
    fn default() -> Self {
        Self {
            restriction: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
            grant: Grant::new(Capability::ShieldEnforcement, AuthorizationStatus::Authorized),
        }
    }
}

impl MemoryShield {
    /// What is currently restricted; `None` once cleared.
    pub fn restriction(&self) -> Option<ActivitySelection> {
        lock(&self.restriction).clone()
    }

    pub fn calls(&self) -> Vec<ShieldCall> {
        lock(&self.calls).clone()
    }

    /// Make the next set or clear fail once.
    pub fn fail_next_call(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ServiceError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::failed("shield", "managed settings store rejected the change"));
        }
        if !self.grant.status().is_authorized() {
            return Err(ServiceError::AuthorizationDenied {
                capability: Capability::ShieldEnforcement,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ShieldEnforcer for MemoryShield {
    async fn set_restriction(&self, selection: &ActivitySelection) -> Result<(), ServiceError> {
        self.check()?;
        lock(&self.calls).push(ShieldCall::Set(selection.clone()));
        *lock(&self.restriction) = Some(selection.clone());
        Ok(())
    }

    async fn clear_restriction(&self) -> Result<(), ServiceError> {
        self.check()?;
        lock(&self.calls).push(ShieldCall::Clear);
        *lock(&self.restriction) = None;
        Ok(())
    }

    async fn authorization_status(&self) -> AuthorizationStatus {
        self.grant.status()
    }

    async fn request_authorization(&self) -> Result<AuthorizationStatus, ServiceError> {
        self.grant.request()
    }
}

// ── Background scheduler ─────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryScheduler {
    pending: Mutex<BTreeMap<TaskKind, DateTime<Local>>>,
    submissions: Mutex<Vec<TaskRequest>>,
    cancellations: Mutex<Vec<TaskKind>>,
    reject_with: Mutex<Option<SchedulingError>>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted submission, in order.
    pub fn submissions(&self) -> Vec<TaskRequest> {
        lock(&self.submissions).clone()
    }

    pub fn submissions_of(&self, kind: TaskKind) -> Vec<TaskRequest> {
        self.submissions()
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect()
    }

    pub fn cancellations(&self) -> Vec<TaskKind> {
        lock(&self.cancellations).clone()
    }

    /// Earliest time of the outstanding request for `kind`.
    pub fn pending_at(&self, kind: TaskKind) -> Option<DateTime<Local>> {
        lock(&self.pending).get(&kind).copied()
    }

    /// Reject every submission with `error` until cleared with `None`.
    pub fn reject_with(&self, error: Option<SchedulingError>) {
        *lock(&self.reject_with) = error;
    }

    /// The host dropped the request (or handed it to a handler).
    pub fn drop_pending(&self, kind: TaskKind) {
        lock(&self.pending).remove(&kind);
    }
}

#[async_trait]
impl BackgroundScheduler for MemoryScheduler {
    async fn submit(&self, request: &TaskRequest) -> Result<(), SchedulingError> {
        if let Some(error) = lock(&self.reject_with).clone() {
            return Err(error);
        }
        lock(&self.pending).insert(request.kind, request.earliest);
        lock(&self.submissions).push(*request);
        Ok(())
    }

    async fn cancel(&self, kind: TaskKind) {
        lock(&self.pending).remove(&kind);
        lock(&self.cancellations).push(kind);
    }

    async fn pending(&self) -> BTreeSet<TaskKind> {
        lock(&self.pending).keys().copied().collect()
    }
}

// ── Notifications ────────────────────────────────────────────────────

pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    pub grant: Grant,
}

impl Default for MemoryNotifier {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            grant: Grant::new(Capability::Notifications, AuthorizationStatus::Authorized),
        }
    }
}

impl MemoryNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), ServiceError> {
        lock(&self.sent).push(notification.clone());
        Ok(())
    }

    async fn authorization_status(&self) -> AuthorizationStatus {
        self.grant.status()
    }

    async fn request_authorization(&self) -> Result<AuthorizationStatus, ServiceError> {
        self.grant.request()
    }
}

// ── Identity ─────────────────────────────────────────────────────────

pub struct MemoryIdentity {
    state: Mutex<CredentialState>,
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self {
            state: Mutex::new(CredentialState::Authorized),
        }
    }
}

impl MemoryIdentity {
    pub fn set_state(&self, state: CredentialState) {
        *lock(&self.state) = state;
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn credential_state(&self, _user_id: &str) -> CredentialState {
        *lock(&self.state)
    }
}
