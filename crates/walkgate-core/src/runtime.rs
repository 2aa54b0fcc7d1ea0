//! Application root.
//!
//! [`GateRuntime`] owns every collaborator and every controller. The host
//! constructs exactly one and routes its three triggers into it: foreground
//! activation ([`GateRuntime::on_became_active`]) and the two background
//! task handlers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Capability, ConfigError, Result, ServiceError};
use crate::events::{Event, EventBus};
use crate::gating::{day_reset, decide, Decision, GateInput, GatePolicy, GateProgress};
use crate::selection::ActivitySelection;
use crate::services::{
    AuthorizationStatus, BackgroundScheduler, CredentialState, IdentityProvider, Notification,
    Notifier, ShieldEnforcer, StepSource,
};
use crate::shield::{ShieldController, ShieldState};
use crate::storage::{Config, Preferences, UserIdentity};
use crate::tasks::{
    DispatchReport, TaskCompletion, TaskDispatcher, TaskInvocation, TaskKind, TaskRequest,
};

/// The external services, as supplied by the host.
#[derive(Clone)]
pub struct RuntimeServices {
    pub steps: Arc<dyn StepSource>,
    pub shield: Arc<dyn ShieldEnforcer>,
    pub scheduler: Arc<dyn BackgroundScheduler>,
    pub notifier: Arc<dyn Notifier>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Grant state of the three capabilities after a reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorizations {
    pub step_observation: AuthorizationStatus,
    pub shield_enforcement: AuthorizationStatus,
    pub notifications: AuthorizationStatus,
}

impl Authorizations {
    /// Capabilities that are not granted.
    pub fn degraded(&self) -> Vec<Capability> {
        [
            (Capability::StepObservation, self.step_observation),
            (Capability::ShieldEnforcement, self.shield_enforcement),
            (Capability::Notifications, self.notifications),
        ]
        .into_iter()
        .filter(|(_, status)| !status.is_authorized())
        .map(|(capability, _)| capability)
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Reconciled,
    /// Onboarding has not finished; nothing was touched.
    OnboardingIncomplete,
    /// The stored sign-in is gone; onboarding was reset.
    CredentialInvalid,
}

/// What one reconciliation observed and did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub outcome: ReconcileOutcome,
    pub at: DateTime<Local>,
    pub step_count: u64,
    pub threshold: u64,
    pub authorizations: Authorizations,
    pub degraded: Vec<Capability>,
    pub state_before: ShieldState,
    pub state_after: ShieldState,
    pub decision: Option<Decision>,
    /// Whether the decision was applied to the shield and the scheduler.
    pub applied: bool,
    pub dispatch: DispatchReport,
    /// Non-fatal failures encountered along the way.
    pub errors: Vec<String>,
}

impl ReconcileReport {
    fn skipped(outcome: ReconcileOutcome, at: DateTime<Local>, state: ShieldState) -> Self {
        Self {
            outcome,
            at,
            step_count: 0,
            threshold: 0,
            authorizations: Authorizations::default(),
            degraded: Vec::new(),
            state_before: state,
            state_after: state,
            decision: None,
            applied: false,
            dispatch: DispatchReport::default(),
            errors: Vec::new(),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct GateRuntime {
    services: RuntimeServices,
    prefs: Preferences,
    config: Config,
    policy: GatePolicy,
    shield: ShieldController,
    dispatcher: TaskDispatcher,
    events: EventBus,
    last_step_count: Arc<Mutex<Option<u64>>>,
}

impl GateRuntime {
    /// Wire the runtime.
    ///
    /// # Errors
    /// Fails when the gating section of `config` is invalid.
    pub fn new(
        services: RuntimeServices,
        prefs: Preferences,
        config: Config,
    ) -> std::result::Result<Self, ConfigError> {
        let policy = config.gate_policy()?;
        let events = EventBus::default();
        let shield = ShieldController::load(services.shield.clone(), prefs.clone(), events.clone());
        let dispatcher = TaskDispatcher::new(services.scheduler.clone(), events.clone());
        Ok(Self {
            services,
            prefs,
            config,
            policy,
            shield,
            dispatcher,
            events,
            last_step_count: Arc::new(Mutex::new(None)),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn prefs(&self) -> &Preferences {
        &self.prefs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn shield(&self) -> &ShieldController {
        &self.shield
    }

    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    /// Most recent count seen from the step source.
    pub fn last_step_count(&self) -> Option<u64> {
        *lock(&self.last_step_count)
    }

    fn expiration_grace(&self) -> StdDuration {
        StdDuration::from_secs(self.config.tasks.expiration_grace_secs)
    }

    // ── Foreground ───────────────────────────────────────────────────

    /// The app came to the foreground.
    pub async fn on_became_active(&self, now: DateTime<Local>) -> Result<ReconcileReport> {
        if !self.prefs.onboarding_complete() {
            debug!("onboarding incomplete, skipping reconciliation");
            let state = self.shield.state().await;
            return Ok(ReconcileReport::skipped(ReconcileOutcome::OnboardingIncomplete, now, state));
        }

        let credential = match self.prefs.identity() {
            Some(identity) => Some(self.services.identity.credential_state(&identity.user_id).await),
            None => None,
        };
        match credential {
            Some(CredentialState::Authorized) | Some(CredentialState::Unknown) => {
                self.reconcile(now).await
            }
            Some(CredentialState::Revoked) | Some(CredentialState::NotFound) | None => {
                info!(?credential, "sign-in no longer valid, resetting onboarding");
                self.prefs.set_onboarding_complete(false)?;
                self.events.publish(Event::OnboardingReset { at: now });
                let state = self.shield.state().await;
                Ok(ReconcileReport::skipped(ReconcileOutcome::CredentialInvalid, now, state))
            }
        }
    }

    /// Bring the shield and the pending tasks in line with the current step
    /// count. Safe to call any number of times.
    pub async fn reconcile(&self, now: DateTime<Local>) -> Result<ReconcileReport> {
        let authorizations = self.refresh_authorizations(now).await;
        let step_count = self.fetch_steps(authorizations.step_observation, now).await;
        let threshold = self.prefs.step_threshold();
        let can_enforce = authorizations.shield_enforcement.is_authorized();
        let mut errors = Vec::new();

        if can_enforce {
            if let Err(e) = self.shield.reassert().await {
                warn!(error = %e, "could not reassert shield state");
                errors.push(e.to_string());
            }
        }

        let state_before = self.shield.state().await;
        let input = GateInput {
            step_count,
            threshold,
            state: state_before,
            unblocked_since: self.shield.unblocked_since().await,
            now,
        };
        let decision = decide(&input, &self.policy);
        debug!(branch = ?decision.branch, step_count, threshold, "reconcile decision");

        let mut dispatch = DispatchReport::default();
        if can_enforce {
            if let Err(e) = self.apply_transition(state_before, &decision, now).await {
                warn!(error = %e, "could not apply shield transition");
                errors.push(e.to_string());
            }
            dispatch = self.dispatcher.ensure(&decision).await;
        } else {
            warn!("shield enforcement not authorized, decision not applied");
        }

        Ok(ReconcileReport {
            outcome: ReconcileOutcome::Reconciled,
            at: now,
            step_count,
            threshold,
            degraded: authorizations.degraded(),
            authorizations,
            state_before,
            state_after: self.shield.state().await,
            decision: Some(decision),
            applied: can_enforce,
            dispatch,
            errors,
        })
    }

    /// Finish first-run setup: record the user, arm the first step check
    /// and reconcile.
    pub async fn complete_onboarding(
        &self,
        identity: &UserIdentity,
        now: DateTime<Local>,
    ) -> Result<ReconcileReport> {
        self.prefs.save_identity(identity)?;
        self.prefs.set_onboarding_complete(true)?;
        info!(user_id = %identity.user_id, "onboarding complete");

        let first = TaskRequest::new(TaskKind::StepCheck, self.policy.next_step_check_at(&now));
        if let Err(e) = self.dispatcher.request(&first).await {
            debug!(error = %e, "first step check rejected, reconciliation retries it");
        }

        self.reconcile(now).await
    }

    /// The user picked a new set of apps, categories and domains.
    pub async fn update_selection(
        &self,
        selection: ActivitySelection,
        now: DateTime<Local>,
    ) -> Result<bool> {
        let changed = self.shield.replace_selection(selection, now).await?;
        if changed && self.shield.state().await == ShieldState::Blocked {
            self.shield.reapply(now).await?;
        }
        Ok(changed)
    }

    /// The user edited the step goal. Unlike the passive path, an explicit
    /// edit re-evaluates the shield from scratch and may block mid-day.
    pub async fn update_threshold(&self, threshold: u64, now: DateTime<Local>) -> Result<Decision> {
        self.prefs.set_step_threshold(threshold)?;
        let status = self.services.steps.authorization_status().await;
        let step_count = self.fetch_steps(status, now).await;

        let mut decision = decide(
            &GateInput {
                step_count,
                threshold,
                state: ShieldState::Blocked,
                unblocked_since: None,
                now,
            },
            &self.policy,
        );
        if decision.next_state == ShieldState::Blocked {
            // Blocked again before the nightly reset; that Reblock is moot.
            decision.cancel.push(TaskKind::Reblock);
        }
        info!(threshold, step_count, branch = ?decision.branch, "step threshold updated");

        match decision.next_state {
            ShieldState::Unblocked => self.shield.clear_shield(now).await?,
            ShieldState::Blocked => self.shield.reapply(now).await?,
        }
        self.dispatcher.ensure(&decision).await;
        Ok(decision)
    }

    /// Forward pushed step counts to the event bus.
    pub fn watch_steps(&self) {
        let cache = self.last_step_count.clone();
        let events = self.events.clone();
        self.services.steps.subscribe(Box::new(move |step_count| {
            let previous = lock(&cache).replace(step_count);
            if previous != Some(step_count) {
                events.publish(Event::StepCountChanged {
                    step_count,
                    at: Local::now(),
                });
            }
        }));
    }

    pub fn progress(&self) -> GateProgress {
        GateProgress::new(
            self.last_step_count().unwrap_or(0),
            self.prefs.step_threshold(),
            self.policy.reblock_at,
        )
    }

    // ── Background tasks ─────────────────────────────────────────────

    /// Handle a StepCheck firing.
    ///
    /// When the work overruns its budget the invocation fails and the next
    /// StepCheck is armed one interval after the original fire time.
    pub async fn handle_step_check(&self, invocation: TaskInvocation) -> Result<TaskCompletion> {
        let kind = TaskKind::StepCheck;
        self.dispatcher.begin(kind, invocation.fired_at)?;
        let budget = invocation.work_budget(self.expiration_grace());

        let completion = match tokio::time::timeout(budget, self.step_check(invocation.fired_at)).await {
            Ok(Ok(decision)) => TaskCompletion {
                kind,
                success: true,
                expired: false,
                rescheduled_for: decision.request_for(kind).map(|r| r.earliest),
                decision: Some(decision),
            },
            Ok(Err(e)) => {
                warn!(error = %e, "step check failed, rescheduling");
                let next = self.reschedule_step_check(invocation.fired_at).await;
                TaskCompletion {
                    kind,
                    success: false,
                    expired: false,
                    rescheduled_for: next,
                    decision: None,
                }
            }
            Err(_) => {
                warn!(budget_ms = budget.as_millis() as u64, "step check expired, rescheduling");
                let next = self.reschedule_step_check(invocation.fired_at).await;
                self.events.publish(Event::TaskExpired {
                    kind,
                    rescheduled_for: next,
                    at: Local::now(),
                });
                TaskCompletion {
                    kind,
                    success: false,
                    expired: true,
                    rescheduled_for: next,
                    decision: None,
                }
            }
        };

        self.dispatcher.finish(kind, completion.success);
        Ok(completion)
    }

    /// Handle a Reblock firing.
    ///
    /// An expired Reblock is not rescheduled; the next foreground
    /// reconciliation notices the missed reset.
    pub async fn handle_reblock(&self, invocation: TaskInvocation) -> Result<TaskCompletion> {
        let kind = TaskKind::Reblock;
        self.dispatcher.begin(kind, invocation.fired_at)?;
        let budget = invocation.work_budget(self.expiration_grace());

        let completion = match tokio::time::timeout(budget, self.reblock(invocation.fired_at)).await {
            Ok(Ok(decision)) => TaskCompletion {
                kind,
                success: true,
                expired: false,
                rescheduled_for: None,
                decision,
            },
            Ok(Err(e)) => {
                warn!(error = %e, "reblock failed");
                TaskCompletion {
                    kind,
                    success: false,
                    expired: false,
                    rescheduled_for: None,
                    decision: None,
                }
            }
            Err(_) => {
                warn!(budget_ms = budget.as_millis() as u64, "reblock expired");
                self.events.publish(Event::TaskExpired {
                    kind,
                    rescheduled_for: None,
                    at: Local::now(),
                });
                TaskCompletion {
                    kind,
                    success: false,
                    expired: true,
                    rescheduled_for: None,
                    decision: None,
                }
            }
        };

        self.dispatcher.finish(kind, completion.success);
        Ok(completion)
    }

    async fn step_check(&self, fired_at: DateTime<Local>) -> Result<Decision> {
        let status = self.services.steps.authorization_status().await;
        let step_count = self.fetch_steps(status, fired_at).await;
        let threshold = self.prefs.step_threshold();
        let state = self.shield.state().await;

        let decision = decide(
            &GateInput {
                step_count,
                threshold,
                state,
                unblocked_since: self.shield.unblocked_since().await,
                now: fired_at,
            },
            &self.policy,
        );
        debug!(branch = ?decision.branch, step_count, threshold, "step check decision");

        self.apply_transition(state, &decision, fired_at).await?;
        self.dispatcher.apply(&decision).await;
        Ok(decision)
    }

    async fn reblock(&self, fired_at: DateTime<Local>) -> Result<Option<Decision>> {
        if self.shield.state().await == ShieldState::Blocked {
            debug!("shield already up, nothing to reblock");
            return Ok(None);
        }

        let decision = day_reset(&fired_at, &self.policy);
        self.shield.reapply(fired_at).await?;
        info!("shield reset for the day");
        self.notify(Notification::blocked_for_the_day(self.prefs.step_threshold()))
            .await;
        self.dispatcher.apply(&decision).await;
        Ok(Some(decision))
    }

    async fn reschedule_step_check(&self, fired_at: DateTime<Local>) -> Option<DateTime<Local>> {
        let request = TaskRequest::new(TaskKind::StepCheck, self.policy.next_step_check_at(&fired_at));
        self.dispatcher.request(&request).await.ok().map(|_| request.earliest)
    }

    /// Move the shield to `decision.next_state`.
    async fn apply_transition(
        &self,
        from: ShieldState,
        decision: &Decision,
        now: DateTime<Local>,
    ) -> Result<()> {
        match (from, decision.next_state) {
            (ShieldState::Blocked, ShieldState::Unblocked) => {
                self.shield.clear_shield(now).await?;
                self.notify(Notification::goal_reached()).await;
            }
            (ShieldState::Unblocked, ShieldState::Unblocked) if decision.reset_overdue => {
                // Missed reset, but today's goal is already met.
                self.shield.renew_unblock(now).await?;
            }
            (ShieldState::Unblocked, ShieldState::Blocked) => {
                self.shield.reapply(now).await?;
                self.notify(Notification::blocked_for_the_day(self.prefs.step_threshold()))
                    .await;
            }
            _ => {}
        }
        Ok(())
    }

    // ── Collaborators ────────────────────────────────────────────────

    async fn fetch_steps(&self, status: AuthorizationStatus, now: DateTime<Local>) -> u64 {
        let cached = self.last_step_count();
        if !status.is_authorized() {
            debug!("step observation not authorized, using last known count");
            return cached.unwrap_or(0);
        }
        match self.services.steps.today_step_count().await {
            Ok(step_count) => {
                *lock(&self.last_step_count) = Some(step_count);
                if cached != Some(step_count) {
                    self.events.publish(Event::StepCountChanged { step_count, at: now });
                }
                step_count
            }
            Err(e) => {
                warn!(error = %e, "step count fetch failed, using last known count");
                cached.unwrap_or(0)
            }
        }
    }

    async fn refresh_authorizations(&self, now: DateTime<Local>) -> Authorizations {
        let steps = self.services.steps.clone();
        let shield = self.services.shield.clone();
        let notifier = self.services.notifier.clone();

        Authorizations {
            step_observation: self
                .authorize(
                    Capability::StepObservation,
                    steps.authorization_status().await,
                    || async move { steps.request_authorization().await },
                    now,
                )
                .await,
            shield_enforcement: self
                .authorize(
                    Capability::ShieldEnforcement,
                    shield.authorization_status().await,
                    || async move { shield.request_authorization().await },
                    now,
                )
                .await,
            notifications: self
                .authorize(
                    Capability::Notifications,
                    notifier.authorization_status().await,
                    || async move { notifier.request_authorization().await },
                    now,
                )
                .await,
        }
    }

    /// Re-request `capability` unless it is already granted.
    async fn authorize<F, Fut>(
        &self,
        capability: Capability,
        current: AuthorizationStatus,
        request: F,
        now: DateTime<Local>,
    ) -> AuthorizationStatus
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<AuthorizationStatus, ServiceError>>,
    {
        if current.is_authorized() {
            return current;
        }
        let status = match request().await {
            Ok(status) => status,
            Err(ServiceError::AuthorizationDenied { .. }) => AuthorizationStatus::Denied,
            Err(e) => {
                warn!(%capability, error = %e, "authorization request failed");
                current
            }
        };
        if status != current {
            info!(%capability, ?status, "authorization changed");
            self.events.publish(Event::AuthorizationChanged {
                capability,
                status,
                at: now,
            });
        }
        status
    }

    async fn notify(&self, notification: Notification) {
        if !self.config.notifications.enabled {
            return;
        }
        if !self.services.notifier.authorization_status().await.is_authorized() {
            debug!(title = %notification.title, "notifications not authorized, skipping");
            return;
        }
        if let Err(e) = self.services.notifier.send(&notification).await {
            warn!(error = %e, "could not send notification");
        }
    }
}
