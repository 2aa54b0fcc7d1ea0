//! Simulated device.
//!
//! Stands in for the platform services so the gating loop can be driven from
//! a terminal. Everything the device "knows" (today's step count, capability
//! grants, the applied restriction, pending background tasks, delivered
//! notifications) lives in the same SQLite kv table as the preferences,
//! under the `device.` prefix, so it survives between invocations.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkgate_core::services::{
    AuthorizationStatus, BackgroundScheduler, CredentialState, IdentityProvider, Notification,
    Notifier, ShieldEnforcer, StepCallback, StepSource,
};
use walkgate_core::storage::Preferences;
use walkgate_core::{
    ActivitySelection, Capability, Config, Database, GateRuntime, RuntimeServices,
    SchedulingError, ServiceError, StoreError, TaskKind, TaskRequest,
};

const STEPS_KEY: &str = "device.steps";
const RESTRICTION_KEY: &str = "device.restriction";
const NOTIFICATIONS_KEY: &str = "device.notifications";
const CREDENTIAL_KEY: &str = "device.credential";
const PENDING_PREFIX: &str = "device.pending.";
const SCHEDULER_ERROR_KEY: &str = "device.scheduler_error";

fn auth_key(capability: Capability) -> String {
    let slug = match capability {
        Capability::StepObservation => "step_observation",
        Capability::ShieldEnforcement => "shield_enforcement",
        Capability::Notifications => "notifications",
    };
    format!("device.auth.{slug}")
}

fn status_name(status: AuthorizationStatus) -> &'static str {
    match status {
        AuthorizationStatus::NotDetermined => "not_determined",
        AuthorizationStatus::Authorized => "authorized",
        AuthorizationStatus::Denied => "denied",
    }
}

fn parse_status(raw: &str) -> AuthorizationStatus {
    match raw {
        "authorized" => AuthorizationStatus::Authorized,
        "denied" => AuthorizationStatus::Denied,
        _ => AuthorizationStatus::NotDetermined,
    }
}

fn credential_name(state: CredentialState) -> &'static str {
    match state {
        CredentialState::Authorized => "authorized",
        CredentialState::Revoked => "revoked",
        CredentialState::NotFound => "not_found",
        CredentialState::Unknown => "unknown",
    }
}

/// A delivered notification, as recorded by the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivered {
    pub at: DateTime<Local>,
    #[serde(flatten)]
    pub notification: Notification,
}

pub struct SimulatedDevice {
    db: Arc<Database>,
    identifier_prefix: String,
    callbacks: Mutex<Vec<StepCallback>>,
    latency: Mutex<Duration>,
}

impl SimulatedDevice {
    pub fn new(db: Arc<Database>, identifier_prefix: impl Into<String>) -> Self {
        Self {
            db,
            identifier_prefix: identifier_prefix.into(),
            callbacks: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Delay every step query and shield change by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut current) = self.latency.lock() {
            *current = latency;
        }
    }

    async fn simulate_work(&self) {
        let latency = self.latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn service_error(service: &str, e: StoreError) -> ServiceError {
        ServiceError::failed(service, e.to_string())
    }

    // ── Inspection & control ─────────────────────────────────────────

    pub fn steps(&self) -> Result<u64, StoreError> {
        Ok(self
            .db
            .kv_get(STEPS_KEY)?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }

    /// Record a new cumulative count and push it to subscribers.
    pub fn set_steps(&self, count: u64) -> Result<(), StoreError> {
        self.db.kv_set(STEPS_KEY, &count.to_string())?;
        let callbacks = self.callbacks.lock().map_err(|_| StoreError::Poisoned)?;
        for callback in callbacks.iter() {
            callback(count);
        }
        Ok(())
    }

    pub fn authorization(&self, capability: Capability) -> AuthorizationStatus {
        match self.db.kv_get(&auth_key(capability)) {
            Ok(Some(raw)) => parse_status(&raw),
            Ok(None) => AuthorizationStatus::Authorized,
            Err(e) => {
                warn!(%capability, error = %e, "could not read grant");
                AuthorizationStatus::NotDetermined
            }
        }
    }

    pub fn set_authorization(
        &self,
        capability: Capability,
        status: AuthorizationStatus,
    ) -> Result<(), StoreError> {
        self.db.kv_set(&auth_key(capability), status_name(status))
    }

    fn request(&self, capability: Capability) -> Result<AuthorizationStatus, ServiceError> {
        match self.authorization(capability) {
            AuthorizationStatus::Denied => Err(ServiceError::AuthorizationDenied { capability }),
            // The simulated user accepts every prompt they have not declined.
            AuthorizationStatus::NotDetermined => {
                self.set_authorization(capability, AuthorizationStatus::Authorized)
                    .map_err(|e| Self::service_error("authorization", e))?;
                Ok(AuthorizationStatus::Authorized)
            }
            AuthorizationStatus::Authorized => Ok(AuthorizationStatus::Authorized),
        }
    }

    fn require(&self, capability: Capability) -> Result<(), ServiceError> {
        if self.authorization(capability).is_authorized() {
            Ok(())
        } else {
            Err(ServiceError::AuthorizationDenied { capability })
        }
    }

    /// What the device currently restricts, if anything.
    pub fn restriction(&self) -> Option<ActivitySelection> {
        let blob = self.db.kv_get(RESTRICTION_KEY).ok().flatten()?;
        ActivitySelection::from_blob(&blob).ok()
    }

    /// Pending requests with their earliest start.
    pub fn pending_requests(&self) -> Result<Vec<TaskRequest>, StoreError> {
        let mut requests = Vec::new();
        for kind in TaskKind::ALL {
            let key = self.pending_key(kind);
            if let Some(raw) = self.db.kv_get(&key)? {
                match DateTime::parse_from_rfc3339(&raw) {
                    Ok(earliest) => requests.push(TaskRequest::new(kind, earliest.with_timezone(&Local))),
                    Err(e) => warn!(%kind, error = %e, "dropping malformed pending request"),
                }
            }
        }
        Ok(requests)
    }

    /// The host launched the task, so it is no longer pending.
    pub fn take_pending(&self, kind: TaskKind) -> Result<Option<DateTime<Local>>, StoreError> {
        let earliest = self
            .pending_requests()?
            .into_iter()
            .find(|r| r.kind == kind)
            .map(|r| r.earliest);
        self.db.kv_remove(&self.pending_key(kind))?;
        Ok(earliest)
    }

    fn pending_key(&self, kind: TaskKind) -> String {
        format!("{PENDING_PREFIX}{}", kind.identifier(&self.identifier_prefix))
    }

    /// Make every submission fail with `code` until cleared.
    pub fn set_scheduler_error(&self, code: Option<i64>) -> Result<(), StoreError> {
        match code {
            Some(code) => self.db.kv_set(SCHEDULER_ERROR_KEY, &code.to_string()),
            None => self.db.kv_remove(SCHEDULER_ERROR_KEY),
        }
    }

    pub fn notifications(&self) -> Vec<Delivered> {
        self.db
            .kv_get(NOTIFICATIONS_KEY)
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn set_credential(&self, state: CredentialState) -> Result<(), StoreError> {
        self.db.kv_set(CREDENTIAL_KEY, credential_name(state))
    }

    fn credential(&self) -> CredentialState {
        match self.db.kv_get(CREDENTIAL_KEY) {
            Ok(Some(raw)) => match raw.as_str() {
                "authorized" => CredentialState::Authorized,
                "revoked" => CredentialState::Revoked,
                "not_found" => CredentialState::NotFound,
                _ => CredentialState::Unknown,
            },
            Ok(None) => CredentialState::Authorized,
            Err(_) => CredentialState::Unknown,
        }
    }
}

#[async_trait]
impl StepSource for SimulatedDevice {
    async fn today_step_count(&self) -> Result<u64, ServiceError> {
        self.require(Capability::StepObservation)?;
        self.simulate_work().await;
        self.steps().map_err(|e| Self::service_error("steps", e))
    }

    fn subscribe(&self, callback: StepCallback) {
        match self.callbacks.lock() {
            Ok(mut callbacks) => callbacks.push(callback),
            Err(_) => warn!("step subscribers poisoned, dropping subscription"),
        }
    }

    async fn authorization_status(&self) -> AuthorizationStatus {
        self.authorization(Capability::StepObservation)
    }

    async fn request_authorization(&self) -> Result<AuthorizationStatus, ServiceError> {
        self.request(Capability::StepObservation)
    }
}

#[async_trait]
impl ShieldEnforcer for SimulatedDevice {
    async fn set_restriction(&self, selection: &ActivitySelection) -> Result<(), ServiceError> {
        self.require(Capability::ShieldEnforcement)?;
        let blob = selection
            .to_blob()
            .map_err(|e| ServiceError::failed("shield", e.to_string()))?;
        self.db
            .kv_set(RESTRICTION_KEY, &blob)
            .map_err(|e| Self::service_error("shield", e))
    }

    async fn clear_restriction(&self) -> Result<(), ServiceError> {
        self.require(Capability::ShieldEnforcement)?;
        self.simulate_work().await;
        self.db
            .kv_remove(RESTRICTION_KEY)
            .map_err(|e| Self::service_error("shield", e))
    }

    async fn authorization_status(&self) -> AuthorizationStatus {
        self.authorization(Capability::ShieldEnforcement)
    }

    async fn request_authorization(&self) -> Result<AuthorizationStatus, ServiceError> {
        self.request(Capability::ShieldEnforcement)
    }
}

#[async_trait]
impl BackgroundScheduler for SimulatedDevice {
    async fn submit(&self, request: &TaskRequest) -> Result<(), SchedulingError> {
        if let Ok(Some(raw)) = self.db.kv_get(SCHEDULER_ERROR_KEY) {
            let code = raw.parse().unwrap_or(-1);
            return Err(SchedulingError::from_code(code, "simulated scheduler failure"));
        }
        self.db
            .kv_set(&self.pending_key(request.kind), &request.earliest.to_rfc3339())
            .map_err(|e| SchedulingError::Unclassified {
                code: -1,
                message: e.to_string(),
            })
    }

    async fn cancel(&self, kind: TaskKind) {
        if let Err(e) = self.db.kv_remove(&self.pending_key(kind)) {
            warn!(%kind, error = %e, "could not cancel pending request");
        }
    }

    async fn pending(&self) -> BTreeSet<TaskKind> {
        match self.db.kv_keys(PENDING_PREFIX) {
            Ok(keys) => keys
                .iter()
                .filter_map(|key| key.strip_prefix(PENDING_PREFIX))
                .filter_map(|id| TaskKind::from_identifier(&self.identifier_prefix, id))
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not list pending requests");
                BTreeSet::new()
            }
        }
    }
}

#[async_trait]
impl Notifier for SimulatedDevice {
    async fn send(&self, notification: &Notification) -> Result<(), ServiceError> {
        self.require(Capability::Notifications)?;
        let mut log = self.notifications();
        log.push(Delivered {
            at: Local::now(),
            notification: notification.clone(),
        });
        let raw = serde_json::to_string(&log).map_err(|e| ServiceError::failed("notifications", e.to_string()))?;
        debug!(title = %notification.title, "notification delivered");
        self.db
            .kv_set(NOTIFICATIONS_KEY, &raw)
            .map_err(|e| Self::service_error("notifications", e))
    }

    async fn authorization_status(&self) -> AuthorizationStatus {
        self.authorization(Capability::Notifications)
    }

    async fn request_authorization(&self) -> Result<AuthorizationStatus, ServiceError> {
        self.request(Capability::Notifications)
    }
}

#[async_trait]
impl IdentityProvider for SimulatedDevice {
    async fn credential_state(&self, _user_id: &str) -> CredentialState {
        self.credential()
    }
}

/// The simulated device over the opened database and a runtime wired to it.
pub struct Session {
    pub device: Arc<SimulatedDevice>,
    pub runtime: GateRuntime,
}

impl Session {
    pub fn open() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::load()?;
        let db = Arc::new(Database::open()?);
        let device = Arc::new(SimulatedDevice::new(
            db.clone(),
            config.tasks.identifier_prefix.clone(),
        ));
        let services = RuntimeServices {
            steps: device.clone(),
            shield: device.clone(),
            scheduler: device.clone(),
            notifier: device.clone(),
            identity: device.clone(),
        };
        let prefs = Preferences::new(db.clone());
        let runtime = GateRuntime::new(services, prefs, config)?;
        Ok(Self { device, runtime })
    }
}
