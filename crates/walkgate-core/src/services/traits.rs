use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SchedulingError, ServiceError};
use crate::selection::ActivitySelection;
use crate::tasks::{TaskKind, TaskRequest};

/// Grant state of a capability, shared by every collaborator that needs one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    #[default]
    NotDetermined,
    Authorized,
    Denied,
}

impl AuthorizationStatus {
    pub fn is_authorized(self) -> bool {
        self == AuthorizationStatus::Authorized
    }
}

/// Called with the new cumulative count whenever fresh step samples arrive.
pub type StepCallback = Box<dyn Fn(u64) + Send + Sync>;

/// Supplies today's cumulative step count (since local midnight).
#[async_trait]
pub trait StepSource: Send + Sync {
    async fn today_step_count(&self) -> Result<u64, ServiceError>;

    /// Register for push updates. Callbacks stay registered for the life of
    /// the source.
    fn subscribe(&self, callback: StepCallback);

    async fn authorization_status(&self) -> AuthorizationStatus;

    async fn request_authorization(&self) -> Result<AuthorizationStatus, ServiceError>;
}

/// Device-level content restriction. There is no read-back: the caller is
/// the source of truth for what is restricted.
///
/// A restriction has four facets: applications, application categories, web
/// domains and web-domain categories. The category tokens drive both
/// category facets.
#[async_trait]
pub trait ShieldEnforcer: Send + Sync {
    async fn set_restriction(&self, selection: &ActivitySelection) -> Result<(), ServiceError>;

    /// Clear all four facets.
    async fn clear_restriction(&self) -> Result<(), ServiceError>;

    async fn authorization_status(&self) -> AuthorizationStatus;

    async fn request_authorization(&self) -> Result<AuthorizationStatus, ServiceError>;
}

/// Host facility that runs registered task handlers at or after a requested
/// time.
#[async_trait]
pub trait BackgroundScheduler: Send + Sync {
    /// Submit or replace the request for `request.kind`. Fire and forget.
    async fn submit(&self, request: &TaskRequest) -> Result<(), SchedulingError>;

    async fn cancel(&self, kind: TaskKind);

    /// Kinds with an outstanding request.
    async fn pending(&self) -> BTreeSet<TaskKind>;
}

/// A user-visible alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub delay_secs: u64,
}

impl Notification {
    /// Alert delivered after the default one-second delay.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            body: body.into(),
            delay_secs: 1,
        }
    }

    pub fn goal_reached() -> Self {
        Self::new(
            "Step Goal Reached!",
            "Your apps are now unblocked for the day.",
        )
    }

    pub fn blocked_for_the_day(threshold: u64) -> Self {
        Self::new(
            format!("Walk {threshold} Steps To Unblock Your Apps"),
            format!("Your apps have been blocked for the day until you walk {threshold} steps."),
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), ServiceError>;

    async fn authorization_status(&self) -> AuthorizationStatus;

    async fn request_authorization(&self) -> Result<AuthorizationStatus, ServiceError>;
}

/// State of the sign-in credential behind the stored user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Authorized,
    Revoked,
    NotFound,
    Unknown,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn credential_state(&self, user_id: &str) -> CredentialState;
}
