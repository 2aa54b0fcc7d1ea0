//! # Walkgate Core Library
//!
//! This library provides the core logic of Walkgate, which keeps selected
//! apps, app categories and web domains restricted until the user has walked
//! a daily step goal. Restrictions come back every night at 4am.
//!
//! The platform (step sensing, device restrictions, background execution,
//! notifications, sign-in) is reached only through the traits in
//! [`services`]. The `walkgate` CLI drives the same library against a
//! simulated device.
//!
//! ## Architecture
//!
//! - **Gating**: pure decision engine mapping step count, goal and shield
//!   state to the next shield state and the background tasks to arm
//! - **Shield**: single writer of the shield flag and the activity selection
//! - **Tasks**: submission of the `StepCheck` and `Reblock` background tasks
//!   and their per-kind lifecycle
//! - **Runtime**: application root, foreground reconciliation and the two
//!   background task handlers
//! - **Storage**: SQLite preference store and TOML configuration
//!
//! ## Key Components
//!
//! - [`GateRuntime`]: owns every service and controller
//! - [`decide`]: the gating decision
//! - [`ShieldController`]: shield state transitions
//! - [`TaskDispatcher`]: background task submission
//! - [`Database`]: preference persistence
//! - [`Config`]: application configuration management

pub mod error;
pub mod events;
pub mod gating;
pub mod runtime;
pub mod selection;
pub mod services;
pub mod shield;
pub mod storage;
pub mod tasks;

pub use error::{
    Capability, ConfigError, CoreError, SchedulingError, ServiceError, StoreError, TaskError,
};
pub use events::{Event, EventBus};
pub use gating::{decide, day_reset, next_reblock_at, Decision, GateBranch, GateInput, GatePolicy, GateProgress};
pub use runtime::{Authorizations, GateRuntime, ReconcileOutcome, ReconcileReport, RuntimeServices};
pub use selection::ActivitySelection;
pub use services::{AuthorizationStatus, CredentialState, Notification};
pub use shield::{ShieldController, ShieldState};
pub use storage::{Config, Database, Preferences, UserIdentity};
pub use tasks::{TaskCompletion, TaskDispatcher, TaskInvocation, TaskKind, TaskPhase, TaskRequest};
