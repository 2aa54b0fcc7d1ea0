//! Contracts for the platform services the core drives.
//!
//! Step sensing, shield enforcement, background execution, notifications and
//! sign-in are supplied by the host. The core only sees these traits.

pub mod memory;
mod traits;

pub use traits::{
    AuthorizationStatus, BackgroundScheduler, CredentialState, IdentityProvider, Notification,
    Notifier, ShieldEnforcer, StepCallback, StepSource,
};
