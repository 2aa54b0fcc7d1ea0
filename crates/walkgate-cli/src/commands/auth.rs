use clap::{Subcommand, ValueEnum};
use serde_json::json;
use walkgate_core::{AuthorizationStatus, Capability, CredentialState};

use super::{print_json, CmdResult};
use crate::device::Session;

#[derive(Clone, Copy, ValueEnum)]
pub enum CapabilityArg {
    Steps,
    Shield,
    Notifications,
}

impl From<CapabilityArg> for Capability {
    fn from(arg: CapabilityArg) -> Self {
        match arg {
            CapabilityArg::Steps => Capability::StepObservation,
            CapabilityArg::Shield => Capability::ShieldEnforcement,
            CapabilityArg::Notifications => Capability::Notifications,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CredentialArg {
    Authorized,
    Revoked,
    NotFound,
    Unknown,
}

impl From<CredentialArg> for CredentialState {
    fn from(arg: CredentialArg) -> Self {
        match arg {
            CredentialArg::Authorized => CredentialState::Authorized,
            CredentialArg::Revoked => CredentialState::Revoked,
            CredentialArg::NotFound => CredentialState::NotFound,
            CredentialArg::Unknown => CredentialState::Unknown,
        }
    }
}

#[derive(Subcommand)]
pub enum AuthAction {
    /// Grant a capability on the simulated device
    Grant { capability: CapabilityArg },
    /// Deny a capability on the simulated device
    Deny { capability: CapabilityArg },
    /// Set the state of the stored sign-in credential
    Credential { state: CredentialArg },
}

pub async fn run(action: AuthAction) -> CmdResult {
    let session = Session::open()?;
    match action {
        AuthAction::Grant { capability } => set(&session, capability.into(), AuthorizationStatus::Authorized),
        AuthAction::Deny { capability } => set(&session, capability.into(), AuthorizationStatus::Denied),
        AuthAction::Credential { state } => {
            let state = CredentialState::from(state);
            session.device.set_credential(state)?;
            print_json(&json!({ "credential": state }))
        }
    }
}

fn set(session: &Session, capability: Capability, status: AuthorizationStatus) -> CmdResult {
    session.device.set_authorization(capability, status)?;
    print_json(&json!({ "capability": capability, "status": status }))
}
