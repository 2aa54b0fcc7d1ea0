use chrono::Local;
use clap::Subcommand;
use serde_json::json;
use walkgate_core::UserIdentity;

use super::{print_json, CmdResult};
use crate::device::Session;

#[derive(Subcommand)]
pub enum OnboardingAction {
    /// Finish first-run setup as the given user
    Complete {
        /// Stable user identifier from the sign-in provider
        #[arg(long)]
        user_id: String,
        #[arg(long, default_value = "")]
        given_name: String,
        #[arg(long, default_value = "")]
        family_name: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign out: lift restrictions, forget the selection and the user
    Reset,
}

pub async fn run(action: OnboardingAction) -> CmdResult {
    let session = Session::open()?;
    let rt = &session.runtime;
    match action {
        OnboardingAction::Complete {
            user_id,
            given_name,
            family_name,
            email,
        } => {
            let identity = UserIdentity {
                user_id,
                given_name,
                family_name,
                email,
            };
            let report = rt.complete_onboarding(&identity, Local::now()).await?;
            print_json(&report)
        }
        OnboardingAction::Reset => {
            rt.shield().reset(Local::now()).await?;
            rt.prefs().set_onboarding_complete(false)?;
            rt.prefs().clear_identity()?;
            print_json(&json!({
                "onboarding_complete": false,
                "shield": rt.shield().state().await,
            }))
        }
    }
}
