use clap::Subcommand;
use serde_json::json;

use super::{print_json, CmdResult};
use crate::device::Session;

#[derive(Subcommand)]
pub enum StepsAction {
    /// Show today's simulated step count
    Get,
    /// Set today's simulated step count
    Set {
        /// Cumulative steps since midnight
        count: u64,
    },
}

pub async fn run(action: StepsAction) -> CmdResult {
    let session = Session::open()?;
    match action {
        StepsAction::Get => print_json(&json!({ "step_count": session.device.steps()? })),
        StepsAction::Set { count } => {
            session.runtime.watch_steps();
            session.device.set_steps(count)?;
            print_json(&json!({
                "step_count": count,
                "observed": session.runtime.last_step_count(),
                "status": session.runtime.progress().status_line(),
            }))
        }
    }
}
