use chrono::Local;
use clap::Subcommand;
use serde_json::json;

use super::{print_json, CmdResult};
use crate::device::Session;

#[derive(Subcommand)]
pub enum ThresholdAction {
    /// Show the daily step goal
    Get,
    /// Change the daily step goal and re-evaluate the shield
    Set {
        /// Steps to walk before apps unblock (0 disables gating)
        steps: u64,
    },
}

pub async fn run(action: ThresholdAction) -> CmdResult {
    let session = Session::open()?;
    match action {
        ThresholdAction::Get => print_json(&json!({
            "threshold": session.runtime.prefs().step_threshold(),
        })),
        ThresholdAction::Set { steps } => {
            let decision = session.runtime.update_threshold(steps, Local::now()).await?;
            print_json(&json!({
                "threshold": steps,
                "decision": decision,
            }))
        }
    }
}
