use chrono::Local;
use serde_json::json;
use walkgate_core::{Capability, GateProgress};

use super::{print_json, CmdResult};
use crate::device::Session;

/// Print the shield, today's progress and what the device holds.
pub async fn status() -> CmdResult {
    let session = Session::open()?;
    let rt = &session.runtime;
    let prefs = rt.prefs();

    let step_count = session.device.steps()?;
    let progress = GateProgress::new(step_count, prefs.step_threshold(), rt.policy().reblock_at);

    print_json(&json!({
        "shield": rt.shield().state().await,
        "unblocked_since": rt.shield().unblocked_since().await,
        "step_count": step_count,
        "threshold": progress.threshold,
        "progress": progress.fraction(),
        "status": progress.status_line(),
        "onboarding_complete": prefs.onboarding_complete(),
        "selection": rt.shield().selection().await,
        "restriction": session.device.restriction(),
        "pending": session.device.pending_requests()?,
        "authorizations": {
            "step_observation": session.device.authorization(Capability::StepObservation),
            "shield_enforcement": session.device.authorization(Capability::ShieldEnforcement),
            "notifications": session.device.authorization(Capability::Notifications),
        },
        "notifications": session.device.notifications(),
    }))
}

/// Simulate the app coming to the foreground.
pub async fn activate() -> CmdResult {
    let session = Session::open()?;
    let report = session.runtime.on_became_active(Local::now()).await?;
    print_json(&report)
}
