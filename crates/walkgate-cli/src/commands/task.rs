use std::time::Duration;

use chrono::Local;
use clap::Subcommand;
use serde_json::json;
use walkgate_core::{TaskInvocation, TaskKind};

use super::{print_json, CmdResult};
use crate::device::Session;

#[derive(Subcommand)]
pub enum TaskAction {
    /// List background tasks pending on the device
    List,
    /// Fire a background task now, as the host would
    Run {
        /// Task kind (step-check or reblock)
        kind: TaskKind,
        /// Execution budget granted by the host
        #[arg(long, default_value = "30")]
        budget_secs: u64,
        /// Simulated latency of each device call
        #[arg(long, default_value = "0")]
        work_ms: u64,
    },
    /// Make the device scheduler reject submissions with an error code
    Reject {
        /// Host error code; omit to accept submissions again
        code: Option<i64>,
    },
}

pub async fn run(action: TaskAction) -> CmdResult {
    let session = Session::open()?;
    match action {
        TaskAction::List => {
            let prefix = &session.runtime.config().tasks.identifier_prefix;
            let pending: Vec<_> = session
                .device
                .pending_requests()?
                .into_iter()
                .map(|r| {
                    json!({
                        "identifier": r.kind.identifier(prefix),
                        "kind": r.kind,
                        "earliest": r.earliest,
                    })
                })
                .collect();
            print_json(&pending)
        }
        TaskAction::Run {
            kind,
            budget_secs,
            work_ms,
        } => {
            let scheduled_for = session.device.take_pending(kind)?;
            session.device.set_latency(Duration::from_millis(work_ms));

            let invocation = TaskInvocation::new(kind, Local::now(), Duration::from_secs(budget_secs));
            let completion = match kind {
                TaskKind::StepCheck => session.runtime.handle_step_check(invocation).await?,
                TaskKind::Reblock => session.runtime.handle_reblock(invocation).await?,
            };
            print_json(&json!({
                "scheduled_for": scheduled_for,
                "fired_at": invocation.fired_at,
                "completion": completion,
            }))
        }
        TaskAction::Reject { code } => {
            session.device.set_scheduler_error(code)?;
            print_json(&json!({ "reject_code": code }))
        }
    }
}
