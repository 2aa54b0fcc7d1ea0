use chrono::Local;
use clap::Subcommand;
use serde_json::json;
use walkgate_core::ActivitySelection;

use super::{print_json, CmdResult};
use crate::device::Session;

#[derive(Subcommand)]
pub enum SelectionAction {
    /// Show the apps, categories and web domains to restrict
    Show,
    /// Replace the selection
    Set {
        /// Application token (repeatable)
        #[arg(long = "app")]
        apps: Vec<String>,
        /// Category token (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Web domain token (repeatable)
        #[arg(long = "domain")]
        domains: Vec<String>,
    },
    /// Restrict nothing
    Clear,
}

pub async fn run(action: SelectionAction) -> CmdResult {
    let session = Session::open()?;
    let rt = &session.runtime;
    match action {
        SelectionAction::Show => print_json(&rt.shield().selection().await),
        SelectionAction::Set {
            apps,
            categories,
            domains,
        } => {
            let selection = ActivitySelection::new(apps, categories, domains);
            let changed = rt.update_selection(selection, Local::now()).await?;
            print_json(&json!({
                "changed": changed,
                "selection": rt.shield().selection().await,
                "restriction": session.device.restriction(),
            }))
        }
        SelectionAction::Clear => {
            let changed = rt
                .update_selection(ActivitySelection::default(), Local::now())
                .await?;
            print_json(&json!({ "changed": changed }))
        }
    }
}
