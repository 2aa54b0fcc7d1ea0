pub mod auth;
pub mod config;
pub mod onboarding;
pub mod selection;
pub mod status;
pub mod steps;
pub mod task;
pub mod threshold;

use serde::Serialize;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
