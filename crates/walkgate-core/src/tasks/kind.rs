use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// The two singleton background tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Periodic, re-armed until the goal is met.
    StepCheck,
    /// One-shot nightly reset.
    Reblock,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::StepCheck, TaskKind::Reblock];

    fn suffix(self) -> &'static str {
        match self {
            TaskKind::StepCheck => "stepcheck",
            TaskKind::Reblock => "reblock",
        }
    }

    /// Host task identifier, e.g. `com.walkgate.stepcheck`.
    pub fn identifier(self, prefix: &str) -> String {
        format!("{prefix}.{}", self.suffix())
    }

    /// Inverse of [`TaskKind::identifier`].
    pub fn from_identifier(prefix: &str, identifier: &str) -> Option<Self> {
        let suffix = identifier.strip_prefix(prefix)?.strip_prefix('.')?;
        Self::ALL.into_iter().find(|k| k.suffix() == suffix)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskKind::StepCheck => "step-check",
            TaskKind::Reblock => "reblock",
        })
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "step-check" | "step_check" | "stepcheck" => Ok(TaskKind::StepCheck),
            "reblock" => Ok(TaskKind::Reblock),
            other => Err(format!("unknown task kind: {other}")),
        }
    }
}

/// Ask the host to run `kind` at or after `earliest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub kind: TaskKind,
    pub earliest: DateTime<Local>,
}

impl TaskRequest {
    pub fn new(kind: TaskKind, earliest: DateTime<Local>) -> Self {
        Self { kind, earliest }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_roundtrip() {
        for kind in TaskKind::ALL {
            let id = kind.identifier("com.walkgate");
            assert_eq!(TaskKind::from_identifier("com.walkgate", &id), Some(kind));
        }
        assert_eq!(TaskKind::StepCheck.identifier("com.walkgate"), "com.walkgate.stepcheck");
    }

    #[test]
    fn foreign_identifiers_are_ignored() {
        assert_eq!(TaskKind::from_identifier("com.walkgate", "com.other.reblock"), None);
        assert_eq!(TaskKind::from_identifier("com.walkgate", "com.walkgatereblock"), None);
        assert_eq!(TaskKind::from_identifier("com.walkgate", "com.walkgate.sync"), None);
    }

    #[test]
    fn parse_cli_names() {
        assert_eq!("step-check".parse::<TaskKind>().unwrap(), TaskKind::StepCheck);
        assert_eq!("Reblock".parse::<TaskKind>().unwrap(), TaskKind::Reblock);
        assert!("nightly".parse::<TaskKind>().is_err());
    }
}
