mod config;
pub mod database;
pub mod prefs;

pub use config::{Config, GatingConfig, NotificationsConfig, TasksConfig};
pub use database::Database;
pub use prefs::{keys, MemoryStore, PreferenceStore, Preferences, UserIdentity};

use std::path::PathBuf;

/// Returns the data directory, creating it when missing.
///
/// `WALKGATE_DATA_DIR` overrides the location outright. Otherwise the
/// directory is `~/.config/walkgate[-dev]/`, where `WALKGATE_ENV=dev` selects
/// the development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let dir = match std::env::var_os("WALKGATE_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("WALKGATE_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("walkgate-dev")
            } else {
                base_dir.join("walkgate")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
