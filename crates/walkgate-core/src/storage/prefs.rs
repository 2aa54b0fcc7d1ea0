//! Typed access to persisted preferences.
//!
//! Reads never fail: an absent or malformed value falls back to its default
//! and the miss is logged. Writes propagate store errors to the caller.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::selection::ActivitySelection;

/// Persisted key names.
pub mod keys {
    pub const STEP_THRESHOLD: &str = "step_threshold";
    pub const APPS_UNBLOCKED: &str = "apps_unblocked";
    pub const UNBLOCKED_AT: &str = "unblocked_at";
    pub const ACTIVITY_SELECTION: &str = "activity_selection";
    pub const ONBOARDING_COMPLETE: &str = "onboarding_complete";
    pub const USER_ID: &str = "user_id";
    pub const USER_GIVEN_NAME: &str = "user_given_name";
    pub const USER_FAMILY_NAME: &str = "user_family_name";
    pub const USER_EMAIL: &str = "user_email";
}

/// Durable key/value store. Last write wins, process-wide.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests and embedders without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.remove(key);
        Ok(())
    }
}

/// Signed-in user as recorded at login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Typed facade over a [`PreferenceStore`].
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// In-memory preferences (for tests).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn PreferenceStore> {
        &self.store
    }

    fn raw(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "preference read failed, using default");
                None
            }
        }
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.raw(key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(key, value = %raw, "malformed preference, using default");
                default
            }),
            None => default,
        }
    }

    // ── Gating ───────────────────────────────────────────────────────

    /// Daily step goal. Zero means no gating.
    pub fn step_threshold(&self) -> u64 {
        self.parsed(keys::STEP_THRESHOLD, 0)
    }

    pub fn set_step_threshold(&self, threshold: u64) -> Result<(), StoreError> {
        self.store.set(keys::STEP_THRESHOLD, &threshold.to_string())
    }

    /// Whether the shield is currently cleared.
    pub fn apps_unblocked(&self) -> bool {
        self.parsed(keys::APPS_UNBLOCKED, false)
    }

    pub fn set_apps_unblocked(&self, unblocked: bool) -> Result<(), StoreError> {
        self.store.set(keys::APPS_UNBLOCKED, &unblocked.to_string())
    }

    /// When the shield was last cleared.
    pub fn unblocked_at(&self) -> Option<DateTime<Local>> {
        let raw = self.raw(keys::UNBLOCKED_AT)?;
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(at) => Some(at.with_timezone(&Local)),
            Err(e) => {
                warn!(value = %raw, error = %e, "malformed unblock timestamp, ignoring");
                None
            }
        }
    }

    pub fn set_unblocked_at(&self, at: Option<DateTime<Local>>) -> Result<(), StoreError> {
        match at {
            Some(at) => self.store.set(keys::UNBLOCKED_AT, &at.to_rfc3339()),
            None => self.store.remove(keys::UNBLOCKED_AT),
        }
    }

    pub fn selection(&self) -> ActivitySelection {
        match self.raw(keys::ACTIVITY_SELECTION) {
            Some(blob) => ActivitySelection::from_blob(&blob).unwrap_or_else(|e| {
                warn!(error = %e, "malformed activity selection, using empty selection");
                ActivitySelection::default()
            }),
            None => ActivitySelection::default(),
        }
    }

    pub fn set_selection(&self, selection: &ActivitySelection) -> Result<(), StoreError> {
        let blob = selection
            .to_blob()
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        self.store.set(keys::ACTIVITY_SELECTION, &blob)
    }

    // ── Onboarding & identity ────────────────────────────────────────

    pub fn onboarding_complete(&self) -> bool {
        self.parsed(keys::ONBOARDING_COMPLETE, false)
    }

    pub fn set_onboarding_complete(&self, complete: bool) -> Result<(), StoreError> {
        self.store
            .set(keys::ONBOARDING_COMPLETE, &complete.to_string())
    }

    /// The stored identity, if a user id was ever recorded.
    pub fn identity(&self) -> Option<UserIdentity> {
        let user_id = self.raw(keys::USER_ID).filter(|id| !id.is_empty())?;
        Some(UserIdentity {
            user_id,
            given_name: self.raw(keys::USER_GIVEN_NAME).unwrap_or_default(),
            family_name: self.raw(keys::USER_FAMILY_NAME).unwrap_or_default(),
            email: self.raw(keys::USER_EMAIL),
        })
    }

    pub fn save_identity(&self, identity: &UserIdentity) -> Result<(), StoreError> {
        self.store.set(keys::USER_ID, &identity.user_id)?;
        self.store.set(keys::USER_GIVEN_NAME, &identity.given_name)?;
        self.store.set(keys::USER_FAMILY_NAME, &identity.family_name)?;
        match &identity.email {
            Some(email) => self.store.set(keys::USER_EMAIL, email),
            None => self.store.remove(keys::USER_EMAIL),
        }
    }

    pub fn clear_identity(&self) -> Result<(), StoreError> {
        for key in [
            keys::USER_ID,
            keys::USER_GIVEN_NAME,
            keys::USER_FAMILY_NAME,
            keys::USER_EMAIL,
        ] {
            self.store.remove(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_absent() {
        let prefs = Preferences::in_memory();
        assert_eq!(prefs.step_threshold(), 0);
        assert!(!prefs.apps_unblocked());
        assert!(prefs.selection().is_empty());
        assert!(!prefs.onboarding_complete());
        assert!(prefs.identity().is_none());
        assert!(prefs.unblocked_at().is_none());
    }

    #[test]
    fn unblocked_at_roundtrip() {
        let prefs = Preferences::in_memory();
        let at = Local::now();
        prefs.set_unblocked_at(Some(at)).unwrap();
        assert_eq!(prefs.unblocked_at().map(|t| t.timestamp()), Some(at.timestamp()));
        prefs.set_unblocked_at(None).unwrap();
        assert!(prefs.unblocked_at().is_none());
    }

    #[test]
    fn malformed_values_fall_back() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::STEP_THRESHOLD, "lots").unwrap();
        store.set(keys::APPS_UNBLOCKED, "maybe").unwrap();
        store.set(keys::ACTIVITY_SELECTION, "{broken").unwrap();
        let prefs = Preferences::new(store);
        assert_eq!(prefs.step_threshold(), 0);
        assert!(!prefs.apps_unblocked());
        assert!(prefs.selection().is_empty());
    }

    #[test]
    fn negative_threshold_falls_back_to_zero() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::STEP_THRESHOLD, "-5").unwrap();
        assert_eq!(Preferences::new(store).step_threshold(), 0);
    }

    #[test]
    fn selection_persists() {
        let prefs = Preferences::in_memory();
        let sel = ActivitySelection::new(["app.one"], ["games"], ["example.com"]);
        prefs.set_selection(&sel).unwrap();
        assert_eq!(prefs.selection(), sel);
    }

    #[test]
    fn identity_roundtrip_and_clear() {
        let prefs = Preferences::in_memory();
        let identity = UserIdentity {
            user_id: "001234.abcd".into(),
            given_name: "Sam".into(),
            family_name: "Rivera".into(),
            email: None,
        };
        prefs.save_identity(&identity).unwrap();
        assert_eq!(prefs.identity(), Some(identity));

        prefs.clear_identity().unwrap();
        assert!(prefs.identity().is_none());
    }
}
