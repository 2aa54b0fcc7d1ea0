//! The user's choice of what to shield.
//!
//! Tokens are opaque handles minted by the host platform. The core never
//! interprets them; it only stores, compares and hands them back to the
//! shield enforcer.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Applications, categories and web domains chosen by the user.
///
/// Equality is value equality over the three token sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySelection {
    #[serde(default)]
    pub applications: BTreeSet<String>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub web_domains: BTreeSet<String>,
}

impl ActivitySelection {
    pub fn new<A, C, W>(applications: A, categories: C, web_domains: W) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
        W: IntoIterator,
        W::Item: Into<String>,
    {
        Self {
            applications: applications.into_iter().map(Into::into).collect(),
            categories: categories.into_iter().map(Into::into).collect(),
            web_domains: web_domains.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty() && self.categories.is_empty() && self.web_domains.is_empty()
    }

    /// Total number of tokens across the three sets.
    pub fn len(&self) -> usize {
        self.applications.len() + self.categories.len() + self.web_domains.len()
    }

    /// Serialize for the preference store.
    pub fn to_blob(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a persisted blob.
    pub fn from_blob(blob: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_insertion_order() {
        let a = ActivitySelection::new(["b", "a"], ["social"], Vec::<String>::new());
        let b = ActivitySelection::new(["a", "b"], ["social"], Vec::<String>::new());
        assert_eq!(a, b);
    }

    #[test]
    fn differs_when_any_set_differs() {
        let a = ActivitySelection::new(["a"], ["social"], ["example.com"]);
        let b = ActivitySelection::new(["a"], ["social"], ["example.org"]);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_selection() {
        let sel = ActivitySelection::default();
        assert!(sel.is_empty());
        assert_eq!(sel.len(), 0);
    }

    #[test]
    fn blob_tolerates_missing_sets() {
        let sel = ActivitySelection::from_blob(r#"{"applications":["x"]}"#).unwrap();
        assert_eq!(sel.len(), 1);
        assert!(sel.web_domains.is_empty());
    }

    #[test]
    fn malformed_blob_is_an_error() {
        assert!(ActivitySelection::from_blob("not json").is_err());
    }
}
