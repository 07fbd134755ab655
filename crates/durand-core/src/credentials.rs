//! Credential bundle data model.
//!
//! A bundle is the serialized continuation state (cookie-like records) that
//! lets a session resume without an interactive login. Loading, validation
//! and normalization live in `durand-session`; this module only describes
//! the shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_path() -> String {
    "/".to_string()
}

/// A single key/value/domain record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Record key. Older exports spell this field `name`.
    #[serde(alias = "name")]
    pub key: String,
    /// Record value.
    #[serde(default)]
    pub value: String,
    /// Domain the record applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Path the record applies to.
    #[serde(default = "default_path")]
    pub path: String,
    /// Creation timestamp, as exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<Value>,
    /// Last access timestamp, as exported.
    #[serde(
        default,
        rename = "lastAccessed",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_accessed: Option<Value>,
    /// Any other exported field, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CredentialRecord {
    /// Create a record with the default path.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>, domain: Option<&str>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            domain: domain.map(str::to_string),
            path: default_path(),
            creation: None,
            last_accessed: None,
            extra: Map::new(),
        }
    }

    /// Copy of this record bound to another domain.
    #[must_use]
    pub fn with_domain(&self, domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            ..self.clone()
        }
    }
}

/// Ordered sequence of credential records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialBundle(Vec<CredentialRecord>);

impl CredentialBundle {
    /// Wrap a list of records.
    #[must_use]
    pub const fn new(records: Vec<CredentialRecord>) -> Self {
        Self(records)
    }

    /// Borrow the records in order.
    #[must_use]
    pub fn records(&self) -> &[CredentialRecord] {
        &self.0
    }

    /// Take the records.
    #[must_use]
    pub fn into_records(self) -> Vec<CredentialRecord> {
        self.0
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bundle has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the records.
    pub fn iter(&self) -> std::slice::Iter<'_, CredentialRecord> {
        self.0.iter()
    }

    /// Whether any record carries `key`.
    #[must_use]
    pub fn has_key(&self, key: &str) -> bool {
        self.0.iter().any(|r| r.key == key)
    }

    /// The subset of `keys` present in the bundle, in the order given.
    #[must_use]
    pub fn present_keys<'a>(&self, keys: &[&'a str]) -> Vec<&'a str> {
        keys.iter().copied().filter(|k| self.has_key(k)).collect()
    }
}

impl From<Vec<CredentialRecord>> for CredentialBundle {
    fn from(records: Vec<CredentialRecord>) -> Self {
        Self(records)
    }
}

impl<'a> IntoIterator for &'a CredentialBundle {
    type Item = &'a CredentialRecord;
    type IntoIter = std::slice::Iter<'a, CredentialRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
