//! Credential bundle store.

pub mod normalize;
pub mod store;

use std::path::PathBuf;

use durand_core::CredentialBundle;
use thiserror::Error;

pub use normalize::{canonical_domain, normalize};
pub use store::CredentialStore;

/// Credential error.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("Credential file missing: {}", .0.display())]
    Missing(PathBuf),
    #[error("Malformed credentials: {0}")]
    Malformed(String),
    #[error(
        "Insufficient critical cookies: {} of {required} required present ({})",
        .present.len(),
        .present.join(", ")
    )]
    InsufficientCriticalCookies {
        present: Vec<String>,
        required: usize,
    },
    #[error("Credential I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which record keys make a bundle usable, and how many of them must be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPolicy {
    /// Critical keys.
    pub critical_keys: Vec<String>,
    /// Minimum number of distinct critical keys.
    pub quorum: usize,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            critical_keys: ["c_user", "xs", "datr", "fr"]
                .into_iter()
                .map(String::from)
                .collect(),
            quorum: 2,
        }
    }
}

impl CredentialPolicy {
    /// Stricter policy: three of five.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            critical_keys: ["c_user", "xs", "datr", "fr", "sb"]
                .into_iter()
                .map(String::from)
                .collect(),
            quorum: 3,
        }
    }

    /// Whether `key` is critical.
    #[must_use]
    pub fn is_critical(&self, key: &str) -> bool {
        self.critical_keys.iter().any(|k| k == key)
    }

    /// Check the critical-key quorum.
    ///
    /// # Errors
    /// Returns `InsufficientCriticalCookies` if fewer than `quorum` critical
    /// keys are present.
    pub fn validate(&self, bundle: &CredentialBundle) -> Result<(), CredentialsError> {
        let keys: Vec<&str> = self.critical_keys.iter().map(String::as_str).collect();
        let present = bundle.present_keys(&keys);
        if present.len() < self.quorum {
            return Err(CredentialsError::InsufficientCriticalCookies {
                present: present.into_iter().map(String::from).collect(),
                required: self.quorum,
            });
        }
        Ok(())
    }
}
