//! File-backed credential store.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::Utc;
use durand_core::{CredentialBundle, CredentialRecord};

use super::{CredentialPolicy, CredentialsError, normalize};

/// Loads, validates, normalizes and persists the credential bundle file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    policy: CredentialPolicy,
}

impl CredentialStore {
    /// Create a store over `path` with the default policy.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            policy: CredentialPolicy::default(),
        }
    }

    /// Replace the critical-key policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CredentialPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Critical-key policy.
    #[must_use]
    pub const fn policy(&self) -> &CredentialPolicy {
        &self.policy
    }

    /// Read and validate the bundle.
    ///
    /// # Errors
    /// `Missing` if the file does not exist, `Malformed` if it is not a
    /// non-empty array of records with non-empty keys,
    /// `InsufficientCriticalCookies` if the quorum is not met.
    pub async fn load(&self) -> Result<CredentialBundle, CredentialsError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CredentialsError::Missing(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let bundle = parse_bundle(&raw)?;
        self.validate(&bundle)?;

        tracing::info!(
            records = bundle.len(),
            path = %self.path.display(),
            "Credential bundle loaded"
        );
        Ok(bundle)
    }

    /// Check the critical-key quorum.
    ///
    /// # Errors
    /// Returns `InsufficientCriticalCookies` if the quorum is not met.
    pub fn validate(&self, bundle: &CredentialBundle) -> Result<(), CredentialsError> {
        self.policy.validate(bundle)
    }

    /// Canonicalize domains and mirror critical records across sibling domains.
    #[must_use]
    pub fn normalize(&self, bundle: CredentialBundle) -> CredentialBundle {
        normalize(bundle, &self.policy.critical_keys)
    }

    /// Persist the bundle. Best-effort: failures are logged, never returned.
    pub async fn save(&self, bundle: &CredentialBundle) {
        if let Err(e) = self.write_atomic(bundle).await {
            tracing::error!(path = %self.path.display(), "Failed to save credential bundle: {e}");
        } else {
            tracing::info!(records = bundle.len(), "Credential bundle saved");
        }
    }

    async fn write_atomic(&self, bundle: &CredentialBundle) -> Result<(), CredentialsError> {
        let json = serde_json::to_string_pretty(bundle)
            .map_err(|e| CredentialsError::Malformed(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.sibling_path("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Move the active bundle aside: copy it to a timestamped backup, then
    /// delete it so the next connect has to start from fresh credentials.
    ///
    /// Returns the backup path, or `None` if there was nothing to quarantine
    /// or the operation failed (failures are logged).
    pub async fn quarantine(&self) -> Option<PathBuf> {
        let backup = self.sibling_path(&format!("{}.bak", Utc::now().format("%Y%m%dT%H%M%S%3f")));

        if let Err(e) = tokio::fs::copy(&self.path, &backup).await {
            if e.kind() == ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), "No credential bundle to quarantine");
            } else {
                tracing::error!(path = %self.path.display(), "Failed to back up credential bundle: {e}");
            }
            return None;
        }
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::error!(path = %self.path.display(), "Failed to remove quarantined bundle: {e}");
            return None;
        }

        tracing::warn!(
            backup = %backup.display(),
            "Credential bundle quarantined; re-authenticate manually"
        );
        Some(backup)
    }

    fn sibling_path(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

fn parse_bundle(raw: &str) -> Result<CredentialBundle, CredentialsError> {
    let records: Vec<CredentialRecord> =
        serde_json::from_str(raw).map_err(|e| CredentialsError::Malformed(e.to_string()))?;
    if records.is_empty() {
        return Err(CredentialsError::Malformed("bundle has no records".into()));
    }
    if let Some(pos) = records.iter().position(|r| r.key.trim().is_empty()) {
        return Err(CredentialsError::Malformed(format!(
            "record {pos} has an empty key"
        )));
    }
    Ok(CredentialBundle::new(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FULL: &str = r#"[
        {"key": "c_user", "value": "100", "domain": "facebook.com", "path": "/"},
        {"key": "xs", "value": "abc", "domain": ".facebook.com"},
        {"key": "datr", "value": "def", "domain": ".facebook.com"},
        {"key": "presence", "value": "p", "domain": ".facebook.com"}
    ]"#;

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("appstate.json"));
        assert!(matches!(
            store.load().await,
            Err(CredentialsError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appstate.json");
        let store = CredentialStore::new(&path);

        for content in ["not json", "{}", "[]", r#"[{"key": "", "value": "x"}]"#] {
            tokio::fs::write(&path, content).await.unwrap();
            assert!(
                matches!(store.load().await, Err(CredentialsError::Malformed(_))),
                "{content} should be malformed"
            );
        }
    }

    #[tokio::test]
    async fn test_single_critical_key_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appstate.json");
        tokio::fs::write(
            &path,
            r#"[{"name": "c_user", "value": "1"}, {"name": "presence", "value": "2"}]"#,
        )
        .await
        .unwrap();

        let err = CredentialStore::new(&path).load().await.unwrap_err();
        match err {
            CredentialsError::InsufficientCriticalCookies { present, required } => {
                assert_eq!(present, vec!["c_user".to_string()]);
                assert_eq!(required, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_load_normalize_save_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appstate.json");
        tokio::fs::write(&path, FULL).await.unwrap();
        let store = CredentialStore::new(&path);

        let bundle = store.load().await.unwrap();
        assert_eq!(bundle.len(), 4);
        let normalized = store.normalize(bundle);
        assert_eq!(normalized.len(), 7);

        store.save(&normalized).await;
        let reloaded = store.load().await.unwrap();
        assert_eq!(reloaded, normalized);
        assert!(!dir.path().join("appstate.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_failure_is_swallowed() {
        let dir = tempdir().unwrap();
        // A directory in place of the file makes the rename fail.
        let path = dir.path().join("appstate.json");
        tokio::fs::create_dir(&path).await.unwrap();
        let store = CredentialStore::new(&path);
        store
            .save(&CredentialBundle::new(vec![CredentialRecord::new(
                "c_user", "1", None,
            )]))
            .await;
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_quarantine_moves_file_aside() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appstate.json");
        tokio::fs::write(&path, FULL).await.unwrap();
        let store = CredentialStore::new(&path);

        let backup = store.quarantine().await.expect("backup path");
        assert!(!path.exists());
        assert_eq!(tokio::fs::read_to_string(&backup).await.unwrap(), FULL);
        assert!(matches!(store.load().await, Err(CredentialsError::Missing(_))));

        assert!(store.quarantine().await.is_none());
    }
}
