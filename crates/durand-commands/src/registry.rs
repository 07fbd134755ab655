//! Hot-reloadable command registry.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::SystemTime,
};

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::{
    builtin::Builtins,
    handler::{CommandDescriptor, CommandTable},
    manifest::{CommandManifest, ManifestEntry, ManifestError, ReplyHandler},
};

const MANIFEST_EXTENSION: &str = "toml";

/// Registry error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Commands directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a `reload` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Nothing changed since the last load.
    Unchanged,
    /// The mapping was rebuilt with this many commands.
    Reloaded(usize),
}

/// Name → command mapping loaded from a directory of manifests.
///
/// The mapping is swapped wholesale: readers holding a snapshot keep seeing
/// the old table, later lookups see the new one, nobody sees a mix.
pub struct CommandRegistry {
    dir: PathBuf,
    builtins: Builtins,
    table: ArcSwap<CommandTable>,
    last_loaded: Mutex<Option<SystemTime>>,
}

impl CommandRegistry {
    /// Create an empty registry over `dir`. Nothing is read until `reload`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, builtins: Builtins) -> Self {
        Self {
            dir: dir.into(),
            builtins,
            table: ArcSwap::from_pointee(CommandTable::new()),
            last_loaded: Mutex::new(None),
        }
    }

    /// Commands directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current mapping.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CommandTable> {
        self.table.load_full()
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<CommandDescriptor> {
        self.table.load().get(&name.to_lowercase()).cloned()
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rescan the directory and replace the mapping.
    ///
    /// Without `force` the rescan is skipped when neither the directory nor
    /// any manifest was modified after the previous load. A missing directory
    /// is created and yields an empty registry. Invalid manifests are skipped
    /// with a warning.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or listed; the
    /// previous mapping stays in place.
    pub async fn reload(&self, force: bool) -> Result<ReloadOutcome, RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.dir.clone(),
            source,
        };

        if !tokio::fs::try_exists(&self.dir).await.map_err(io_err)? {
            tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
            tracing::info!(dir = %self.dir.display(), "Created commands directory");
        }

        let last_loaded = self.last_loaded.lock().ok().and_then(|l| *l);
        if !force {
            if let Some(since) = last_loaded {
                if !self.modified_since(since).await.map_err(io_err)? {
                    return Ok(ReloadOutcome::Unchanged);
                }
            }
        }

        let scan_started = SystemTime::now();
        let table = self.scan().await.map_err(io_err)?;
        let count = table.len();
        self.table.store(Arc::new(table));
        if let Ok(mut last) = self.last_loaded.lock() {
            *last = Some(scan_started);
        }

        tracing::info!(count, "Command registry loaded");
        Ok(ReloadOutcome::Reloaded(count))
    }

    async fn modified_since(&self, since: SystemTime) -> std::io::Result<bool> {
        let newer = |meta: &std::fs::Metadata| meta.modified().is_ok_and(|m| m > since);

        if newer(&tokio::fs::metadata(&self.dir).await?) {
            return Ok(true);
        }
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if manifest_metadata(&entry.path())
                .await
                .is_some_and(|m| newer(&m))
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn scan(&self) -> std::io::Result<CommandTable> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if manifest_metadata(&path).await.is_some() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut table = CommandTable::new();
        for path in paths {
            let Some(name) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_lowercase)
                .filter(|n| !n.is_empty())
            else {
                continue;
            };
            if table.contains_key(&name) {
                tracing::warn!(file = %path.display(), "Duplicate command name {name}, skipping");
                continue;
            }

            match self.load_manifest(&name, &path).await {
                Ok(descriptor) => {
                    tracing::debug!(command = %name, "Command loaded");
                    table.insert(name, descriptor);
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), "Skipping command manifest: {e}");
                }
            }
        }
        Ok(table)
    }

    async fn load_manifest(
        &self,
        name: &str,
        path: &Path,
    ) -> Result<CommandDescriptor, LoadError> {
        let text = tokio::fs::read_to_string(path).await?;
        let manifest = CommandManifest::parse(&text)?;

        let (handler, info) = match manifest.entry {
            ManifestEntry::Builtin(entry) => {
                let (handler, defaults) = self
                    .builtins
                    .get(&entry)
                    .ok_or(ManifestError::UnknownBuiltin(entry))?;
                (handler, Some(manifest.info.unwrap_or(defaults)))
            }
            ManifestEntry::Reply(template) => (
                Arc::new(ReplyHandler::new(template)) as _,
                manifest.info,
            ),
        };

        Ok(CommandDescriptor {
            name: name.to_string(),
            handler,
            info,
            source: path.to_path_buf(),
        })
    }
}

#[derive(Debug, Error)]
enum LoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Metadata of `path` when it is a manifest file. Symlinks are followed.
async fn manifest_metadata(path: &Path) -> Option<std::fs::Metadata> {
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(MANIFEST_EXTENSION));
    if !is_toml {
        return None;
    }
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(std::fs::Metadata::is_file)
}
