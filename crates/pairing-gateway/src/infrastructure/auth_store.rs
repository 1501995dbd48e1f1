//! Multi-file credential store.
//!
//! # Layout
//!
//! ```text
//! <session dir>/
//!   creds.json                        credential object
//!   pre-key-1.json                    one file per signal key
//!   session-6281234__0.json           `/` → `__`, `:` → `-`
//!   app-state-sync-key-AAAA.json
//!   .staging/                         files being written
//! ```
//!
//! Every update is written straight through: `creds.json` is rewritten with
//! the merged object, key files are written or removed one by one.  Nothing
//! is buffered, so the directory is always as complete as the last applied
//! update.
//!
//! A file is first written under `.staging/` and then renamed over its final
//! name, so a concurrent reader sees either the old or the new contents,
//! never a truncated file.  Subdirectories are neither loaded nor archived.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use pairing_core::protocol::credentials::{key_file_name, merge_creds};
use pairing_core::{AuthState, CredentialUpdate, CREDS_FILE};

use crate::application::ports::{CredentialError, CredentialSession, CredentialStore};

/// Subdirectory of the session directory holding files while they are written.
const STAGING_DIR: &str = ".staging";

/// [`CredentialStore`] backed by a directory of JSON files.
#[derive(Debug, Clone, Default)]
pub struct MultiFileAuthStore;

impl MultiFileAuthStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialStore for MultiFileAuthStore {
    async fn load(&self, dir: &Path) -> Result<Box<dyn CredentialSession>, CredentialError> {
        tokio::fs::create_dir_all(dir).await.map_err(|source| io_error(dir, source))?;

        let creds_path = dir.join(CREDS_FILE);
        let creds = match read_json(&creds_path).await? {
            Some(creds) => creds,
            None => AuthState::fresh().creds,
        };

        let mut keys = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|source| io_error(dir, source))?;
        while let Some(entry) = entries.next_entry().await.map_err(|source| io_error(dir, source))? {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map_err(|source| io_error(&path, source))?
                .is_file();
            if !is_file || path == creds_path {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
                continue;
            };
            if let Some(value) = read_json(&path).await? {
                keys.insert(stem, value);
            }
        }

        debug!("loaded credentials from {} ({} keys)", dir.display(), keys.len());
        Ok(Box::new(MultiFileSession {
            dir: dir.to_path_buf(),
            state: AuthState { creds, keys },
        }))
    }
}

/// Credential state of one session directory.
#[derive(Debug)]
pub struct MultiFileSession {
    dir: PathBuf,
    state: AuthState,
}

impl MultiFileSession {
    async fn write_creds(&self) -> Result<(), CredentialError> {
        write_json(&self.dir.join(CREDS_FILE), &self.state.creds).await
    }

    async fn write_keys(
        &mut self,
        category: &str,
        entries: BTreeMap<String, Option<Value>>,
    ) -> Result<(), CredentialError> {
        for (id, value) in entries {
            let file = key_file_name(category, &id);
            let path = self.dir.join(&file);
            let stem = file.trim_end_matches(".json").to_owned();
            match value {
                Some(value) => {
                    write_json(&path, &value).await?;
                    self.state.keys.insert(stem, value);
                }
                None => {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(source) => return Err(io_error(&path, source)),
                    }
                    self.state.keys.remove(&stem);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialSession for MultiFileSession {
    fn state(&self) -> &AuthState {
        &self.state
    }

    async fn apply(&mut self, update: CredentialUpdate) -> Result<(), CredentialError> {
        match update {
            CredentialUpdate::Creds(partial) => {
                merge_creds(&mut self.state.creds, partial);
                self.write_creds().await?;
                trace!("creds.json updated in {}", self.dir.display());
            }
            CredentialUpdate::Keys { category, entries } => {
                let count = entries.len();
                self.write_keys(&category, entries).await?;
                trace!("{count} {category} keys updated in {}", self.dir.display());
            }
        }
        Ok(())
    }
}

// ── File helpers ──────────────────────────────────────────────────────────────

fn io_error(path: &Path, source: std::io::Error) -> CredentialError {
    CredentialError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads and parses `path`; `Ok(None)` when the file does not exist.
async fn read_json(path: &Path) -> Result<Option<Value>, CredentialError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(io_error(path, source)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| CredentialError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Replaces `path` with `value` through a staged file and a rename.
async fn write_json(path: &Path, value: &Value) -> Result<(), CredentialError> {
    let bytes = serde_json::to_vec(value).map_err(|source| CredentialError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(io_error(path, std::io::Error::from(ErrorKind::InvalidInput)));
    };

    let staging = dir.join(STAGING_DIR);
    tokio::fs::create_dir_all(&staging)
        .await
        .map_err(|source| io_error(&staging, source))?;
    let staged = staging.join(name);
    tokio::fs::write(&staged, bytes)
        .await
        .map_err(|source| io_error(&staged, source))?;
    tokio::fs::rename(&staged, path)
        .await
        .map_err(|source| io_error(path, source))
}
