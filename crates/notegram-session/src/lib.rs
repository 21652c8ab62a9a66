//! Durable per-account session records.
//!
//! One file per account under a state directory, written atomically so a
//! crash mid-write never leaves a half-written session behind. The session
//! body is opaque to this crate: whatever the platform client serialized is
//! stored and returned byte-for-byte. A missing record is a normal state
//! (the account needs a fresh login), not an error.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notegram_core::write_text_atomic;
use tracing::debug;

const SESSION_FILE_PREFIX: &str = "session_";
const SESSION_FILE_SUFFIX: &str = ".json";

/// Directory-backed store keyed by account name.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, account_name: &str) -> PathBuf {
        self.root
            .join(format!("{SESSION_FILE_PREFIX}{account_name}{SESSION_FILE_SUFFIX}"))
    }

    /// Loads the stored session for an account, or `None` when absent.
    pub fn load(&self, account_name: &str) -> Result<Option<String>> {
        let path = self.session_path(account_name);
        if !path.exists() {
            return Ok(None);
        }
        let body = fs::read_to_string(&path)
            .with_context(|| format!("failed to read session file {}", path.display()))?;
        Ok(Some(body))
    }

    /// Persists a session body atomically, creating the state directory on
    /// first use.
    pub fn save(&self, account_name: &str, session: &str) -> Result<()> {
        let path = self.session_path(account_name);
        write_text_atomic(&path, session)
            .with_context(|| format!("failed to persist session for account '{account_name}'"))?;
        debug!(account = account_name, "session persisted");
        Ok(())
    }

    /// Removes the stored session for an account. Idempotent.
    pub fn delete(&self, account_name: &str) -> Result<()> {
        let path = self.session_path(account_name);
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path)
            .with_context(|| format!("failed to delete session file {}", path.display()))?;
        debug!(account = account_name, "session deleted");
        Ok(())
    }

    /// Account names with a stored session, sorted. Used for startup logging.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("failed to read state directory {}", self.root.display()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to list {}", self.root.display()))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(stem) = file_name
                .strip_prefix(SESSION_FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(SESSION_FILE_SUFFIX))
            {
                if !stem.is_empty() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
