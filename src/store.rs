use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::SavedSession;

/// Per-user key-value store backing the session record and the
/// "continue without wallet" preference.
///
/// A missing file means no saved session: the connect overlay is shown
/// on load. A corrupt file is treated the same way so a damaged record
/// degrades to the first-visit flow instead of an error.
pub struct SessionStore {
    path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    session: Option<SavedSession>,
    #[serde(default)]
    skipped: bool,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved session record, if any.
    pub fn load(&self) -> Option<SavedSession> {
        self.read().session
    }

    /// Persist the record after a successful grant, preserving the
    /// skipped preference.
    pub fn save(&self, session: &SavedSession) -> Result<()> {
        let mut file = self.read();
        file.session = Some(session.clone());
        self.write(&file)
    }

    /// Drop the record on disconnect. The skipped preference survives.
    pub fn clear(&self) -> Result<()> {
        let mut file = self.read();
        if file.session.is_none() {
            return Ok(());
        }
        file.session = None;
        self.write(&file)
    }

    /// Whether the user chose to continue without a wallet.
    pub fn skipped(&self) -> bool {
        self.read().skipped
    }

    pub fn set_skipped(&self, skipped: bool) -> Result<()> {
        let mut file = self.read();
        file.skipped = skipped;
        self.write(&file)
    }

    fn read(&self) -> StoreFile {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StoreFile::default(),
            Err(e) => {
                warn!("Failed to read {}: {e}", self.path.display());
                return StoreFile::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    "Ignoring corrupt session file {}: {e}",
                    self.path.display()
                );
                StoreFile::default()
            }
        }
    }

    fn write(&self, file: &StoreFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let contents =
            serde_json::to_string_pretty(file).context("failed to serialize session file")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}
