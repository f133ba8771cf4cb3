use std::fs;
use std::path::{Path, PathBuf};

use super::StateDocument;
use crate::Result;

/// File-backed store for the single [`StateDocument`].
///
/// Writes go to a sibling `.tmp` file which is then renamed over the target,
/// so readers only ever see a complete document.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    initial_capital: f64,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, initial_capital: f64) -> Self {
        Self {
            path: path.into(),
            initial_capital,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, or a fresh one seeded with the initial capital
    /// when no file exists yet.
    pub fn load(&self) -> Result<StateDocument> {
        if !self.path.exists() {
            tracing::info!(
                "No state at {}, starting fresh with {:.2}",
                self.path.display(),
                self.initial_capital
            );
            return Ok(StateDocument::fresh(self.initial_capital));
        }

        let contents = fs::read_to_string(&self.path)?;
        let doc: StateDocument = serde_json::from_str(&contents)?;
        tracing::debug!(
            "Loaded state: capital {:.2}, {} positions",
            doc.capital,
            doc.positions.len()
        );
        Ok(doc)
    }

    /// Replace the stored document.
    pub fn save(&self, doc: &StateDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(doc)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;

        fs::rename(&tmp_path, &self.path).inspect_err(|_| {
            let _ = fs::remove_file(&tmp_path);
        })?;

        tracing::debug!("Persisted state to {}", self.path.display());
        Ok(())
    }
}
