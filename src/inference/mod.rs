//! Model inference
//!
//! Loads the frozen classifier artifact and scores canonical feature rows.
//! The artifact is either a bare estimator object or a two-element array
//! `[estimator, calibrated_threshold]`.

pub mod model;

pub use model::{Estimator, Model, Scaler, Tree};

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::BotError;
use crate::features::{ensure_canonical, FeatureRow, FEATURE_COLUMNS, FEATURE_COUNT, SCHEMA_VERSION};
use crate::Result;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Artifact {
    Pair(Estimator, f64),
    Single(Estimator),
}

/// Loaded classifier plus the optional calibrated threshold bundled with it
#[derive(Debug, Clone)]
pub struct ModelAdapter {
    estimator: Estimator,
    threshold: Option<f64>,
    path: PathBuf,
}

impl ModelAdapter {
    /// Load and validate an artifact from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BotError::ArtifactMissing(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let adapter = Self::from_json(&contents)
            .map(|adapter| Self {
                path: path.to_path_buf(),
                ..adapter
            })?;

        tracing::info!(
            "Loaded model artifact {} (calibrated threshold: {:?})",
            path.display(),
            adapter.threshold
        );
        Ok(adapter)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let artifact: Artifact = serde_json::from_str(json)
            .map_err(|e| BotError::Inference(format!("unreadable artifact: {}", e)))?;

        let (estimator, threshold) = match artifact {
            Artifact::Pair(estimator, threshold) => (estimator, Some(threshold)),
            Artifact::Single(estimator) => (estimator, None),
        };
        Self::new(estimator, threshold)
    }

    pub fn new(estimator: Estimator, threshold: Option<f64>) -> Result<Self> {
        ensure_canonical(&estimator.feature_names)?;
        if let Some(version) = estimator.schema_version {
            if version != SCHEMA_VERSION {
                return Err(BotError::SchemaMismatch(format!(
                    "artifact built for schema v{}, running v{}",
                    version, SCHEMA_VERSION
                )));
            }
        }
        if let Some(t) = threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(BotError::Inference(format!("calibrated threshold {} outside [0, 1]", t)));
            }
        }
        estimator.validate()?;

        Ok(Self {
            estimator,
            threshold,
            path: PathBuf::new(),
        })
    }

    /// Calibrated decision threshold bundled with the artifact, if any
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Probability of the positive class for each row.
    ///
    /// `columns` names the order of values in each row and must be the
    /// canonical feature list.
    pub fn predict_proba<S: AsRef<str>>(&self, columns: &[S], rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        ensure_canonical(columns)?;

        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                if row.len() != FEATURE_COUNT {
                    return Err(BotError::Inference(format!(
                        "row {} has {} values, expected {}",
                        i,
                        row.len(),
                        FEATURE_COUNT
                    )));
                }
                if let Some(pos) = row.iter().position(|v| !v.is_finite()) {
                    return Err(BotError::Inference(format!(
                        "row {} has non-finite {}",
                        i, FEATURE_COLUMNS[pos]
                    )));
                }

                let p = self.estimator.probability(row);
                if p.is_finite() {
                    Ok(p.clamp(0.0, 1.0))
                } else {
                    Err(BotError::Inference(format!("row {} scored {}", i, p)))
                }
            })
            .collect()
    }

    /// Score feature rows produced by [`crate::features::FeatureBuilder`]
    pub fn score_rows(&self, rows: &[FeatureRow]) -> Result<Vec<f64>> {
        let values: Vec<Vec<f64>> = rows.iter().map(|r| r.features.clone()).collect();
        self.predict_proba(&FEATURE_COLUMNS, &values)
    }
}
