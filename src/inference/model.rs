use serde::Deserialize;

use crate::error::BotError;
use crate::Result;

/// Frozen classifier as exported by the training pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Estimator {
    /// Column order the estimator was fitted on
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub model: Model,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Model {
    /// `sigmoid(intercept + coef · standardize(x))`
    Logistic {
        coefficients: Vec<f64>,
        intercept: f64,
        #[serde(default)]
        scaler: Option<Scaler>,
    },
    /// Gradient-boosted binary trees; raw score is `base_score + Σ tree(x)`
    TreeEnsemble {
        #[serde(default)]
        base_score: f64,
        trees: Vec<Tree>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// Array-encoded binary tree. Negative child `c` points at leaf `-c - 1`.
#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    #[serde(default)]
    pub split_feature: Vec<usize>,
    #[serde(default)]
    pub threshold: Vec<f64>,
    #[serde(default)]
    pub left_child: Vec<i32>,
    #[serde(default)]
    pub right_child: Vec<i32>,
    pub leaf_value: Vec<f64>,
    #[serde(default = "default_shrinkage")]
    pub shrinkage: f64,
}

fn default_shrinkage() -> f64 {
    1.0
}

impl Tree {
    fn validate(&self, n_features: usize) -> Result<()> {
        let internal = self.split_feature.len();
        if self.threshold.len() != internal
            || self.left_child.len() != internal
            || self.right_child.len() != internal
        {
            return Err(BotError::Inference(
                "tree definition invalid: split/child/threshold length mismatch".to_string(),
            ));
        }
        if self.leaf_value.is_empty() {
            return Err(BotError::Inference("tree has no leaves".to_string()));
        }
        if self.split_feature.iter().any(|&f| f >= n_features) {
            return Err(BotError::Inference("tree splits on unknown feature".to_string()));
        }

        let leaves = self.leaf_value.len() as i64;
        for &child in self.left_child.iter().chain(&self.right_child) {
            let child = child as i64;
            let valid = if child < 0 {
                -child - 1 < leaves
            } else {
                child < internal as i64
            };
            if !valid {
                return Err(BotError::Inference(format!(
                    "tree child index {} out of range",
                    child
                )));
            }
        }
        Ok(())
    }

    fn predict(&self, features: &[f64]) -> f64 {
        if self.split_feature.is_empty() {
            return self.leaf_value[0] * self.shrinkage;
        }

        let mut node = 0usize;
        // At most one visit per internal node
        for _ in 0..=self.split_feature.len() {
            let value = features[self.split_feature[node]];
            let child = if value <= self.threshold[node] {
                self.left_child[node]
            } else {
                self.right_child[node]
            };

            if child < 0 {
                let leaf = (-child - 1) as usize;
                return self.leaf_value[leaf] * self.shrinkage;
            }
            node = child as usize;
        }
        0.0
    }
}

impl Estimator {
    pub fn validate(&self) -> Result<()> {
        let n = self.feature_names.len();
        match &self.model {
            Model::Logistic {
                coefficients,
                scaler,
                ..
            } => {
                if coefficients.len() != n {
                    return Err(BotError::Inference(format!(
                        "{} coefficients for {} features",
                        coefficients.len(),
                        n
                    )));
                }
                if let Some(s) = scaler {
                    if s.mean.len() != n || s.scale.len() != n {
                        return Err(BotError::Inference("scaler length mismatch".to_string()));
                    }
                }
            }
            Model::TreeEnsemble { trees, .. } => {
                for tree in trees {
                    tree.validate(n)?;
                }
            }
        }
        Ok(())
    }

    /// Positive-class probability for one validated row
    pub fn probability(&self, features: &[f64]) -> f64 {
        let raw = match &self.model {
            Model::Logistic {
                coefficients,
                intercept,
                scaler,
            } => {
                let mut z = *intercept;
                for (i, (x, w)) in features.iter().zip(coefficients).enumerate() {
                    let x = match scaler {
                        Some(s) if s.scale[i] != 0.0 => (x - s.mean[i]) / s.scale[i],
                        Some(s) => x - s.mean[i],
                        None => *x,
                    };
                    z += w * x;
                }
                z
            }
            Model::TreeEnsemble { base_score, trees } => {
                base_score + trees.iter().map(|t| t.predict(features)).sum::<f64>()
            }
        };
        sigmoid(raw)
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
