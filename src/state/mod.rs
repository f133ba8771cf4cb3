// Persisted bot state: one document, replaced whole on every write
pub mod store;

pub use store::StateStore;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BotError;
use crate::models::{Position, PositionMeta, QUOTE_ASSET};
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    /// Realized exits with negative PnL
    pub losses_count: u32,
    /// Highest mark-to-market equity seen
    pub capital_high: f64,
}

/// Written when an invariant check fails; cycles are skipped until it expires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltMarker {
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl HaltMarker {
    pub fn expired(&self, now: DateTime<Utc>, cooldown_hours: i64) -> bool {
        now - self.at >= chrono::Duration::hours(cooldown_hours)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub capital: f64,
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub positions_meta: BTreeMap<String, PositionMeta>,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt: Option<HaltMarker>,
    /// Last UTC day a daily cycle completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<NaiveDate>,
}

impl StateDocument {
    pub fn fresh(initial_capital: f64) -> Self {
        Self {
            capital: initial_capital,
            positions: BTreeMap::new(),
            positions_meta: BTreeMap::new(),
            counters: Counters {
                losses_count: 0,
                capital_high: initial_capital,
            },
            halt: None,
            last_run: None,
        }
    }

    pub fn is_held(&self, asset: &str) -> bool {
        self.positions.contains_key(asset)
    }

    /// Cash plus every position marked at `prices`, falling back to entry
    /// price for assets without a quote.
    pub fn equity(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.capital
            + self
                .positions
                .iter()
                .map(|(asset, p)| p.qty * prices.get(asset).copied().unwrap_or(p.entry_px))
                .sum::<f64>()
    }

    /// Verify the structural invariants of the document.
    pub fn check_invariants(&self) -> Result<()> {
        if !self.capital.is_finite() || self.capital < -1e-9 {
            return Err(BotError::InternalInvariant(format!(
                "cash is {}",
                self.capital
            )));
        }
        if self.positions.contains_key(QUOTE_ASSET) || self.positions_meta.contains_key(QUOTE_ASSET) {
            return Err(BotError::InternalInvariant(format!(
                "{} tracked as a position",
                QUOTE_ASSET
            )));
        }

        for asset in self.positions.keys() {
            if !self.positions_meta.contains_key(asset) {
                return Err(BotError::InternalInvariant(format!(
                    "position {} has no metadata",
                    asset
                )));
            }
        }
        for asset in self.positions_meta.keys() {
            if !self.positions.contains_key(asset) {
                return Err(BotError::InternalInvariant(format!(
                    "metadata for {} without a position",
                    asset
                )));
            }
        }

        for (asset, p) in &self.positions {
            if !(p.qty > 0.0 && p.qty.is_finite()) || !(p.entry_px > 0.0 && p.entry_px.is_finite()) {
                return Err(BotError::InternalInvariant(format!(
                    "position {} has qty {} entry {}",
                    asset, p.qty, p.entry_px
                )));
            }
        }
        for (asset, m) in &self.positions_meta {
            if !(m.entry_px > 0.0 && m.entry_px.is_finite()) || !m.max_price.is_finite() {
                return Err(BotError::InternalInvariant(format!(
                    "metadata {} has entry {} max {}",
                    asset, m.entry_px, m.max_price
                )));
            }
        }
        Ok(())
    }
}
