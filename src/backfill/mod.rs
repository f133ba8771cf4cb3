// Historical download and feature-matrix I/O
pub mod converter;
pub mod dataset;
pub mod validator;

pub use converter::{points_to_bars, utc_day};
pub use dataset::{dataset_header, read_dataset, write_dataset};
pub use validator::BarValidator;

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::api::MarketDataProvider;
use crate::error::BotError;
use crate::models::DailyBar;

/// Symbols used as market references in every feature row
pub const REFERENCE_SYMBOLS: [&str; 2] = ["BTC", "ETH"];

/// Outcome of a multi-symbol history download
#[derive(Debug, Default)]
pub struct BackfillReport {
    pub bars: BTreeMap<String, Vec<DailyBar>>,
    /// Symbols that could not be fetched, with the error
    pub skipped: Vec<(String, BotError)>,
    pub validation_failures: usize,
}

impl BackfillReport {
    pub fn bars_for(&self, symbol: &str) -> &[DailyBar] {
        self.bars.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Download daily bars for every symbol, one at a time.
///
/// A failing symbol is recorded in `skipped` and never aborts the others.
/// Bars failing validation are dropped.
pub async fn fetch_history<P>(
    provider: &P,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> BackfillReport
where
    P: MarketDataProvider + ?Sized,
{
    let validator = BarValidator::new(end);
    let mut report = BackfillReport::default();

    for symbol in symbols {
        match provider.daily_bars(symbol, start, end).await {
            Ok(bars) => {
                let fetched = bars.len();
                let kept: Vec<DailyBar> = bars
                    .into_iter()
                    .filter(|bar| match validator.validate(bar) {
                        Ok(()) => true,
                        Err(reason) => {
                            tracing::warn!("{} {}: {}", symbol, bar.date, reason);
                            false
                        }
                    })
                    .collect();
                report.validation_failures += fetched - kept.len();
                tracing::debug!("{}: {} bars ({} dropped)", symbol, kept.len(), fetched - kept.len());
                report.bars.insert(symbol.clone(), kept);
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!("⏭️  Skipping {} for today: {}", symbol, e);
                } else {
                    tracing::info!("⏭️  Skipping {}: {}", symbol, e);
                }
                report.skipped.push((symbol.clone(), e));
            }
        }
    }

    tracing::info!(
        "📥 Fetched history for {}/{} symbols ({} bars rejected)",
        report.bars.len(),
        symbols.len(),
        report.validation_failures
    );
    report
}

/// Universe plus the reference symbols, deduplicated, references first
pub fn with_references(universe: &[String]) -> Vec<String> {
    let mut symbols: Vec<String> = REFERENCE_SYMBOLS.iter().map(|s| s.to_string()).collect();
    for symbol in universe {
        if !symbols.contains(symbol) {
            symbols.push(symbol.clone());
        }
    }
    symbols
}
