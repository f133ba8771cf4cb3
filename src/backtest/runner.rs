use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::backtest::metrics::{BacktestMetrics, EquityPoint, SignalOutcome};
use crate::execution::PositionManager;
use crate::features::builder::LABEL_HORIZON_DAYS;
use crate::features::FeatureRow;
use crate::inference::ModelAdapter;
use crate::models::{ClosedTrade, TradeReason};
use crate::risk::{allocate_equal, evaluate, select_candidates, Candidate, RiskParams};
use crate::state::StateDocument;
use crate::Result;

/// One feature row reduced to what the replay needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRow {
    pub date: NaiveDate,
    pub symbol: String,
    pub close: f64,
    pub probability: f64,
}

/// Score a feature matrix once so every grid cell replays the same
/// probabilities
pub fn score_feature_rows(model: &ModelAdapter, rows: &[FeatureRow]) -> Result<Vec<ScoredRow>> {
    let probabilities = model.score_rows(rows)?;
    Ok(rows
        .iter()
        .zip(probabilities)
        .map(|(row, probability)| ScoredRow {
            date: row.date,
            symbol: row.symbol.clone(),
            close: row.close,
            probability,
        })
        .collect())
}

/// An entry made by the replay, with its two-day outcome
#[derive(Debug, Clone, PartialEq)]
pub struct BuySignal {
    pub asset: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub probability: f64,
    pub future_close: Option<f64>,
    /// `None` when the horizon runs past the data
    pub outcome: Option<SignalOutcome>,
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Exit constants; `sell_threshold` is replaced per grid cell
    pub params: RiskParams,
    pub top_k: usize,
    pub max_positions: usize,
    pub min_buy_notional: f64,
    pub dust_notional: f64,
    /// Charged on both sides of every fill
    pub fee_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 1000.0,
            params: RiskParams::default(),
            top_k: 5,
            max_positions: 5,
            min_buy_notional: 10.0,
            dust_notional: 1.0,
            fee_rate: 0.0,
        }
    }
}

/// Everything one (buy, sell) replay produced
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub closed_trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub buy_signals: Vec<BuySignal>,
    pub metrics: BacktestMetrics,
    pub final_state: StateDocument,
}

/// Replays the live decision rules over a scored feature matrix.
///
/// Each day: exits on held assets first, then new buys at the day's close,
/// then a mark-to-market at the close. Everything still open after the last
/// day is sold at its last close as END_OF_BACKTEST.
pub struct BacktestRunner {
    config: BacktestConfig,
}

impl BacktestRunner {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Run every (buy, sell) pair of the grid, buy-major
    pub fn run_grid(&self, rows: &[ScoredRow], buy_thresholds: &[f64], sell_thresholds: &[f64]) -> Result<Vec<BacktestResult>> {
        let mut results = Vec::with_capacity(buy_thresholds.len() * sell_thresholds.len());
        for &buy in buy_thresholds {
            for &sell in sell_thresholds {
                results.push(self.run(rows, buy, sell)?);
            }
        }
        Ok(results)
    }

    pub fn run(&self, rows: &[ScoredRow], buy_threshold: f64, sell_threshold: f64) -> Result<BacktestResult> {
        let config = &self.config;
        let params = RiskParams {
            sell_threshold,
            ..config.params
        };

        let days = group_by_day(rows);
        let series = closes_by_symbol(rows);

        let mut pm = PositionManager::new(StateDocument::fresh(config.initial_capital), config.dust_notional);
        let mut last_close: BTreeMap<String, f64> = BTreeMap::new();
        let mut equity_curve = Vec::with_capacity(days.len());
        let mut buy_signals = Vec::new();

        tracing::debug!(
            "Replaying {} days, buy {:.2} sell {:.2}",
            days.len(),
            buy_threshold,
            sell_threshold
        );

        for (&date, today) in &days {
            for (symbol, row) in today {
                last_close.insert(symbol.to_string(), row.close);
            }

            // Exits first so released cash is available for today's buys
            for asset in pm.held_assets() {
                let Some(row) = today.get(asset.as_str()) else {
                    continue;
                };
                let Some((position, meta)) = pm.position(&asset) else {
                    continue;
                };
                let evaluation = evaluate(meta, position.qty, row.close, Some(row.probability), &params);

                if let Some(qty) = evaluation.partial_qty() {
                    self.sell(&mut pm, &asset, qty, row.close, date, TradeReason::PartialSell)?;
                }
                if pm.is_held(&asset) {
                    pm.update_meta(&asset, evaluation.meta.clone())?;
                }
                if let Some(reason) = evaluation.terminal().and_then(|a| a.trade_reason()) {
                    if let Some(qty) = pm.position(&asset).map(|(p, _)| p.qty) {
                        self.sell(&mut pm, &asset, qty, row.close, date, reason)?;
                    }
                }
            }

            let candidates: Vec<Candidate> = today
                .values()
                .map(|row| Candidate {
                    symbol: row.symbol.clone(),
                    probability: row.probability,
                    price: row.close,
                })
                .collect();
            let picked = select_candidates(
                &candidates,
                |symbol| pm.is_held(symbol),
                buy_threshold,
                config.top_k,
                config.max_positions,
                pm.held_count(),
            );

            for allocation in allocate_equal(pm.cash(), &picked, config.min_buy_notional) {
                let qty = allocation.quote_amount * (1.0 - config.fee_rate) / allocation.price;
                pm.open(&allocation.symbol, qty, allocation.price, allocation.quote_amount, date)?;

                let probability = picked
                    .iter()
                    .find(|c| c.symbol == allocation.symbol)
                    .map(|c| c.probability)
                    .unwrap_or_default();
                let future_close = series
                    .get(allocation.symbol.as_str())
                    .and_then(|s| close_after(s, date, LABEL_HORIZON_DAYS));
                buy_signals.push(BuySignal {
                    asset: allocation.symbol.clone(),
                    entry_date: date,
                    entry_price: allocation.price,
                    probability,
                    future_close,
                    outcome: future_close.map(|c| SignalOutcome::classify(allocation.price, c)),
                });
            }

            pm.state().check_invariants()?;
            equity_curve.push(snapshot(&mut pm, date, &last_close));
        }

        // Liquidate at the last known close
        if let Some(&last_date) = days.keys().next_back() {
            for asset in pm.held_assets() {
                let price = last_close.get(&asset).copied();
                let qty = pm.position(&asset).map(|(p, _)| p.qty);
                if let (Some(price), Some(qty)) = (price, qty) {
                    self.sell(&mut pm, &asset, qty, price, last_date, TradeReason::EndOfBacktest)?;
                }
            }
            if let Some(point) = equity_curve.last_mut() {
                *point = snapshot(&mut pm, last_date, &last_close);
            }
        }

        let closed_trades = pm.closed_trades().to_vec();
        let outcomes: Vec<Option<SignalOutcome>> = buy_signals.iter().map(|s| s.outcome).collect();
        let metrics = BacktestMetrics::calculate(
            buy_threshold,
            sell_threshold,
            config.initial_capital,
            &closed_trades,
            &equity_curve,
            &outcomes,
        );

        tracing::info!(
            "Backtest buy {:.2} sell {:.2}: {} trades, equity {:.2} ({:+.2}%)",
            buy_threshold,
            sell_threshold,
            metrics.total_trades,
            metrics.final_equity,
            metrics.total_return_pct
        );

        Ok(BacktestResult {
            buy_threshold,
            sell_threshold,
            closed_trades,
            equity_curve,
            buy_signals,
            metrics,
            final_state: pm.into_state(),
        })
    }

    fn sell(
        &self,
        pm: &mut PositionManager,
        asset: &str,
        qty: f64,
        price: f64,
        date: NaiveDate,
        reason: TradeReason,
    ) -> Result<ClosedTrade> {
        let proceeds = qty * price * (1.0 - self.config.fee_rate);
        pm.record_sale(asset, qty, price, proceeds, date, reason)
    }
}

fn snapshot(pm: &mut PositionManager, date: NaiveDate, prices: &BTreeMap<String, f64>) -> EquityPoint {
    let equity = pm.mark_to_market(prices);
    EquityPoint {
        date,
        cash: pm.cash(),
        positions_value: equity - pm.cash(),
        equity,
        open_positions: pm.held_count(),
    }
}

/// date -> symbol -> row; a later duplicate of (date, symbol) replaces an
/// earlier one
fn group_by_day(rows: &[ScoredRow]) -> BTreeMap<NaiveDate, BTreeMap<&str, &ScoredRow>> {
    let mut days: BTreeMap<NaiveDate, BTreeMap<&str, &ScoredRow>> = BTreeMap::new();
    for row in rows {
        days.entry(row.date)
            .or_default()
            .insert(row.symbol.as_str(), row);
    }
    days
}

fn closes_by_symbol(rows: &[ScoredRow]) -> BTreeMap<&str, BTreeMap<NaiveDate, f64>> {
    let mut series: BTreeMap<&str, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for row in rows {
        series
            .entry(row.symbol.as_str())
            .or_default()
            .insert(row.date, row.close);
    }
    series
}

/// Close `rows` rows after `date` in one symbol's series
fn close_after(series: &BTreeMap<NaiveDate, f64>, date: NaiveDate, rows: usize) -> Option<f64> {
    series
        .range(date..)
        .nth(rows)
        .map(|(_, close)| *close)
}
