use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::api::{Exchange, MarketDataProvider, Notifier};
use crate::backfill::{fetch_history, with_references, BackfillReport};
use crate::config::Settings;
use crate::discovery::is_tradable;
use crate::error::BotError;
use crate::execution::{Executor, PositionManager};
use crate::features::{FeatureBuilder, FeatureRow};
use crate::inference::ModelAdapter;
use crate::models::{ClosedTrade, Fill, QUOTE_ASSET};
use crate::risk::{allocate_equal, evaluate, select_candidates, Candidate, RiskAction};
use crate::state::{HaltMarker, StateStore};
use crate::Result;

/// Model output for one symbol's freshest feature row
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub symbol: String,
    pub date: NaiveDate,
    pub close: f64,
    pub probability: f64,
}

/// What one daily cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub date: Option<NaiveDate>,
    /// (asset, action label) for every evaluated position
    pub actions: Vec<(String, &'static str)>,
    pub trades: Vec<ClosedTrade>,
    pub buys: Vec<Fill>,
    /// Symbols skipped for the day, with the reason
    pub skipped: Vec<(String, String)>,
    pub equity: f64,
    /// Cycle did not run because a halt marker is active
    pub halted: bool,
}

impl CycleReport {
    fn new(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Default::default()
        }
    }

    fn skip(&mut self, symbol: &str, reason: impl ToString) {
        self.skipped.push((symbol.to_string(), reason.to_string()));
    }

    pub fn summary(&self) -> String {
        let date = self.date.map(|d| d.to_string()).unwrap_or_default();
        format!(
            "📊 {}: {} sells, {} buys, {} skipped, equity {:.2} {}",
            date,
            self.trades.len(),
            self.buys.len(),
            self.skipped.len(),
            self.equity,
            QUOTE_ASSET
        )
    }
}

/// One pass of the daily decision loop over borrowed collaborators.
///
/// Order within a cycle: halt check, reconciliation, scoring, exits on held
/// assets, new buys, mark-to-market, invariant check, persist.
pub struct DailyLoop<'a> {
    settings: &'a Settings,
    exchange: &'a dyn Exchange,
    provider: &'a dyn MarketDataProvider,
    model: &'a ModelAdapter,
    notifier: &'a dyn Notifier,
    store: &'a StateStore,
}

impl<'a> DailyLoop<'a> {
    pub fn new(
        settings: &'a Settings,
        exchange: &'a dyn Exchange,
        provider: &'a dyn MarketDataProvider,
        model: &'a ModelAdapter,
        notifier: &'a dyn Notifier,
        store: &'a StateStore,
    ) -> Self {
        Self {
            settings,
            exchange,
            provider,
            model,
            notifier,
            store,
        }
    }

    pub fn store(&self) -> &StateStore {
        self.store
    }

    /// Run one full cycle for `today`.
    ///
    /// Per-asset failures are logged and skipped. Errors are returned only
    /// for failures that stop the whole cycle (exchange account unreachable,
    /// inference failure, invariant violation); in every such case no order
    /// has been placed after the failure and a violated invariant leaves a
    /// persisted halt marker.
    pub async fn run_cycle(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut state = self.store.load()?;
        let mut report = CycleReport::new(today);

        if let Some(halt) = &state.halt {
            if !halt.expired(now, self.settings.execution.invariant_cooldown_hours) {
                tracing::warn!("🛑 Halted since {} ({}), skipping cycle", halt.at, halt.reason);
                report.halted = true;
                return Ok(report);
            }
            tracing::info!("Halt marker from {} expired, resuming", halt.at);
            state.halt = None;
        }

        let mut pm = PositionManager::new(state, self.settings.execution.dust_notional);
        if let Err(e) = pm.state().check_invariants() {
            return self.halt(pm, e, now).await;
        }

        // ============================================================
        // 1. Reconcile with the exchange
        // ============================================================
        let mut prices = self.reconcile(&mut pm, today, &mut report).await?;

        // ============================================================
        // 2. Features and probabilities
        // ============================================================
        let universe = self.settings.universe();
        let start = today - Duration::days(i64::from(self.settings.execution.lookback_days));
        let history = fetch_history(self.provider, &with_references(&universe), start, today).await;
        for (symbol, e) in &history.skipped {
            report.skip(symbol, e);
        }

        let scores = match self.score(&universe, &history, today) {
            Ok(scores) => scores,
            Err(e) => {
                tracing::error!("❌ Inference failed, no trades this cycle: {}", e);
                self.notify(&format!("❌ Inference failed, no trades today: {}", e)).await;
                return Err(e);
            }
        };
        let probabilities: BTreeMap<&str, f64> = scores
            .iter()
            .map(|s| (s.symbol.as_str(), s.probability))
            .collect();

        // ============================================================
        // 3. Exit rules on held assets
        // ============================================================
        let executor = Executor::new(self.exchange);
        let params = self.settings.risk_params();

        for asset in pm.held_assets() {
            let Some(&price) = prices.get(&asset) else {
                continue;
            };
            let Some((position, meta)) = pm.position(&asset) else {
                continue;
            };
            let probability = probabilities.get(asset.as_str()).copied();
            let evaluation = evaluate(meta, position.qty, price, probability, &params);

            for action in &evaluation.actions {
                report.actions.push((asset.clone(), action.label()));
            }
            if evaluation.actions == [RiskAction::NoOp] {
                tracing::debug!("{} ratio {:.3}: no action", asset, evaluation.ratio);
            } else {
                tracing::info!(
                    "⚖️  {} ratio {:.3} prob {:?}: {:?}",
                    asset,
                    evaluation.ratio,
                    probability,
                    evaluation.actions
                );
            }

            let applied = executor.apply_evaluation(&mut pm, &asset, &evaluation, today).await;
            for trade in &applied.trades {
                self.notify(&format!(
                    "🔴 {} {} {:.6} @ {:.6} ({:+.2}%)",
                    trade.reason, trade.asset, trade.qty, trade.sell_price, trade.pct_change
                ))
                .await;
            }
            report.trades.extend(applied.trades);

            match applied.error {
                None => {}
                Some(e @ BotError::InternalInvariant(_)) => return self.halt(pm, e, now).await,
                Some(e) => {
                    tracing::warn!("⚠️  {}: order abandoned: {}", asset, e);
                    self.notify(&format!("⚠️ {} order abandoned: {}", asset, e)).await;
                    report.skip(&asset, e);
                }
            }
        }

        // ============================================================
        // 4. New buys
        // ============================================================
        let candidates: Vec<Candidate> = scores
            .iter()
            .map(|s| Candidate {
                symbol: s.symbol.clone(),
                probability: s.probability,
                price: s.close,
            })
            .collect();
        let picked = select_candidates(
            &candidates,
            |symbol| pm.is_held(symbol),
            self.settings.buy_threshold(self.model.threshold()),
            self.settings.ml.top_k,
            self.settings.risk.max_positions,
            pm.held_count(),
        );
        let allocations = allocate_equal(pm.cash(), &picked, self.settings.execution.min_buy_notional);
        if picked.len() > allocations.len() {
            tracing::info!(
                "💸 Cash {:.2} too low to fund {} candidates at {:.2} minimum",
                pm.cash(),
                picked.len(),
                self.settings.execution.min_buy_notional
            );
        }

        for allocation in &allocations {
            match executor.buy(&mut pm, allocation, today).await {
                Ok(fill) => {
                    self.notify(&format!(
                        "🟢 BUY {} {:.6} @ {:.6} ({:.2} {})",
                        fill.asset, fill.qty, fill.avg_price, fill.quote_qty, QUOTE_ASSET
                    ))
                    .await;
                    prices.insert(fill.asset.clone(), fill.avg_price);
                    report.buys.push(fill);
                }
                Err(e @ BotError::InternalInvariant(_)) => return self.halt(pm, e, now).await,
                Err(e) => {
                    tracing::warn!("⚠️  {}: buy abandoned: {}", allocation.symbol, e);
                    self.notify(&format!("⚠️ {} buy abandoned: {}", allocation.symbol, e)).await;
                    report.skip(&allocation.symbol, e);
                }
            }
        }

        // ============================================================
        // 5. Mark, check, persist
        // ============================================================
        report.equity = pm.mark_to_market(&prices);

        if let Err(e) = pm.state().check_invariants() {
            return self.halt(pm, e, now).await;
        }

        let mut state = pm.into_state();
        state.last_run = Some(today);
        self.store.save(&state)?;

        tracing::info!("{}", report.summary());
        self.notify(&report.summary()).await;
        Ok(report)
    }

    /// Sync cash and holdings with exchange balances; returns current prices
    /// of every asset still held.
    async fn reconcile(
        &self,
        pm: &mut PositionManager,
        today: NaiveDate,
        report: &mut CycleReport,
    ) -> Result<BTreeMap<String, f64>> {
        let balances = self.exchange.balances().await?;
        pm.state_mut().capital = balances.get(QUOTE_ASSET).copied().unwrap_or(0.0);

        let assets: BTreeSet<String> = pm
            .held_assets()
            .into_iter()
            .chain(
                balances
                    .keys()
                    .filter(|a| a.as_str() != QUOTE_ASSET && is_tradable(a))
                    .cloned(),
            )
            .collect();

        let dust = self.settings.execution.dust_notional;
        let mut prices = BTreeMap::new();

        for asset in assets {
            let price = match self.exchange.price(&asset).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("⚠️  No price for {}, skipping today: {}", asset, e);
                    report.skip(&asset, e);
                    continue;
                }
            };

            let qty = balances.get(&asset).copied().unwrap_or(0.0);
            let sellable = match self.exchange.sellable_qty(&asset, qty).await {
                Ok(q) => q,
                Err(e) => {
                    tracing::debug!("{}: no lot size ({}), using full balance", asset, e);
                    qty
                }
            };
            if sellable * price <= dust {
                if pm.is_held(&asset) {
                    tracing::warn!("{} no longer held on the exchange, dropping position", asset);
                    pm.forget(&asset);
                }
                continue;
            }

            prices.insert(asset.clone(), price);
            match pm.state_mut().positions.get_mut(&asset) {
                Some(position) => position.qty = qty,
                None => pm.adopt(&asset, qty, price, today)?,
            }
        }

        tracing::info!(
            "🔄 Reconciled: cash {:.2} {}, {} positions",
            pm.cash(),
            QUOTE_ASSET,
            pm.held_count()
        );
        Ok(prices)
    }

    /// Score the freshest feature row of every universe symbol.
    ///
    /// A row is fresh when it is at most `max_feature_age_days` old.
    pub fn score(&self, universe: &[String], history: &BackfillReport, today: NaiveDate) -> Result<Vec<Score>> {
        let builder = FeatureBuilder::new(history.bars_for("BTC"), history.bars_for("ETH"));
        let max_age = self.settings.execution.max_feature_age_days;

        let fresh: Vec<FeatureRow> = universe
            .iter()
            .filter_map(|symbol| {
                let bars = history.bars.get(symbol)?;
                let row = builder.build_symbol(symbol, bars).pop();
                match row {
                    Some(row) if (today - row.date).num_days() <= max_age => Some(row),
                    Some(row) => {
                        tracing::info!("{}: latest feature row {} is stale", symbol, row.date);
                        None
                    }
                    None => {
                        tracing::info!("{}: not enough history for a feature row", symbol);
                        None
                    }
                }
            })
            .collect();

        if fresh.is_empty() {
            tracing::warn!("No fresh feature rows today");
            return Ok(Vec::new());
        }

        let probabilities = self.model.score_rows(&fresh)?;
        let scores: Vec<Score> = fresh
            .into_iter()
            .zip(probabilities)
            .map(|(row, probability)| Score {
                symbol: row.symbol,
                date: row.date,
                close: row.close,
                probability,
            })
            .collect();

        for s in &scores {
            tracing::debug!("{} {} p={:.4}", s.symbol, s.date, s.probability);
        }
        Ok(scores)
    }

    /// Persist a halt marker alongside the current state and surface the error
    async fn halt(&self, pm: PositionManager, error: BotError, now: DateTime<Utc>) -> Result<CycleReport> {
        tracing::error!("🛑 Invariant violated, halting: {}", error);
        let mut state = pm.into_state();
        state.halt = Some(HaltMarker {
            reason: error.to_string(),
            at: now,
        });
        self.store.save(&state)?;
        self.notify(&format!(
            "🛑 Trading halted for {}h: {}",
            self.settings.execution.invariant_cooldown_hours, error
        ))
        .await;
        Err(error)
    }

    /// Notification failures are logged and otherwise ignored
    async fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.notify(text).await {
            tracing::warn!("Notifier failed: {}", e);
        }
    }
}
