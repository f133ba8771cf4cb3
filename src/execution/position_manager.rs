use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::error::BotError;
use crate::models::{ClosedTrade, Position, PositionMeta, TradeReason, QUOTE_ASSET};
use crate::state::StateDocument;
use crate::Result;

/// Remaining quantity below which a position counts as fully sold
const QTY_EPSILON: f64 = 1e-12;

/// Bookkeeping over the state document shared by the live loop and the
/// backtester.
///
/// Positions and their metadata are only ever created and removed together.
#[derive(Debug, Clone)]
pub struct PositionManager {
    state: StateDocument,
    dust_notional: f64,
    closed_trades: Vec<ClosedTrade>,
}

impl PositionManager {
    pub fn new(state: StateDocument, dust_notional: f64) -> Self {
        Self {
            state,
            dust_notional,
            closed_trades: Vec::new(),
        }
    }

    pub fn state(&self) -> &StateDocument {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StateDocument {
        &mut self.state
    }

    pub fn into_state(self) -> StateDocument {
        self.state
    }

    pub fn cash(&self) -> f64 {
        self.state.capital
    }

    pub fn is_held(&self, asset: &str) -> bool {
        self.state.is_held(asset)
    }

    pub fn held_count(&self) -> usize {
        self.state.positions.len()
    }

    pub fn position(&self, asset: &str) -> Option<(&Position, &PositionMeta)> {
        Some((self.state.positions.get(asset)?, self.state.positions_meta.get(asset)?))
    }

    /// Held assets in symbol order
    pub fn held_assets(&self) -> Vec<String> {
        self.state.positions.keys().cloned().collect()
    }

    /// Sales realized since this manager was created
    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed_trades
    }

    pub fn realized_pnl(&self) -> f64 {
        self.closed_trades.iter().map(ClosedTrade::pnl).sum()
    }

    /// Record a buy: spend `cost` of cash for `qty` units at `entry_px`.
    pub fn open(&mut self, asset: &str, qty: f64, entry_px: f64, cost: f64, date: NaiveDate) -> Result<()> {
        if asset == QUOTE_ASSET {
            return Err(BotError::InternalInvariant(format!("refusing to open a {} position", QUOTE_ASSET)));
        }
        if self.is_held(asset) {
            return Err(BotError::InternalInvariant(format!("{} is already held", asset)));
        }
        if !(qty > 0.0 && qty.is_finite()) || !(entry_px > 0.0 && entry_px.is_finite()) {
            return Err(BotError::InternalInvariant(format!(
                "cannot open {} with qty {} at {}",
                asset, qty, entry_px
            )));
        }

        self.state.capital = (self.state.capital - cost).max(0.0);
        self.state
            .positions
            .insert(asset.to_string(), Position { qty, entry_px });
        self.state
            .positions_meta
            .insert(asset.to_string(), PositionMeta::new(entry_px, date));

        tracing::info!(
            "🟢 OPEN {} qty {:.6} @ {:.6} (cost {:.2}, cash {:.2})",
            asset,
            qty,
            entry_px,
            cost,
            self.state.capital
        );
        Ok(())
    }

    /// Take over a holding found on the exchange without metadata.
    ///
    /// The basis is the current price, so the first evaluation sees ratio 1.0.
    /// Cash is not touched.
    pub fn adopt(&mut self, asset: &str, qty: f64, price: f64, date: NaiveDate) -> Result<()> {
        if !(qty > 0.0 && price > 0.0) {
            return Err(BotError::InternalInvariant(format!(
                "cannot adopt {} with qty {} at {}",
                asset, qty, price
            )));
        }
        self.state
            .positions
            .insert(asset.to_string(), Position { qty, entry_px: price });
        self.state
            .positions_meta
            .insert(asset.to_string(), PositionMeta::new(price, date));
        tracing::warn!("🧩 Adopted unknown-basis holding {} qty {:.6} at {:.6}", asset, qty, price);
        Ok(())
    }

    /// Store metadata produced by the state machine for an open position
    pub fn update_meta(&mut self, asset: &str, meta: PositionMeta) -> Result<()> {
        match self.state.positions_meta.get_mut(asset) {
            Some(slot) if self.state.positions.contains_key(asset) => {
                *slot = meta;
                Ok(())
            }
            _ => Err(BotError::InternalInvariant(format!("no open position for {}", asset))),
        }
    }

    /// Record a sale of `qty` units at `sell_price` yielding `proceeds`.
    ///
    /// The position is closed, together with its metadata, when the remainder
    /// is worth at most the dust notional at `sell_price`.
    pub fn record_sale(
        &mut self,
        asset: &str,
        qty: f64,
        sell_price: f64,
        proceeds: f64,
        date: NaiveDate,
        reason: TradeReason,
    ) -> Result<ClosedTrade> {
        let (position, meta) = match self.position(asset) {
            Some((p, m)) => (*p, m.clone()),
            None => return Err(BotError::InternalInvariant(format!("sale of {} without a position", asset))),
        };
        let sold = qty.min(position.qty);
        if !(sold > 0.0) {
            return Err(BotError::InternalInvariant(format!("sale of {} units of {}", qty, asset)));
        }

        let trade = ClosedTrade {
            asset: asset.to_string(),
            entry_date: meta.entry_date,
            exit_date: date,
            buy_price: position.entry_px,
            sell_price,
            qty: sold,
            pct_change: (sell_price / position.entry_px - 1.0) * 100.0,
            reason,
        };

        self.state.capital += proceeds;
        let remaining = position.qty - sold;
        let closed = remaining <= QTY_EPSILON || remaining * sell_price <= self.dust_notional;

        if closed {
            self.state.positions.remove(asset);
            self.state.positions_meta.remove(asset);
        } else if let Some(p) = self.state.positions.get_mut(asset) {
            p.qty = remaining;
        }

        if trade.pnl() < 0.0 {
            self.state.counters.losses_count += 1;
        }

        tracing::info!(
            "🔴 {} {} qty {:.6} @ {:.6} ({:+.2}%, pnl {:.2}){}",
            reason,
            asset,
            sold,
            sell_price,
            trade.pct_change,
            trade.pnl(),
            if closed { " closed" } else { "" }
        );

        self.closed_trades.push(trade.clone());
        Ok(trade)
    }

    /// Record a terminal sale.
    ///
    /// The position and its metadata are closed whatever remainder the
    /// exchange left behind (lot-size rounding).
    pub fn record_exit(
        &mut self,
        asset: &str,
        qty: f64,
        sell_price: f64,
        proceeds: f64,
        date: NaiveDate,
        reason: TradeReason,
    ) -> Result<ClosedTrade> {
        let trade = self.record_sale(asset, qty, sell_price, proceeds, date, reason)?;
        if let Some((position, _)) = self.position(asset) {
            tracing::info!(
                "{} {:.8} left over after {}, position closed",
                asset,
                position.qty,
                reason
            );
            self.forget(asset);
        }
        Ok(trade)
    }

    /// Drop a position without a sale (holding vanished from the exchange)
    pub fn forget(&mut self, asset: &str) {
        self.state.positions.remove(asset);
        self.state.positions_meta.remove(asset);
    }

    /// Mark-to-market equity; raises `capital_high` when exceeded.
    pub fn mark_to_market(&mut self, prices: &BTreeMap<String, f64>) -> f64 {
        let equity = self.state.equity(prices);
        if equity > self.state.counters.capital_high {
            self.state.counters.capital_high = equity;
        }
        equity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn manager() -> PositionManager {
        PositionManager::new(StateDocument::fresh(1000.0), 1.0)
    }

    #[test]
    fn test_open_position() {
        let mut pm = manager();
        pm.open("SOL", 10.0, 100.0, 1000.0, date(1)).unwrap();

        assert!(pm.is_held("SOL"));
        assert_eq!(pm.cash(), 0.0);
        let (position, meta) = pm.position("SOL").unwrap();
        assert_eq!(position.qty, 10.0);
        assert_eq!(meta.entry_px, 100.0);
        assert_eq!(meta.max_price, 100.0);
        assert!(pm.state().check_invariants().is_ok());
    }

    #[test]
    fn test_prevent_duplicate_positions() {
        let mut pm = manager();
        pm.open("SOL", 1.0, 100.0, 100.0, date(1)).unwrap();
        assert!(pm.open("SOL", 1.0, 100.0, 100.0, date(2)).is_err());
        assert!(pm.open(QUOTE_ASSET, 1.0, 1.0, 1.0, date(2)).is_err());
    }

    #[test]
    fn test_stop_loss_sale_closes_and_counts_loss() {
        let mut pm = manager();
        pm.open("X", 10.0, 100.0, 1000.0, date(1)).unwrap();

        let trade = pm
            .record_sale("X", 10.0, 74.0, 740.0, date(2), TradeReason::StopLoss)
            .unwrap();

        assert!(!pm.is_held("X"));
        assert!(pm.state().positions_meta.is_empty());
        assert_eq!(pm.cash(), 740.0);
        assert_eq!(trade.pnl(), -260.0);
        assert_eq!(pm.state().counters.losses_count, 1);
        assert_eq!(pm.realized_pnl(), -260.0);
    }

    #[test]
    fn test_partial_sale_keeps_position() {
        let mut pm = manager();
        pm.open("Y", 10.0, 100.0, 1000.0, date(1)).unwrap();

        pm.record_sale("Y", 4.0, 145.0, 580.0, date(2), TradeReason::PartialSell)
            .unwrap();

        let (position, _) = pm.position("Y").unwrap();
        assert!((position.qty - 6.0).abs() < 1e-12);
        assert_eq!(pm.cash(), 580.0);
        assert_eq!(pm.state().counters.losses_count, 0);
    }

    #[test]
    fn test_dust_remainder_closes_position() {
        let mut pm = manager();
        pm.open("Z", 10.0, 100.0, 1000.0, date(1)).unwrap();

        // 0.005 units left at 100 is worth 0.5, under the 1.0 dust notional
        pm.record_sale("Z", 9.995, 100.0, 999.5, date(2), TradeReason::SellLogic)
            .unwrap();
        assert!(!pm.is_held("Z"));
        assert!(pm.state().check_invariants().is_ok());
    }

    #[test]
    fn test_exit_closes_position_despite_remainder() {
        let mut pm = manager();
        pm.open("E", 1.009, 700.0, 706.3, date(1)).unwrap();

        let trade = pm
            .record_exit("E", 1.0, 500.0, 500.0, date(3), TradeReason::StopLoss)
            .unwrap();

        assert_eq!(trade.qty, 1.0);
        assert!(!pm.is_held("E"));
        assert!(pm.state().positions_meta.is_empty());
        assert_eq!(pm.state().counters.losses_count, 1);
    }

    #[test]
    fn test_adopt_uses_current_price_as_basis() {
        let mut pm = manager();
        pm.adopt("BNB", 2.0, 300.0, date(5)).unwrap();

        let (position, meta) = pm.position("BNB").unwrap();
        assert_eq!(position.entry_px, 300.0);
        assert_eq!(meta.entry_px, 300.0);
        assert_eq!(pm.cash(), 1000.0);
    }

    #[test]
    fn test_mark_to_market_tracks_high() {
        let mut pm = manager();
        pm.open("SOL", 5.0, 100.0, 500.0, date(1)).unwrap();

        let mut prices = BTreeMap::new();
        prices.insert("SOL".to_string(), 150.0);
        assert_eq!(pm.mark_to_market(&prices), 1250.0);
        assert_eq!(pm.state().counters.capital_high, 1250.0);

        prices.insert("SOL".to_string(), 80.0);
        assert_eq!(pm.mark_to_market(&prices), 900.0);
        assert_eq!(pm.state().counters.capital_high, 1250.0);
    }

    #[test]
    fn test_update_meta_requires_position() {
        let mut pm = manager();
        assert!(pm.update_meta("SOL", PositionMeta::new(1.0, date(1))).is_err());
    }
}
