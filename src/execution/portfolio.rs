use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::api::Exchange;
use crate::discovery::is_tradable;
use crate::execution::PositionManager;
use crate::models::{Fill, TradeReason, QUOTE_ASSET};
use crate::state::{StateDocument, StateStore};
use crate::Result;

/// One line of the portfolio view
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub asset: String,
    pub qty: f64,
    pub entry_px: f64,
    /// Current price, or the entry price when no quote was available
    pub price: f64,
    pub value: f64,
    pub pnl_pct: f64,
    pub partial_sold: bool,
    pub trailing_high: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioView {
    pub cash: f64,
    pub holdings: Vec<Holding>,
    pub equity: f64,
    pub capital_high: f64,
    pub losses_count: u32,
}

impl PortfolioView {
    pub fn from_state(state: &StateDocument, prices: &BTreeMap<String, f64>) -> Self {
        let holdings = state
            .positions
            .iter()
            .map(|(asset, position)| {
                let price = prices.get(asset).copied().unwrap_or(position.entry_px);
                let meta = state.positions_meta.get(asset);
                Holding {
                    asset: asset.clone(),
                    qty: position.qty,
                    entry_px: position.entry_px,
                    price,
                    value: position.qty * price,
                    pnl_pct: (price / position.entry_px - 1.0) * 100.0,
                    partial_sold: meta.is_some_and(|m| m.partial_sold),
                    trailing_high: meta.map(|m| m.max_price).unwrap_or(position.entry_px),
                }
            })
            .collect();

        Self {
            cash: state.capital,
            holdings,
            equity: state.equity(prices),
            capital_high: state.counters.capital_high,
            losses_count: state.counters.losses_count,
        }
    }

    pub fn print_report(&self) {
        println!("\n{}", "=".repeat(72));
        println!("💼 PORTFOLIO");
        println!("{}", "=".repeat(72));
        println!(
            "{:<8} {:>14} {:>12} {:>12} {:>12} {:>8}",
            "Asset", "Qty", "Entry", "Price", "Value", "PnL %"
        );
        for h in &self.holdings {
            println!(
                "{:<8} {:>14.6} {:>12.6} {:>12.6} {:>12.2} {:>+7.2}%{}",
                h.asset,
                h.qty,
                h.entry_px,
                h.price,
                h.value,
                h.pnl_pct,
                if h.partial_sold { " (partial)" } else { "" }
            );
        }
        println!("{}", "-".repeat(72));
        println!("Cash:          {:>12.2} {}", self.cash, QUOTE_ASSET);
        println!("Equity:        {:>12.2} {}", self.equity, QUOTE_ASSET);
        println!("Equity high:   {:>12.2} {}", self.capital_high, QUOTE_ASSET);
        println!("Losing exits:  {:>12}", self.losses_count);
        println!("{}", "=".repeat(72));
    }
}

/// Current prices for every tracked position; assets without a quote are
/// left out.
pub async fn current_prices(exchange: &dyn Exchange, state: &StateDocument) -> BTreeMap<String, f64> {
    let mut prices = BTreeMap::new();
    for asset in state.positions.keys() {
        match exchange.price(asset).await {
            Ok(price) => {
                prices.insert(asset.clone(), price);
            }
            Err(e) => tracing::warn!("No price for {}: {}", asset, e),
        }
    }
    prices
}

/// Market-sell every non-quote asset on the exchange and clear the
/// corresponding positions.
///
/// Assets that fail to sell stay tracked; the state is persisted either way.
pub async fn liquidate_all(
    exchange: &dyn Exchange,
    store: &StateStore,
    dust_notional: f64,
    today: NaiveDate,
) -> Result<Vec<Fill>> {
    let balances = exchange.balances().await?;
    let mut pm = PositionManager::new(store.load()?, dust_notional);
    let mut fills = Vec::new();

    for (asset, &qty) in &balances {
        if asset == QUOTE_ASSET || !is_tradable(asset) || qty <= 0.0 {
            continue;
        }

        let price = match exchange.price(asset).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("⚠️  Cannot price {}, not liquidated: {}", asset, e);
                continue;
            }
        };
        if qty * price <= dust_notional {
            tracing::debug!("{} balance is dust ({:.4}), leaving it", asset, qty * price);
            pm.forget(asset);
            continue;
        }

        match exchange.market_sell(asset, qty).await {
            Ok(fill) => {
                tracing::info!("🔥 Liquidated {} {:.6} for {:.2}", asset, fill.qty, fill.quote_qty);
                if pm.is_held(asset) {
                    if let Err(e) = pm.record_sale(asset, fill.qty, fill.avg_price, fill.quote_qty, today, TradeReason::Liquidation) {
                        tracing::error!("❌ Sold {} but could not book it: {}", asset, e);
                    }
                    pm.forget(asset);
                } else {
                    pm.state_mut().capital += fill.quote_qty;
                }
                fills.push(fill);
            }
            Err(e) => tracing::error!("❌ Failed to liquidate {}: {}", asset, e),
        }
    }

    // Tracked positions with nothing left on the exchange
    for asset in pm.held_assets() {
        if !balances.contains_key(&asset) {
            pm.forget(&asset);
        }
    }

    if let Ok(after) = exchange.balances().await {
        pm.state_mut().capital = after.get(QUOTE_ASSET).copied().unwrap_or(0.0);
    }
    store.save(pm.state())?;
    Ok(fills)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PaperExchange;
    use crate::models::{Position, PositionMeta};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 1).unwrap()
    }

    #[test]
    fn test_view_marks_to_market() {
        let mut state = StateDocument::fresh(100.0);
        state.positions.insert("SOL".to_string(), Position { qty: 2.0, entry_px: 50.0 });
        state.positions_meta.insert("SOL".to_string(), PositionMeta::new(50.0, date()));

        let mut prices = BTreeMap::new();
        prices.insert("SOL".to_string(), 75.0);
        let view = PortfolioView::from_state(&state, &prices);

        assert_eq!(view.equity, 250.0);
        assert_eq!(view.holdings[0].value, 150.0);
        assert_eq!(view.holdings[0].pnl_pct, 50.0);
    }

    #[tokio::test]
    async fn test_liquidate_sells_everything_but_quote() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"), 0.0);

        let mut state = StateDocument::fresh(0.0);
        state.positions.insert("SOL".to_string(), Position { qty: 2.0, entry_px: 50.0 });
        state.positions_meta.insert("SOL".to_string(), PositionMeta::new(50.0, date()));
        store.save(&state).unwrap();

        let exchange = PaperExchange::new(0.0);
        exchange.deposit(QUOTE_ASSET, 10.0).await;
        exchange.deposit("SOL", 2.0).await;
        exchange.deposit("ADA", 100.0).await;
        exchange.set_price("SOL", 60.0).await;
        exchange.set_price("ADA", 0.5).await;

        let fills = liquidate_all(&exchange, &store, 1.0, date()).await.unwrap();
        assert_eq!(fills.len(), 2);

        let saved = store.load().unwrap();
        assert!(saved.positions.is_empty());
        assert!(saved.positions_meta.is_empty());
        assert_eq!(saved.capital, 10.0 + 120.0 + 50.0);

        let balances = exchange.balances().await.unwrap();
        assert_eq!(balances.len(), 1);
        assert!(balances.contains_key(QUOTE_ASSET));
    }
}
