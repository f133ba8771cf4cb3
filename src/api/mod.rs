// External collaborators: market data provider, spot exchange, chat notifier
pub mod binance;
pub mod lunarcrush;
pub mod paper;
pub mod telegram;

pub use binance::BinanceClient;
pub use lunarcrush::LunarCrushClient;
pub use paper::PaperExchange;
pub use telegram::TelegramNotifier;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{DailyBar, Fill};
use crate::Result;

/// Spot exchange quoted in USDT
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Free + locked balance per asset, quote currency included
    async fn balances(&self) -> Result<BTreeMap<String, f64>>;

    /// Last traded price of `asset` against the quote currency
    async fn price(&self, asset: &str) -> Result<f64>;

    /// Market buy spending `quote_amount` of the quote currency
    async fn market_buy(&self, asset: &str, quote_amount: f64) -> Result<Fill>;

    /// Market sell of `qty` units of `asset`
    async fn market_sell(&self, asset: &str, qty: f64) -> Result<Fill>;

    /// Largest quantity not above `qty` that a sell order of `asset` accepts
    async fn sellable_qty(&self, _asset: &str, qty: f64) -> Result<f64> {
        Ok(qty)
    }
}

/// Daily market + social time series source
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Daily bars for `symbol` covering `start..=end`, oldest first
    async fn daily_bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}

/// Notifier used when no chat is configured; messages only reach the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        tracing::info!("📣 {}", text);
        Ok(())
    }
}
