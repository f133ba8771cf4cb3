use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The quote currency. Never tracked as a position.
pub const QUOTE_ASSET: &str = "USDT";

/// One daily observation for one symbol.
///
/// Every numeric field is optional: providers routinely omit social metrics,
/// and zero prices are treated as missing by the indicator engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<f64>,
    pub market_cap: Option<f64>,
    pub galaxy_score: Option<f64>,
    pub alt_rank: Option<f64>,
    pub sentiment: Option<f64>,
    pub social_dominance: Option<f64>,
    pub market_dominance: Option<f64>,
}

impl DailyBar {
    /// Bar with only OHLC set (volume = 1) - convenient for prices-only inputs
    pub fn from_close(date: NaiveDate, close: f64) -> Self {
        Self {
            date,
            open: Some(close),
            close: Some(close),
            high: Some(close),
            low: Some(close),
            volume: Some(1.0),
            ..Default::default()
        }
    }
}

/// Open holding of one asset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub qty: f64,
    pub entry_px: f64,
}

/// Per-asset risk bookkeeping kept in parallel with [`Position`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionMeta {
    pub entry_px: f64,
    pub entry_date: NaiveDate,
    pub max_price: f64,
    pub partial_sold: bool,
    pub did_skip_sell_once: bool,
}

impl PositionMeta {
    pub fn new(entry_px: f64, entry_date: NaiveDate) -> Self {
        Self {
            entry_px,
            entry_date,
            max_price: entry_px,
            partial_sold: false,
            did_skip_sell_once: false,
        }
    }
}

/// Why a sale happened, as recorded in trade logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TradeReason {
    #[serde(rename = "STOPLOSS")]
    StopLoss,
    #[serde(rename = "PARTIAL_SELL")]
    PartialSell,
    #[serde(rename = "TRAILING_STOP")]
    TrailingStop,
    #[serde(rename = "SELL_logic")]
    SellLogic,
    #[serde(rename = "END_OF_BACKTEST")]
    EndOfBacktest,
    #[serde(rename = "LIQUIDATION")]
    Liquidation,
}

impl TradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeReason::StopLoss => "STOPLOSS",
            TradeReason::PartialSell => "PARTIAL_SELL",
            TradeReason::TrailingStop => "TRAILING_STOP",
            TradeReason::SellLogic => "SELL_logic",
            TradeReason::EndOfBacktest => "END_OF_BACKTEST",
            TradeReason::Liquidation => "LIQUIDATION",
        }
    }
}

impl std::fmt::Display for TradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Result of a market order as reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub asset: String,
    pub side: TradeSide,
    pub qty: f64,
    pub avg_price: f64,
    /// Quote currency spent (buy) or received (sell)
    pub quote_qty: f64,
    pub order_id: String,
}

/// A realized sale, full or partial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub asset: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub buy_price: f64,
    pub sell_price: f64,
    pub qty: f64,
    pub pct_change: f64,
    pub reason: TradeReason,
}

impl ClosedTrade {
    pub fn pnl(&self) -> f64 {
        (self.sell_price - self.buy_price) * self.qty
    }
}

/// Trading pair symbol for an asset against the quote currency
pub fn pair_symbol(asset: &str) -> String {
    format!("{}{}", asset, QUOTE_ASSET)
}
