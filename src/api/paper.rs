use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::binance::floor_to_step;
use super::Exchange;
use crate::error::BotError;
use crate::models::{Fill, TradeSide, QUOTE_ASSET};
use crate::Result;

#[derive(Debug, Default)]
struct PaperBook {
    prices: BTreeMap<String, f64>,
    balances: BTreeMap<String, f64>,
    lot_steps: BTreeMap<String, Decimal>,
    next_order_id: u64,
}

/// In-memory exchange that fills market orders at the posted price
///
/// Used for dry runs (`execution.paper = true`) and in tests.
#[derive(Debug, Clone, Default)]
pub struct PaperExchange {
    book: Arc<Mutex<PaperBook>>,
    fee_rate: f64,
}

impl PaperExchange {
    pub fn new(fee_rate: f64) -> Self {
        Self {
            book: Arc::new(Mutex::new(PaperBook::default())),
            fee_rate,
        }
    }

    pub async fn set_price(&self, asset: &str, price: f64) {
        self.book.lock().await.prices.insert(asset.to_string(), price);
    }

    pub async fn deposit(&self, asset: &str, amount: f64) {
        *self.book.lock().await.balances.entry(asset.to_string()).or_insert(0.0) += amount;
    }

    /// Sell orders of `asset` are floored to a multiple of `step`
    pub async fn set_lot_step(&self, asset: &str, step: Decimal) {
        self.book.lock().await.lot_steps.insert(asset.to_string(), step);
    }
}

fn floor_to_lot(book: &PaperBook, asset: &str, qty: f64) -> f64 {
    match book.lot_steps.get(asset) {
        Some(step) => floor_to_step(qty, *step).and_then(|q| q.to_f64()).unwrap_or(0.0),
        None => qty,
    }
}

fn quote_price(book: &PaperBook, asset: &str) -> Result<f64> {
    book.prices
        .get(asset)
        .copied()
        .filter(|p| *p > 0.0)
        .ok_or_else(|| BotError::ExchangePermanent(format!("no paper price for {}", asset)))
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn balances(&self) -> Result<BTreeMap<String, f64>> {
        let book = self.book.lock().await;
        Ok(book
            .balances
            .iter()
            .filter(|(_, amount)| **amount > 0.0)
            .map(|(asset, amount)| (asset.clone(), *amount))
            .collect())
    }

    async fn price(&self, asset: &str) -> Result<f64> {
        quote_price(&*self.book.lock().await, asset)
    }

    async fn market_buy(&self, asset: &str, quote_amount: f64) -> Result<Fill> {
        let mut book = self.book.lock().await;
        let price = quote_price(&book, asset)?;

        let cash = book.balances.get(QUOTE_ASSET).copied().unwrap_or(0.0);
        if quote_amount <= 0.0 || quote_amount > cash + 1e-9 {
            return Err(BotError::ExchangePermanent(format!(
                "insufficient {} balance: need {:.2}, have {:.2}",
                QUOTE_ASSET, quote_amount, cash
            )));
        }

        let qty = quote_amount * (1.0 - self.fee_rate) / price;
        book.balances.insert(QUOTE_ASSET.to_string(), (cash - quote_amount).max(0.0));
        *book.balances.entry(asset.to_string()).or_insert(0.0) += qty;
        book.next_order_id += 1;

        Ok(Fill {
            asset: asset.to_string(),
            side: TradeSide::Buy,
            qty,
            avg_price: quote_amount / qty,
            quote_qty: quote_amount,
            order_id: format!("paper-{}", book.next_order_id),
        })
    }

    async fn market_sell(&self, asset: &str, qty: f64) -> Result<Fill> {
        let mut book = self.book.lock().await;
        let price = quote_price(&book, asset)?;

        let requested = qty;
        let qty = floor_to_lot(&book, asset, requested);
        if qty <= 0.0 && requested > 0.0 {
            return Err(BotError::ExchangePermanent(format!(
                "quantity {} of {} below lot size",
                requested, asset
            )));
        }

        let held = book.balances.get(asset).copied().unwrap_or(0.0);
        if qty <= 0.0 || qty > held + 1e-9 {
            return Err(BotError::ExchangePermanent(format!(
                "insufficient {} balance: need {}, have {}",
                asset, qty, held
            )));
        }

        let proceeds = qty * price * (1.0 - self.fee_rate);
        let remaining = held - qty;
        if remaining > 1e-12 {
            book.balances.insert(asset.to_string(), remaining);
        } else {
            book.balances.remove(asset);
        }
        *book.balances.entry(QUOTE_ASSET.to_string()).or_insert(0.0) += proceeds;
        book.next_order_id += 1;

        Ok(Fill {
            asset: asset.to_string(),
            side: TradeSide::Sell,
            qty,
            avg_price: proceeds / qty,
            quote_qty: proceeds,
            order_id: format!("paper-{}", book.next_order_id),
        })
    }

    async fn sellable_qty(&self, asset: &str, qty: f64) -> Result<f64> {
        Ok(floor_to_lot(&*self.book.lock().await, asset, qty))
    }
}
