use chrono::NaiveDate;

use crate::api::Exchange;
use crate::error::BotError;
use crate::execution::PositionManager;
use crate::models::{ClosedTrade, Fill, TradeReason};
use crate::risk::{Allocation, Evaluation};
use crate::Result;

/// Trades booked for one evaluation and the failure that cut it short
#[derive(Debug, Default)]
pub struct Applied {
    pub trades: Vec<ClosedTrade>,
    pub error: Option<BotError>,
}

/// Turns state-machine decisions and allocations into market orders and
/// records the resulting fills.
///
/// A failed order leaves the position book exactly as it was before that
/// order.
pub struct Executor<'a> {
    exchange: &'a dyn Exchange,
}

impl<'a> Executor<'a> {
    pub fn new(exchange: &'a dyn Exchange) -> Self {
        Self { exchange }
    }

    /// Apply one evaluation: the optional partial first, then the optional
    /// terminal sale of whatever remains.
    ///
    /// Trades booked before a failing order are kept in the result next to
    /// the error.
    pub async fn apply_evaluation(
        &self,
        pm: &mut PositionManager,
        asset: &str,
        evaluation: &Evaluation,
        date: NaiveDate,
    ) -> Applied {
        let mut applied = Applied::default();
        if let Err(e) = self
            .apply_into(pm, asset, evaluation, date, &mut applied.trades)
            .await
        {
            applied.error = Some(e);
        }
        applied
    }

    async fn apply_into(
        &self,
        pm: &mut PositionManager,
        asset: &str,
        evaluation: &Evaluation,
        date: NaiveDate,
        trades: &mut Vec<ClosedTrade>,
    ) -> Result<()> {
        if let Some(qty) = evaluation.partial_qty() {
            let fill = self.exchange.market_sell(asset, qty).await?;
            trades.push(pm.record_sale(
                &fill.asset,
                fill.qty,
                fill.avg_price,
                fill.quote_qty,
                date,
                TradeReason::PartialSell,
            )?);
        }

        if pm.is_held(asset) {
            pm.update_meta(asset, evaluation.meta.clone())?;
        }

        if let Some(action) = evaluation.terminal() {
            let Some(qty) = pm.position(asset).map(|(p, _)| p.qty) else {
                return Ok(());
            };
            let reason = action
                .trade_reason()
                .unwrap_or(TradeReason::SellLogic);
            let fill = self.exchange.market_sell(asset, qty).await?;
            trades.push(pm.record_exit(&fill.asset, fill.qty, fill.avg_price, fill.quote_qty, date, reason)?);
        }

        Ok(())
    }

    /// Place the market buy for one allocation and open the position at the
    /// fill's average price.
    pub async fn buy(&self, pm: &mut PositionManager, allocation: &Allocation, date: NaiveDate) -> Result<Fill> {
        let fill = self
            .exchange
            .market_buy(&allocation.symbol, allocation.quote_amount)
            .await?;
        pm.open(&fill.asset, fill.qty, fill.avg_price, fill.quote_qty, date)?;
        Ok(fill)
    }
}
