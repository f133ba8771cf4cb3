use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::backtest::runner::BacktestResult;
use crate::models::ClosedTrade;
use crate::Result;

#[derive(Serialize)]
struct TradeRecord<'a> {
    asset: &'a str,
    entry_date: String,
    exit_date: String,
    buy_price: f64,
    sell_price: f64,
    qty: f64,
    pct_change: f64,
    pnl: f64,
    reason: &'static str,
}

#[derive(Serialize)]
struct SignalRecord<'a> {
    asset: &'a str,
    entry_date: String,
    entry_price: f64,
    probability: f64,
    future_close: Option<f64>,
    outcome: &'static str,
}

#[derive(Serialize)]
struct SummaryRecord {
    buy_threshold: f64,
    sell_threshold: f64,
    final_equity: f64,
    total_return_pct: f64,
    total_trades: usize,
    win_rate: f64,
    profit_factor: f64,
    max_drawdown_pct: f64,
    sharpe_ratio: f64,
    buy_signals: usize,
    correct_5pct: usize,
    small_gain: usize,
    loss: usize,
}

/// `0.7 -> "0.70"`, used in per-cell file names
fn cell_suffix(result: &BacktestResult) -> String {
    format!("{:.2}_{:.2}", result.buy_threshold, result.sell_threshold)
}

/// Closed trades in (exit_date, asset, entry_date, reason) order.
///
/// Two replays over the same inputs produce identical files after this sort.
pub fn canonical_trades(trades: &[ClosedTrade]) -> Vec<ClosedTrade> {
    let mut sorted = trades.to_vec();
    sorted.sort_by(|a, b| {
        a.exit_date
            .cmp(&b.exit_date)
            .then_with(|| a.asset.cmp(&b.asset))
            .then_with(|| a.entry_date.cmp(&b.entry_date))
            .then_with(|| a.reason.as_str().cmp(b.reason.as_str()))
    });
    sorted
}

pub fn write_closed_trades(path: &Path, trades: &[ClosedTrade]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for trade in canonical_trades(trades) {
        writer.serialize(TradeRecord {
            asset: &trade.asset,
            entry_date: trade.entry_date.to_string(),
            exit_date: trade.exit_date.to_string(),
            buy_price: trade.buy_price,
            sell_price: trade.sell_price,
            qty: trade.qty,
            pct_change: trade.pct_change,
            pnl: trade.pnl(),
            reason: trade.reason.as_str(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Write every per-cell report plus `summary.csv` into `dir`.
///
/// Returns the paths written, summary last.
pub fn write_reports(dir: &Path, results: &[BacktestResult]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(results.len() * 3 + 1);

    for result in results {
        let suffix = cell_suffix(result);

        let trades_path = dir.join(format!("closed_trades_{}.csv", suffix));
        write_closed_trades(&trades_path, &result.closed_trades)?;
        written.push(trades_path);

        let equity_path = dir.join(format!("equity_{}.csv", suffix));
        let mut writer = csv::Writer::from_path(&equity_path)?;
        for point in &result.equity_curve {
            writer.serialize(point)?;
        }
        writer.flush()?;
        written.push(equity_path);

        let signals_path = dir.join(format!("buy_signals_{}.csv", suffix));
        let mut writer = csv::Writer::from_path(&signals_path)?;
        for signal in &result.buy_signals {
            writer.serialize(SignalRecord {
                asset: &signal.asset,
                entry_date: signal.entry_date.to_string(),
                entry_price: signal.entry_price,
                probability: signal.probability,
                future_close: signal.future_close,
                outcome: signal.outcome.map(|o| o.as_str()).unwrap_or(""),
            })?;
        }
        writer.flush()?;
        written.push(signals_path);
    }

    let summary_path = dir.join("summary.csv");
    let mut writer = csv::Writer::from_path(&summary_path)?;
    for result in results {
        let m = &result.metrics;
        writer.serialize(SummaryRecord {
            buy_threshold: m.buy_threshold,
            sell_threshold: m.sell_threshold,
            final_equity: m.final_equity,
            total_return_pct: m.total_return_pct,
            total_trades: m.total_trades,
            win_rate: m.win_rate,
            profit_factor: m.profit_factor,
            max_drawdown_pct: m.max_drawdown_pct,
            sharpe_ratio: m.sharpe_ratio,
            buy_signals: m.buy_signals,
            correct_5pct: m.signals_correct_5pct,
            small_gain: m.signals_small_gain,
            loss: m.signals_loss,
        })?;
    }
    writer.flush()?;
    written.push(summary_path);

    tracing::info!("📄 Wrote {} report files to {}", written.len(), dir.display());
    Ok(written)
}
