use serde::{Deserialize, Serialize};

use crate::models::ClosedTrade;

/// Mark-to-market snapshot at one day's close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: chrono::NaiveDate,
    pub cash: f64,
    pub positions_value: f64,
    pub equity: f64,
    pub open_positions: usize,
}

/// How a buy signal played out two days after entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalOutcome {
    /// Close two days later at least 5% above entry
    #[serde(rename = "correct_5pct")]
    Correct5Pct,
    #[serde(rename = "small_gain")]
    SmallGain,
    #[serde(rename = "loss")]
    Loss,
}

impl SignalOutcome {
    /// Classify by `future_close / entry_price`
    pub fn classify(entry_price: f64, future_close: f64) -> Self {
        let ratio = future_close / entry_price;
        if ratio >= crate::features::builder::LABEL_MIN_GAIN {
            SignalOutcome::Correct5Pct
        } else if ratio > 1.0 {
            SignalOutcome::SmallGain
        } else {
            SignalOutcome::Loss
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalOutcome::Correct5Pct => "correct_5pct",
            SignalOutcome::SmallGain => "small_gain",
            SignalOutcome::Loss => "loss",
        }
    }
}

/// Performance summary of one (buy threshold, sell threshold) replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub buy_threshold: f64,
    pub sell_threshold: f64,

    // P&L
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub realized_pnl: f64,

    // Trade statistics (partial sales count as trades)
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,
    pub avg_holding_days: f64,

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,

    // Buy signals
    pub buy_signals: usize,
    pub signals_correct_5pct: usize,
    pub signals_small_gain: usize,
    pub signals_loss: usize,
}

impl BacktestMetrics {
    pub fn calculate(
        buy_threshold: f64,
        sell_threshold: f64,
        initial_capital: f64,
        trades: &[ClosedTrade],
        equity_curve: &[EquityPoint],
        signal_outcomes: &[Option<SignalOutcome>],
    ) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);
        let total_return_pct = if initial_capital > 0.0 {
            (final_equity / initial_capital - 1.0) * 100.0
        } else {
            0.0
        };

        let pnls: Vec<f64> = trades.iter().map(ClosedTrade::pnl).collect();
        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p <= 0.0).collect();

        let total_wins: f64 = wins.iter().sum();
        let total_losses: f64 = losses.iter().map(|l| l.abs()).sum();

        let win_rate = if trades.is_empty() {
            0.0
        } else {
            wins.len() as f64 / trades.len() as f64 * 100.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_holding_days = if trades.is_empty() {
            0.0
        } else {
            trades
                .iter()
                .map(|t| (t.exit_date - t.entry_date).num_days() as f64)
                .sum::<f64>()
                / trades.len() as f64
        };

        let (max_drawdown, max_drawdown_pct) = calculate_drawdown(equity_curve);
        let count = |outcome: SignalOutcome| signal_outcomes.iter().filter(|o| **o == Some(outcome)).count();

        Self {
            buy_threshold,
            sell_threshold,
            initial_capital,
            final_equity,
            total_return_pct,
            realized_pnl: pnls.iter().sum(),
            total_trades: trades.len(),
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate,
            avg_win: mean(&wins),
            avg_loss: if losses.is_empty() { 0.0 } else { total_losses / losses.len() as f64 },
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            profit_factor,
            avg_holding_days,
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio: calculate_sharpe_ratio(equity_curve),
            buy_signals: signal_outcomes.len(),
            signals_correct_5pct: count(SignalOutcome::Correct5Pct),
            signals_small_gain: count(SignalOutcome::SmallGain),
            signals_loss: count(SignalOutcome::Loss),
        }
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║              BACKTEST PERFORMANCE REPORT              ║");
        println!("╚═══════════════════════════════════════════════════════╝");
        println!(
            "  Thresholds:            buy {:.2} / sell {:.2}\n",
            self.buy_threshold, self.sell_threshold
        );

        println!("📊 P&L SUMMARY");
        println!("  Initial Capital:       {:.2}", self.initial_capital);
        println!("  Final Equity:          {:.2}", self.final_equity);
        println!("  Return:                {:+.2}%", self.total_return_pct);
        println!("  Realized P&L:          {:.2}", self.realized_pnl);

        println!("\n📈 TRADE STATISTICS");
        println!("  Total Trades:          {}", self.total_trades);
        println!(
            "  Winning Trades:        {} ({:.1}%)",
            self.winning_trades, self.win_rate
        );
        println!("  Losing Trades:         {}", self.losing_trades);

        if self.total_trades > 0 {
            println!("\n💰 WIN/LOSS ANALYSIS");
            println!("  Average Win:           {:.2}", self.avg_win);
            println!("  Average Loss:          {:.2}", self.avg_loss);
            println!("  Largest Win:           {:.2}", self.largest_win);
            println!("  Largest Loss:          {:.2}", self.largest_loss);
            println!("  Profit Factor:         {:.2}", self.profit_factor);
            println!("  Avg Holding:           {:.1} days", self.avg_holding_days);
        }

        println!("\n⚠️  RISK METRICS");
        println!(
            "  Max Drawdown:          {:.2} ({:.2}%)",
            self.max_drawdown, self.max_drawdown_pct
        );
        println!("  Sharpe Ratio (daily):  {:.2}", self.sharpe_ratio);

        println!("\n🎯 BUY SIGNALS");
        println!("  Total:                 {}", self.buy_signals);
        println!("  Correct (≥5%):         {}", self.signals_correct_5pct);
        println!("  Small gain:            {}", self.signals_small_gain);
        println!("  Loss:                  {}", self.signals_loss);

        println!("\n═══════════════════════════════════════════════════════\n");
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Largest peak-to-trough fall of the equity curve, absolute and in percent
/// of the peak
pub fn calculate_drawdown(curve: &[EquityPoint]) -> (f64, f64) {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0;
    let mut max_dd_pct = 0.0;

    for point in curve {
        if point.equity > peak {
            peak = point.equity;
        }
        let drawdown = peak - point.equity;
        if drawdown > max_dd {
            max_dd = drawdown;
            max_dd_pct = if peak > 0.0 { drawdown / peak * 100.0 } else { 0.0 };
        }
    }

    (max_dd, max_dd_pct)
}

/// Mean over standard deviation of daily equity returns, risk-free rate 0
pub fn calculate_sharpe_ratio(curve: &[EquityPoint]) -> f64 {
    let returns: Vec<f64> = curve
        .windows(2)
        .filter(|w| w[0].equity > 0.0)
        .map(|w| w[1].equity / w[0].equity - 1.0)
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }

    let mean_return = mean(&returns);
    let variance = returns
        .iter()
        .map(|r| {
            let diff = r - mean_return;
            diff * diff
        })
        .sum::<f64>()
        / returns.len() as f64;

    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        mean_return / std_dev
    } else {
        0.0
    }
}
