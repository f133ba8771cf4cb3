pub mod metrics;
pub mod report;
pub mod runner;
pub mod synthetic;

pub use metrics::{BacktestMetrics, EquityPoint, SignalOutcome};
pub use report::{canonical_trades, write_closed_trades, write_reports};
pub use runner::{score_feature_rows, BacktestConfig, BacktestResult, BacktestRunner, BuySignal, ScoredRow};
pub use synthetic::{momentum_model, MarketScenario, SyntheticDataGenerator};
