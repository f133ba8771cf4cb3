//! Configuration loading and validation
//!
//! One document (JSON or TOML, picked by extension) layered with
//! `SPOTBOT__`-prefixed environment overrides, e.g.
//! `SPOTBOT__BINANCE_API__API_KEY`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::BotError;
use crate::risk::RiskParams;
use crate::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub binance_api: BinanceSection,
    #[serde(default)]
    pub lunarcrush: LunarCrushSection,
    #[serde(default)]
    pub telegrams: Option<TelegramSection>,
    pub tokens_daily: Vec<String>,
    #[serde(default)]
    pub extended_tokens_daily: Vec<String>,
    pub capital: CapitalSection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default)]
    pub ml: MlSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub backtest: BacktestSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceSection {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_binance_url")]
    pub base_url: String,
    /// Base for exponential back-off between order retries
    #[serde(default = "default_backoff_millis")]
    pub backoff_millis: u64,
}

impl Default for BinanceSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: default_binance_url(),
            backoff_millis: default_backoff_millis(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LunarCrushSection {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_lunarcrush_url")]
    pub base_url: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Wait before retry `n` is `backoff_secs * n`
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

impl Default for LunarCrushSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_lunarcrush_url(),
            requests_per_minute: default_requests_per_minute(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSection {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapitalSection {
    pub initial: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskSection {
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    /// Accepted for compatibility; allocation is equal-weight
    #[serde(default)]
    pub risk_per_position: Option<f64>,
    /// Accepted for compatibility; stops are ratio-based
    #[serde(default)]
    pub atr_stop_loss_multiplier: Option<f64>,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            max_positions: default_max_positions(),
            risk_per_position: None,
            atr_stop_loss_multiplier: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategySection {
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_partial_tp")]
    pub partial_take_profit_pct: f64,
    #[serde(default = "default_partial_ratio")]
    pub partial_take_profit_ratio: f64,
    #[serde(default = "default_trailing_trigger")]
    pub trailing_trigger_pct: f64,
    #[serde(default = "default_trailing")]
    pub trailing_pct: f64,
    #[serde(default = "default_big_gain")]
    pub big_gain_exception_pct: f64,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss(),
            partial_take_profit_pct: default_partial_tp(),
            partial_take_profit_ratio: default_partial_ratio(),
            trailing_trigger_pct: default_trailing_trigger(),
            trailing_pct: default_trailing(),
            big_gain_exception_pct: default_big_gain(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MlSection {
    #[serde(default = "default_buy_threshold")]
    pub buy_probability_threshold: f64,
    #[serde(default = "default_sell_threshold")]
    pub sell_probability_threshold: f64,
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Prefer the threshold bundled with the artifact over `buy_probability_threshold`
    #[serde(default)]
    pub use_calibrated_threshold: bool,
}

impl Default for MlSection {
    fn default() -> Self {
        Self {
            buy_probability_threshold: default_buy_threshold(),
            sell_probability_threshold: default_sell_threshold(),
            model_path: default_model_path(),
            top_k: default_top_k(),
            use_calibrated_threshold: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSection {
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_min_buy_notional")]
    pub min_buy_notional: f64,
    /// Holdings worth less than this (in quote) are ignored
    #[serde(default = "default_dust_notional")]
    pub dust_notional: f64,
    #[serde(default)]
    pub run_hour_utc: u32,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Feature rows older than this are not used for decisions
    #[serde(default = "default_max_feature_age_days")]
    pub max_feature_age_days: i64,
    #[serde(default = "default_cooldown_hours")]
    pub invariant_cooldown_hours: i64,
    /// Trade against the in-memory paper exchange
    #[serde(default)]
    pub paper: bool,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            timeout_secs: default_timeout_secs(),
            min_buy_notional: default_min_buy_notional(),
            dust_notional: default_dust_notional(),
            run_hour_utc: 0,
            state_file: default_state_file(),
            lookback_days: default_lookback_days(),
            max_feature_age_days: default_max_feature_age_days(),
            invariant_cooldown_hours: default_cooldown_hours(),
            paper: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BacktestSection {
    #[serde(default = "default_buy_grid")]
    pub buy_thresholds: Vec<f64>,
    #[serde(default = "default_sell_grid")]
    pub sell_thresholds: Vec<f64>,
    /// Fraction of notional charged on every fill
    #[serde(default)]
    pub fee_rate: f64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for BacktestSection {
    fn default() -> Self {
        Self {
            buy_thresholds: default_buy_grid(),
            sell_thresholds: default_sell_grid(),
            fee_rate: 0.0,
            output_dir: default_output_dir(),
        }
    }
}

fn default_binance_url() -> String {
    "https://api.binance.com".to_string()
}
fn default_backoff_millis() -> u64 {
    1000
}
fn default_lunarcrush_url() -> String {
    "https://lunarcrush.com/api4".to_string()
}
fn default_requests_per_minute() -> u32 {
    10
}
fn default_backoff_secs() -> u64 {
    20
}
fn default_max_positions() -> usize {
    5
}
fn default_stop_loss() -> f64 {
    0.25
}
fn default_partial_tp() -> f64 {
    0.45
}
fn default_partial_ratio() -> f64 {
    0.40
}
fn default_trailing_trigger() -> f64 {
    1.8
}
fn default_trailing() -> f64 {
    0.25
}
fn default_big_gain() -> f64 {
    2.0
}
fn default_buy_threshold() -> f64 {
    0.70
}
fn default_sell_threshold() -> f64 {
    0.25
}
fn default_model_path() -> PathBuf {
    PathBuf::from("model/artifact.json")
}
fn default_top_k() -> usize {
    5
}
fn default_retry_count() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_min_buy_notional() -> f64 {
    10.0
}
fn default_dust_notional() -> f64 {
    1.0
}
fn default_state_file() -> PathBuf {
    PathBuf::from("state/state.json")
}
fn default_lookback_days() -> u32 {
    120
}
fn default_max_feature_age_days() -> i64 {
    2
}
fn default_cooldown_hours() -> i64 {
    24
}
fn default_buy_grid() -> Vec<f64> {
    vec![0.6, 0.7, 0.8]
}
fn default_sell_grid() -> Vec<f64> {
    vec![0.2, 0.25, 0.3]
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("backtest_out")
}

impl Settings {
    /// Load from `path`, apply environment overrides, then validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BotError::ConfigMissing(path.display().to_string()));
        }

        let raw = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("SPOTBOT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| BotError::ConfigInvalid(e.to_string()))?;

        let settings: Settings = raw
            .try_deserialize()
            .map_err(|e| BotError::ConfigInvalid(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tokens_daily.is_empty() {
            return invalid("tokens_daily must list at least one symbol");
        }
        if self.capital.initial <= 0.0 {
            return invalid("capital.initial must be positive");
        }
        if self.risk.max_positions == 0 {
            return invalid("risk.max_positions must be at least 1");
        }
        if self.ml.top_k == 0 {
            return invalid("ml.top_k must be at least 1");
        }

        for (name, value) in [
            ("ml.buy_probability_threshold", self.ml.buy_probability_threshold),
            ("ml.sell_probability_threshold", self.ml.sell_probability_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(&format!("{} must be within [0, 1], got {}", name, value));
            }
        }

        let s = &self.strategy;
        for (name, value) in [
            ("strategy.stop_loss_pct", s.stop_loss_pct),
            ("strategy.partial_take_profit_ratio", s.partial_take_profit_ratio),
            ("strategy.trailing_pct", s.trailing_pct),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return invalid(&format!("{} must be within (0, 1), got {}", name, value));
            }
        }
        if s.partial_take_profit_pct <= 0.0 {
            return invalid("strategy.partial_take_profit_pct must be positive");
        }
        if s.trailing_trigger_pct <= 1.0 || s.big_gain_exception_pct <= 1.0 {
            return invalid("trailing_trigger_pct and big_gain_exception_pct are ratios and must exceed 1");
        }

        if self.execution.run_hour_utc > 23 {
            return invalid("execution.run_hour_utc must be within 0..=23");
        }
        if self.execution.min_buy_notional < 0.0 || self.backtest.fee_rate < 0.0 {
            return invalid("execution.min_buy_notional and backtest.fee_rate must be non-negative");
        }

        Ok(())
    }

    /// Tradable universe: `tokens_daily` plus `extended_tokens_daily`, deduplicated
    pub fn universe(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .tokens_daily
            .iter()
            .chain(self.extended_tokens_daily.iter())
            .map(|s| s.trim().to_uppercase())
            .collect();
        all.sort();
        all.dedup();
        crate::discovery::filter_universe(all)
    }

    pub fn risk_params(&self) -> RiskParams {
        RiskParams {
            stop_loss: self.strategy.stop_loss_pct,
            partial_take_profit: self.strategy.partial_take_profit_pct,
            partial_ratio: self.strategy.partial_take_profit_ratio,
            trailing_trigger: self.strategy.trailing_trigger_pct,
            trailing_giveback: self.strategy.trailing_pct,
            big_gain: self.strategy.big_gain_exception_pct,
            sell_threshold: self.ml.sell_probability_threshold,
        }
    }

    /// Buy threshold after optionally honoring the artifact's calibrated value
    pub fn buy_threshold(&self, calibrated: Option<f64>) -> f64 {
        match calibrated {
            Some(t) if self.ml.use_calibrated_threshold => t,
            _ => self.ml.buy_probability_threshold,
        }
    }
}

fn invalid<T>(msg: &str) -> Result<T> {
    Err(BotError::ConfigInvalid(msg.to_string()))
}
