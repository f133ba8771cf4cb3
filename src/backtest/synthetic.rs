use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::features::{FEATURE_COLUMNS, FEATURE_COUNT, SCHEMA_VERSION};
use crate::inference::{Estimator, Model, ModelAdapter};
use crate::models::DailyBar;
use crate::Result;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Mean-reverting chop (±1% around the start price)
    Sideways,
    /// Large daily swings (±8%)
    Volatile,
    /// Every 20th day missing
    WithGaps,
    /// Flat first half, then a 40% slide
    Crash,
}

/// Seeded generator of daily market and social bars
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
    supply: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 150.0,
            base_volume: 1_000_000.0,
            supply: 10_000_000.0,
        }
    }

    /// `days` consecutive daily bars starting at `start`
    pub fn generate(&mut self, scenario: MarketScenario, start: NaiveDate, days: usize) -> Vec<DailyBar> {
        let mut bars = Vec::with_capacity(days);
        let mut price = self.base_price;

        for i in 0..days {
            let change = match scenario {
                MarketScenario::Uptrend => 0.02 + self.rng.gen_range(-0.01..0.01),
                MarketScenario::Downtrend => -0.02 + self.rng.gen_range(-0.01..0.01),
                MarketScenario::Sideways => {
                    (self.base_price - price) / price * 0.1 + self.rng.gen_range(-0.01..0.01)
                }
                MarketScenario::Volatile => self.rng.gen_range(-0.08..0.08),
                MarketScenario::WithGaps => self.rng.gen_range(-0.02..0.02),
                MarketScenario::Crash => {
                    if i < days / 2 {
                        self.rng.gen_range(-0.005..0.01)
                    } else {
                        // Compounds to roughly -40% over the second half
                        let daily = 0.6_f64.powf(1.0 / (days - days / 2) as f64) - 1.0;
                        daily + self.rng.gen_range(-0.005..0.005)
                    }
                }
            };
            price = (price * (1.0 + change)).max(self.base_price * 0.05);

            if scenario == MarketScenario::WithGaps && i % 20 == 19 {
                continue;
            }

            let date = start + Duration::days(i as i64);
            bars.push(self.bar(date, price));
        }

        bars
    }

    /// One series per symbol; each symbol draws from the same generator so
    /// the whole universe is reproducible from one seed
    pub fn universe(
        &mut self,
        symbols: &[(&str, MarketScenario)],
        start: NaiveDate,
        days: usize,
    ) -> BTreeMap<String, Vec<DailyBar>> {
        symbols
            .iter()
            .map(|(symbol, scenario)| (symbol.to_string(), self.generate(*scenario, start, days)))
            .collect()
    }

    fn bar(&mut self, date: NaiveDate, close: f64) -> DailyBar {
        let noise_pct = 0.02;

        let high = close * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = close * (1.0 - self.rng.gen_range(0.0..noise_pct));
        let open = (close * (1.0 + self.rng.gen_range(-noise_pct..noise_pct))).clamp(low, high);

        DailyBar {
            date,
            open: Some(open),
            close: Some(close),
            high: Some(high),
            low: Some(low),
            volume: Some(self.base_volume * self.rng.gen_range(0.7..1.3)),
            market_cap: Some(close * self.supply),
            galaxy_score: Some(self.rng.gen_range(20.0..80.0)),
            alt_rank: Some(self.rng.gen_range(1.0..500.0_f64).round()),
            sentiment: Some(self.rng.gen_range(30.0..90.0)),
            social_dominance: Some(self.rng.gen_range(0.1..3.0)),
            market_dominance: Some(self.rng.gen_range(0.01..1.0)),
        }
    }
}

/// Logistic model that buys three-day momentum and sells its reversal.
///
/// Stands in for a trained artifact when replaying synthetic markets.
pub fn momentum_model() -> Result<ModelAdapter> {
    let mut coefficients = vec![0.0; FEATURE_COUNT];
    // delta_close_3d
    coefficients[1] = 40.0;
    // rsi14
    coefficients[4] = 0.02;

    let estimator = Estimator {
        feature_names: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        schema_version: Some(SCHEMA_VERSION),
        model: Model::Logistic {
            coefficients,
            intercept: -1.5,
            scaler: None,
        },
    };
    ModelAdapter::new(estimator, None)
}
