use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;

use super::MarketDataProvider;
use crate::backfill::points_to_bars;
use crate::config::LunarCrushSection;
use crate::error::BotError;
use crate::models::DailyBar;
use crate::Result;

const MAX_ATTEMPTS: u32 = 3;

type LunarCrushRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// One daily point of the coin time-series endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeSeriesPoint {
    /// Unix seconds
    pub time: i64,
    pub open: Option<f64>,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub galaxy_score: Option<f64>,
    pub alt_rank: Option<f64>,
    pub sentiment: Option<f64>,
    pub social_dominance: Option<f64>,
    pub market_dominance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(default)]
    data: Vec<TimeSeriesPoint>,
}

/// LunarCrush daily time-series client with rate limiting and back-off
///
/// Cloneable; clones share the rate limiter.
#[derive(Clone)]
pub struct LunarCrushClient {
    client: Client,
    api_key: String,
    base_url: String,
    backoff: Duration,
    rate_limiter: Arc<LunarCrushRateLimiter>,
}

impl LunarCrushClient {
    pub fn new(settings: &LunarCrushSection, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BotError::ConfigInvalid(format!("failed to build HTTP client: {}", e)))?;

        let rpm = NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            backoff: Duration::from_secs(settings.backoff_secs),
            rate_limiter,
        })
    }

    /// Raw daily points for `symbol` between two unix timestamps
    pub async fn time_series(&self, symbol: &str, start: i64, end: i64) -> Result<Vec<TimeSeriesPoint>> {
        let url = format!("{}/public/coins/{}/time-series/v2", self.base_url, symbol);
        let query = [
            ("key", self.api_key.clone()),
            ("bucket", "day".to_string()),
            ("start", start.to_string()),
            ("end", end.to_string()),
        ];

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            self.rate_limiter.until_ready().await;

            match self.client.get(&url).query(&query).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: TimeSeriesResponse =
                            response.json().await.map_err(|e| BotError::ProviderPermanent {
                                symbol: symbol.to_string(),
                                reason: format!("unparseable response: {}", e),
                            })?;
                        tracing::debug!("Fetched {} daily points for {}", body.data.len(), symbol);
                        return Ok(body.data);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_error = format!("HTTP {}", status.as_u16());
                    } else {
                        // Other 4xx - don't retry
                        let text = response.text().await.unwrap_or_default();
                        return Err(BotError::ProviderPermanent {
                            symbol: symbol.to_string(),
                            reason: format!("HTTP {}: {}", status.as_u16(), text),
                        });
                    }
                }
                Err(e) => {
                    last_error = format!("network error: {}", e);
                }
            }

            if attempt < MAX_ATTEMPTS {
                let wait = self.backoff * attempt;
                tracing::warn!(
                    "LunarCrush {} for {}, retrying in {}s (attempt {}/{})",
                    last_error,
                    symbol,
                    wait.as_secs(),
                    attempt,
                    MAX_ATTEMPTS
                );
                tokio::time::sleep(wait).await;
            }
        }

        Err(BotError::ProviderTransient {
            symbol: symbol.to_string(),
            reason: format!("{} after {} attempts", last_error, MAX_ATTEMPTS),
        })
    }
}

#[async_trait]
impl MarketDataProvider for LunarCrushClient {
    async fn daily_bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>> {
        let start_ts = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let end_ts = end.and_time(NaiveTime::MIN).and_utc().timestamp() + 86_399;

        let points = self.time_series(symbol, start_ts, end_ts).await?;
        Ok(points_to_bars(&points))
    }
}
