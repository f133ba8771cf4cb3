use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};

use crate::api::lunarcrush::TimeSeriesPoint;
use crate::models::DailyBar;

/// UTC calendar day of a unix timestamp
pub fn utc_day(timestamp: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.date_naive())
}

/// Convert provider points to daily bars, one per UTC day, oldest first.
///
/// When the provider returns several points for the same day the latest one
/// wins. Points with an unrepresentable timestamp are dropped.
pub fn points_to_bars(points: &[TimeSeriesPoint]) -> Vec<DailyBar> {
    let mut by_day: BTreeMap<NaiveDate, (i64, DailyBar)> = BTreeMap::new();

    for point in points {
        let Some(date) = utc_day(point.time) else {
            tracing::warn!("Dropping point with invalid timestamp {}", point.time);
            continue;
        };

        let bar = DailyBar {
            date,
            open: point.open,
            close: point.close,
            high: point.high,
            low: point.low,
            volume: point.volume_24h,
            market_cap: point.market_cap,
            galaxy_score: point.galaxy_score,
            alt_rank: point.alt_rank,
            sentiment: point.sentiment,
            social_dominance: point.social_dominance,
            market_dominance: point.market_dominance,
        };

        match by_day.get(&date) {
            Some((existing, _)) if *existing > point.time => {}
            _ => {
                by_day.insert(date, (point.time, bar));
            }
        }
    }

    by_day.into_values().map(|(_, bar)| bar).collect()
}
