use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::schema::FEATURE_COUNT;
use crate::indicators::{enrich, EnrichedBar};
use crate::models::DailyBar;

/// Forward horizon (rows) and minimum gain for a positive training label
pub const LABEL_HORIZON_DAYS: usize = 2;
pub const LABEL_MIN_GAIN: f64 = 1.05;

/// One model input keyed by (date, symbol).
///
/// `features` follows [`super::FEATURE_COLUMNS`] and is always finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub symbol: String,
    pub close: f64,
    pub features: Vec<f64>,
    /// 1 when the close two rows ahead is at least 5% higher; `None` at the tail
    pub label: Option<u8>,
}

/// Builds the canonical feature matrix from per-symbol daily frames.
///
/// BTC and ETH reference closes are joined on date (left join against each
/// target frame).
#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder {
    btc_close: BTreeMap<NaiveDate, f64>,
    eth_close: BTreeMap<NaiveDate, f64>,
}

impl FeatureBuilder {
    pub fn new(btc: &[DailyBar], eth: &[DailyBar]) -> Self {
        Self {
            btc_close: reference_closes(btc),
            eth_close: reference_closes(eth),
        }
    }

    /// Feature rows for every symbol, sorted by (symbol, date).
    pub fn build(&self, frames: &BTreeMap<String, Vec<DailyBar>>) -> Vec<FeatureRow> {
        let mut rows: Vec<FeatureRow> = frames
            .iter()
            .flat_map(|(symbol, bars)| self.build_symbol(symbol, bars))
            .collect();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.date.cmp(&b.date)));
        rows
    }

    /// Feature rows for one symbol, in date order. Rows with any missing
    /// feature are dropped.
    pub fn build_symbol(&self, symbol: &str, bars: &[DailyBar]) -> Vec<FeatureRow> {
        let bars = normalize_frame(bars);
        let enriched = enrich(&bars);

        let closes: Vec<Option<f64>> = enriched.iter().map(|e| e.bar.close).collect();
        let volumes: Vec<Option<f64>> = enriched.iter().map(|e| e.bar.volume).collect();
        let mcaps: Vec<Option<f64>> = enriched.iter().map(|e| Some(zero_fill(e.bar.market_cap))).collect();
        let galaxy: Vec<Option<f64>> = social(&enriched, |b| b.galaxy_score);
        let alt_rank: Vec<Option<f64>> = social(&enriched, |b| b.alt_rank);
        let sentiment: Vec<Option<f64>> = social(&enriched, |b| b.sentiment);
        let social_dom: Vec<Option<f64>> = social(&enriched, |b| b.social_dominance);
        let market_dom: Vec<Option<f64>> = social(&enriched, |b| b.market_dominance);

        let btc: Vec<Option<f64>> = enriched
            .iter()
            .map(|e| self.btc_close.get(&e.bar.date).copied())
            .collect();
        let eth: Vec<Option<f64>> = enriched
            .iter()
            .map(|e| self.eth_close.get(&e.bar.date).copied())
            .collect();

        let columns: [Vec<Option<f64>>; FEATURE_COUNT] = [
            pct_change(&closes, 1),
            pct_change(&closes, 3),
            pct_change(&volumes, 1),
            pct_change(&volumes, 3),
            indicator(&enriched, |i| i.rsi14),
            indicator(&enriched, |i| i.rsi30),
            indicator(&enriched, |i| i.ma_close_7d),
            indicator(&enriched, |i| i.ma_close_14d),
            indicator(&enriched, |i| i.atr14),
            indicator(&enriched, |i| i.macd_std),
            indicator(&enriched, |i| i.stoch_rsi_k),
            indicator(&enriched, |i| i.stoch_rsi_d),
            indicator(&enriched, |i| i.mfi14),
            indicator(&enriched, |i| i.boll_percent_b),
            indicator(&enriched, |i| i.obv),
            indicator(&enriched, |i| i.adx),
            indicator(&enriched, |i| i.adx_pos),
            indicator(&enriched, |i| i.adx_neg),
            pct_change(&btc, 1),
            pct_change(&btc, 3),
            pct_change(&eth, 1),
            pct_change(&eth, 3),
            pct_change(&mcaps, 1),
            pct_change(&mcaps, 3),
            galaxy.clone(),
            diff(&galaxy, 3),
            alt_rank.clone(),
            diff(&alt_rank, 3),
            sentiment,
            social_dom.clone(),
            market_dom.clone(),
            diff(&social_dom, 3),
            diff(&market_dom, 3),
        ];

        let mut rows = Vec::with_capacity(enriched.len());
        for (i, e) in enriched.iter().enumerate() {
            let Some(close) = e.bar.close else { continue };

            let features: Option<Vec<f64>> = columns
                .iter()
                .map(|column| column[i].filter(|v| v.is_finite()))
                .collect();
            let Some(features) = features else { continue };

            let label = closes
                .get(i + LABEL_HORIZON_DAYS)
                .copied()
                .flatten()
                .map(|future| u8::from(future >= LABEL_MIN_GAIN * close));

            rows.push(FeatureRow {
                date: e.bar.date,
                symbol: symbol.to_string(),
                close,
                features,
                label,
            });
        }
        rows
    }
}

/// Sort by date, keep the last bar per date, and turn ±inf into missing.
pub fn normalize_frame(bars: &[DailyBar]) -> Vec<DailyBar> {
    let mut by_date: BTreeMap<NaiveDate, DailyBar> = BTreeMap::new();
    for bar in bars {
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
        by_date.insert(
            bar.date,
            DailyBar {
                date: bar.date,
                open: finite(bar.open),
                close: finite(bar.close),
                high: finite(bar.high),
                low: finite(bar.low),
                volume: finite(bar.volume),
                market_cap: finite(bar.market_cap),
                galaxy_score: finite(bar.galaxy_score),
                alt_rank: finite(bar.alt_rank),
                sentiment: finite(bar.sentiment),
                social_dominance: finite(bar.social_dominance),
                market_dominance: finite(bar.market_dominance),
            },
        );
    }
    by_date.into_values().collect()
}

fn reference_closes(bars: &[DailyBar]) -> BTreeMap<NaiveDate, f64> {
    normalize_frame(bars)
        .into_iter()
        .filter_map(|b| Some((b.date, crate::indicators::clean_price(b.close)?)))
        .collect()
}

fn zero_fill(value: Option<f64>) -> f64 {
    value.unwrap_or(0.0)
}

fn social<F>(enriched: &[EnrichedBar], field: F) -> Vec<Option<f64>>
where
    F: Fn(&DailyBar) -> Option<f64>,
{
    enriched.iter().map(|e| Some(zero_fill(field(&e.bar)))).collect()
}

fn indicator<F>(enriched: &[EnrichedBar], field: F) -> Vec<Option<f64>>
where
    F: Fn(&crate::indicators::Indicators) -> Option<f64>,
{
    enriched.iter().map(|e| field(&e.indicators)).collect()
}

/// Row-shifted percentage change.
///
/// A zero base gives 0 when the value is also zero (no signal) and missing
/// otherwise.
pub fn pct_change(values: &[Option<f64>], periods: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let prev = values[i.checked_sub(periods)?]?;
            let cur = values[i]?;
            if prev == 0.0 {
                return if cur == 0.0 { Some(0.0) } else { None };
            }
            Some((cur - prev) / prev)
        })
        .collect()
}

/// Row-shifted plain difference
pub fn diff(values: &[Option<f64>], periods: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| Some(values[i]? - values[i.checked_sub(periods)?]?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_COLUMNS;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn frame(count: usize, base: f64, drift: f64) -> Vec<DailyBar> {
        (0..count)
            .map(|i| {
                let close = base + (i as f64 * 0.4).sin() * base * 0.05 + i as f64 * drift;
                DailyBar {
                    date: day(i as i64),
                    open: Some(close * 0.99),
                    close: Some(close),
                    high: Some(close * 1.02),
                    low: Some(close * 0.98),
                    volume: Some(1_000.0 + i as f64),
                    market_cap: Some(close * 1_000.0),
                    galaxy_score: Some(50.0 + (i % 5) as f64),
                    alt_rank: Some(100.0 - (i % 7) as f64),
                    sentiment: Some(60.0),
                    social_dominance: Some(1.5),
                    market_dominance: None,
                }
            })
            .collect()
    }

    fn builder() -> FeatureBuilder {
        FeatureBuilder::new(&frame(80, 40_000.0, 50.0), &frame(80, 2_000.0, 3.0))
    }

    #[test]
    fn test_pct_change_and_diff() {
        let values = vec![Some(100.0), Some(110.0), None, Some(121.0)];
        assert_eq!(pct_change(&values, 1)[1], Some(0.1));
        assert_eq!(pct_change(&values, 1)[3], None);
        assert_eq!(diff(&values, 3)[3], Some(21.0));

        let zeros = vec![Some(0.0), Some(0.0), Some(5.0)];
        assert_eq!(pct_change(&zeros, 1), vec![None, Some(0.0), None]);
    }

    #[test]
    fn test_rows_are_finite_and_complete() {
        let rows = builder().build_symbol("SOL", &frame(80, 100.0, 0.5));

        assert!(!rows.is_empty());
        for row in &rows {
            assert_eq!(row.features.len(), FEATURE_COLUMNS.len());
            assert!(row.features.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_missing_market_dominance_is_zero_filled() {
        let rows = builder().build_symbol("SOL", &frame(80, 100.0, 0.5));
        let idx = FEATURE_COLUMNS.iter().position(|c| *c == "market_dominance").unwrap();
        assert!(rows.iter().all(|r| r.features[idx] == 0.0));
    }

    #[test]
    fn test_reference_gap_drops_row() {
        let mut btc = frame(80, 40_000.0, 50.0);
        btc.retain(|b| b.date != day(60));
        let builder = FeatureBuilder::new(&btc, &frame(80, 2_000.0, 3.0));

        let rows = builder.build_symbol("SOL", &frame(80, 100.0, 0.5));
        let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();

        // day 60 has no BTC close; days 61..=63 reference it through the 1d/3d shift
        assert!(!dates.contains(&day(60)));
        assert!(!dates.contains(&day(61)));
        assert!(!dates.contains(&day(63)));
        assert!(dates.contains(&day(64)));
    }

    #[test]
    fn test_label_two_rows_ahead() {
        let mut bars = frame(80, 100.0, 0.0);
        let base = bars[70].close.unwrap();
        bars[72].close = Some(base * 1.06);
        bars[72].high = Some(base * 1.08);

        let rows = builder().build_symbol("SOL", &bars);
        let row_70 = rows.iter().find(|r| r.date == day(70)).unwrap();
        assert_eq!(row_70.label, Some(1));

        let tail = rows.iter().find(|r| r.date == day(79)).unwrap();
        assert_eq!(tail.label, None);
    }

    #[test]
    fn test_duplicate_dates_keep_last() {
        let mut bars = frame(80, 100.0, 0.5);
        let mut dup = bars[75].clone();
        dup.close = Some(999.0);
        bars.reverse();
        bars.push(dup);

        let rows = builder().build_symbol("SOL", &bars);
        let row = rows.iter().find(|r| r.date == day(75)).unwrap();
        assert_eq!(row.close, 999.0);
    }

    #[test]
    fn test_build_sorts_by_symbol_then_date_and_is_deterministic() {
        let mut frames = BTreeMap::new();
        frames.insert("XRP".to_string(), frame(70, 0.5, 0.001));
        frames.insert("ADA".to_string(), frame(70, 0.4, 0.001));

        let first = builder().build(&frames);
        let second = builder().build(&frames);
        assert_eq!(first, second);

        let keys: Vec<(String, NaiveDate)> =
            first.iter().map(|r| (r.symbol.clone(), r.date)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(first[0].symbol, "ADA");
    }
}
