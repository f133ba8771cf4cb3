/// Average True Range (ATR) indicator
///
/// Measures market volatility by calculating the average of true ranges over a period.
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// Uses Wilder's smoothing (same as RSI and ADX) for the moving average.
use super::moving_average::wilder_series;
use super::Ohlc;

/// True range per bar, aligned with the input; the first bar has none.
pub fn true_range_series(bars: &[Ohlc]) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    for i in 1..bars.len() {
        let (Some(high), Some(low), Some(prev_close)) = (bars[i].high, bars[i].low, bars[i - 1].close)
        else {
            continue;
        };

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        out[i] = Some(tr);
    }
    out
}

/// ATR series aligned with the input bars
pub fn atr_series(bars: &[Ohlc], period: usize) -> Vec<Option<f64>> {
    wilder_series(&true_range_series(bars), period)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Ohlc {
        Ohlc {
            open: Some(close),
            high: Some(high),
            low: Some(low),
            close: Some(close),
        }
    }

    #[test]
    fn test_atr_constant_range() {
        let bars: Vec<Ohlc> = (0..20).map(|_| bar(102.0, 98.0, 100.0)).collect();
        let atr = atr_series(&bars, 14);

        assert!(atr[13].is_none());
        assert_eq!(atr[14], Some(4.0));
        assert_eq!(atr[19], Some(4.0));
    }

    #[test]
    fn test_true_range_uses_gap_from_previous_close() {
        let bars = vec![bar(101.0, 99.0, 100.0), bar(112.0, 108.0, 110.0)];
        let tr = true_range_series(&bars);
        assert_eq!(tr[0], None);
        assert_eq!(tr[1], Some(12.0)); // |112 - 100|
    }

    #[test]
    fn test_missing_high_breaks_true_range() {
        let mut bars: Vec<Ohlc> = (0..3).map(|_| bar(102.0, 98.0, 100.0)).collect();
        bars[2].high = None;
        let tr = true_range_series(&bars);
        assert_eq!(tr[2], None);
    }
}
