use super::Ohlc;

/// Money Flow Index over `period` bars
///
/// Typical price `(h + l + c) / 3` times volume is counted as positive or
/// negative flow depending on the direction of the typical price.
pub fn mfi_series(bars: &[Ohlc], volumes: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    let typical: Vec<Option<f64>> = bars
        .iter()
        .map(|b| Some((b.high? + b.low? + b.close?) / 3.0))
        .collect();

    // (positive, negative) flow per bar; the first bar has no direction
    let mut flows: Vec<Option<(f64, f64)>> = vec![None; n];
    for i in 1..n {
        let (Some(tp), Some(prev_tp), Some(volume)) = (typical[i], typical[i - 1], volumes[i]) else {
            continue;
        };
        let raw = tp * volume;
        flows[i] = Some(if tp > prev_tp {
            (raw, 0.0)
        } else if tp < prev_tp {
            (0.0, raw)
        } else {
            (0.0, 0.0)
        });
    }

    let mut out = vec![None; n];
    if period == 0 {
        return out;
    }
    for end in period..n {
        let window = &flows[end + 1 - period..=end];
        if window.iter().any(Option::is_none) {
            continue;
        }
        let (pos, neg) = window
            .iter()
            .flatten()
            .fold((0.0, 0.0), |(p, q), (a, b)| (p + a, q + b));

        out[end] = Some(if neg == 0.0 {
            if pos == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + pos / neg)
        });
    }
    out
}

/// On-Balance Volume, starting at zero on the first bar
///
/// A bar with a missing close or volume gets no value and does not move the
/// running total; the next bar compares against the last present close.
pub fn obv_series(closes: &[Option<f64>], volumes: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    let mut total = 0.0;
    let mut last_close: Option<f64> = None;

    for (i, (close, volume)) in closes.iter().zip(volumes).enumerate() {
        let (Some(close), Some(volume)) = (*close, *volume) else {
            continue;
        };

        if let Some(prev) = last_close {
            if close > prev {
                total += volume;
            } else if close < prev {
                total -= volume;
            }
        }
        last_close = Some(close);
        out[i] = Some(total);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64) -> Ohlc {
        Ohlc {
            open: Some(close),
            high: Some(close + 1.0),
            low: Some(close - 1.0),
            close: Some(close),
        }
    }

    #[test]
    fn test_obv_accumulates_by_direction() {
        let closes = vec![Some(10.0), Some(11.0), Some(11.0), Some(9.0)];
        let volumes = vec![Some(100.0), Some(50.0), Some(70.0), Some(30.0)];
        let obv = obv_series(&closes, &volumes);
        assert_eq!(obv, vec![Some(0.0), Some(50.0), Some(50.0), Some(20.0)]);
    }

    #[test]
    fn test_obv_skips_missing_close() {
        let closes = vec![Some(10.0), None, Some(12.0)];
        let volumes = vec![Some(1.0), Some(1.0), Some(5.0)];
        let obv = obv_series(&closes, &volumes);
        assert_eq!(obv, vec![Some(0.0), None, Some(5.0)]);
    }

    #[test]
    fn test_mfi_all_rising_is_100() {
        let bars: Vec<Ohlc> = (0..20).map(|i| bar(100.0 + i as f64)).collect();
        let volumes = vec![Some(1_000.0); 20];
        let mfi = mfi_series(&bars, &volumes, 14);

        assert!(mfi[13].is_none());
        assert_eq!(mfi[14], Some(100.0));
    }

    #[test]
    fn test_mfi_mixed_is_between_bounds() {
        let bars: Vec<Ohlc> = (0..30)
            .map(|i| bar(100.0 + if i % 2 == 0 { 2.0 } else { -1.0 } * i as f64 * 0.1))
            .collect();
        let volumes = vec![Some(500.0); 30];
        let mfi = mfi_series(&bars, &volumes, 14);

        let last = mfi[29].unwrap();
        assert!(last > 0.0 && last < 100.0);
    }
}
