/// Average Directional Index (ADX) - Measures trend strength
///
/// ADX ranges from 0 to 100:
/// - ADX > 25: Strong trend (bull or bear)
/// - ADX 20-25: Moderate trend
/// - ADX < 20: Weak trend / choppy / ranging market
///
/// Also returns +DI and -DI to determine trend direction:
/// - +DI > -DI: Uptrend
/// - -DI > +DI: Downtrend
use super::atr::true_range_series;
use super::moving_average::wilder_series;
use super::Ohlc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdxSeries {
    pub adx: Vec<Option<f64>>,
    pub plus_di: Vec<Option<f64>>,
    pub minus_di: Vec<Option<f64>>,
}

/// ADX, +DI and -DI series aligned with the input bars
///
/// The ADX line is the Wilder-smoothed DX, so it needs roughly `2 * period`
/// bars before the first value appears.
pub fn adx_series(bars: &[Ohlc], period: usize) -> AdxSeries {
    let n = bars.len();
    let true_ranges = true_range_series(bars);
    let mut plus_dms = vec![None; n];
    let mut minus_dms = vec![None; n];

    for i in 1..n {
        let (Some(high), Some(low), Some(prev_high), Some(prev_low)) =
            (bars[i].high, bars[i].low, bars[i - 1].high, bars[i - 1].low)
        else {
            continue;
        };

        let up_move = high - prev_high;
        let down_move = prev_low - low;

        plus_dms[i] = Some(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dms[i] = Some(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    let smoothed_tr = wilder_series(&true_ranges, period);
    let smoothed_plus = wilder_series(&plus_dms, period);
    let smoothed_minus = wilder_series(&minus_dms, period);

    let mut plus_di = vec![None; n];
    let mut minus_di = vec![None; n];
    let mut dx = vec![None; n];

    for i in 0..n {
        let (Some(tr), Some(pdm), Some(mdm)) = (smoothed_tr[i], smoothed_plus[i], smoothed_minus[i])
        else {
            continue;
        };

        let (pdi, mdi) = if tr > 0.0 {
            (pdm / tr * 100.0, mdm / tr * 100.0)
        } else {
            (0.0, 0.0)
        };

        let di_sum = pdi + mdi;
        plus_di[i] = Some(pdi);
        minus_di[i] = Some(mdi);
        dx[i] = Some(if di_sum > 0.0 {
            (pdi - mdi).abs() / di_sum * 100.0
        } else {
            0.0
        });
    }

    AdxSeries {
        adx: wilder_series(&dx, period),
        plus_di,
        minus_di,
    }
}
