use super::moving_average::{rolling, sma_series, wilder_series};

/// Relative Strength Index series (Wilder)
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// The first value appears once `period` price changes are available.
pub fn rsi_series(closes: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut gains = vec![None; closes.len()];
    let mut losses = vec![None; closes.len()];

    for i in 1..closes.len() {
        if let (Some(prev), Some(cur)) = (closes[i - 1], closes[i]) {
            let change = cur - prev;
            gains[i] = Some(change.max(0.0));
            losses[i] = Some((-change).max(0.0));
        }
    }

    let avg_gain = wilder_series(&gains, period);
    let avg_loss = wilder_series(&losses, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(g, l)| {
            let (g, l) = ((*g)?, (*l)?);
            if l == 0.0 {
                // All gains = RSI 100; flat series = neutral
                return Some(if g == 0.0 { 50.0 } else { 100.0 });
            }
            let rs = g / l;
            Some(100.0 - 100.0 / (1.0 + rs))
        })
        .collect()
}

/// Stochastic RSI %K and %D on a 0..1 scale
///
/// `stoch = (rsi - min(rsi, window)) / (max - min)`, 0.5 when the range is flat;
/// %K is its `smooth_k` SMA and %D the `smooth_d` SMA of %K.
pub fn stoch_rsi_series(
    closes: &[Option<f64>],
    period: usize,
    smooth_k: usize,
    smooth_d: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let rsi = rsi_series(closes, period);

    let stoch = rolling(&rsi, period, |window| {
        let current = *window.last()?;
        let lo = window.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if hi - lo == 0.0 {
            Some(0.5)
        } else {
            Some((current - lo) / (hi - lo))
        }
    });

    let k = sma_series(&stoch, smooth_k);
    let d = sma_series(&k, smooth_d);
    (k, d)
}
