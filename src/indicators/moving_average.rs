/// Simple moving average series
///
/// A window containing a missing value yields a missing output.
pub fn sma_series(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    rolling(values, period, |window| {
        Some(window.iter().sum::<f64>() / period as f64)
    })
}

/// Population standard deviation over a rolling window
pub fn rolling_std(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    rolling(values, period, |window| {
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        Some(variance.sqrt())
    })
}

/// Apply `f` to each complete window of `period` present values.
pub(crate) fn rolling<F>(values: &[Option<f64>], period: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let mut window = Vec::with_capacity(period);
    for end in period - 1..values.len() {
        window.clear();
        window.extend(values[end + 1 - period..=end].iter().flatten().copied());
        if window.len() == period {
            out[end] = f(&window);
        }
    }
    out
}

/// Recursive smoother shared by EMA and Wilder averages.
///
/// Seeds with the simple average of the first `period` present values, then
/// applies `prev + alpha * (x - prev)`. A missing input yields a missing
/// output and leaves the state untouched.
fn recursive_smooth(values: &[Option<f64>], period: usize, alpha: f64) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }

    let mut seed = Vec::with_capacity(period);
    let mut state: Option<f64> = None;

    for (i, value) in values.iter().enumerate() {
        let Some(x) = *value else { continue };

        match state {
            Some(prev) => {
                let next = prev + alpha * (x - prev);
                state = Some(next);
                out[i] = Some(next);
            }
            None => {
                seed.push(x);
                if seed.len() == period {
                    let first = seed.iter().sum::<f64>() / period as f64;
                    state = Some(first);
                    out[i] = Some(first);
                }
            }
        }
    }
    out
}

/// Exponential moving average series with `alpha = 2 / (period + 1)`
pub fn ema_series(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    recursive_smooth(values, period, 2.0 / (period as f64 + 1.0))
}

/// Wilder's smoothing (`alpha = 1 / period`), used by RSI, ATR and ADX
pub fn wilder_series(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    recursive_smooth(values, period, 1.0 / period as f64)
}

/// MACD histogram: `(EMA_fast - EMA_slow) - EMA_signal(macd)`
pub fn macd_diff_series(
    closes: &[Option<f64>],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Vec<Option<f64>> {
    let ema_fast = ema_series(closes, fast);
    let ema_slow = ema_series(closes, slow);

    let macd: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();

    let signal_line = ema_series(&macd, signal);

    macd.iter()
        .zip(&signal_line)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect()
}
