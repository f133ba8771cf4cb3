use super::moving_average::{rolling_std, sma_series};

/// Bollinger %B: position of the close inside the `k`-sigma band.
///
/// 0 at the lower band, 1 at the upper band; a zero-width band reports 0.5.
pub fn bollinger_percent_b(closes: &[Option<f64>], period: usize, k: f64) -> Vec<Option<f64>> {
    let mid = sma_series(closes, period);
    let std = rolling_std(closes, period);

    closes
        .iter()
        .zip(mid.iter().zip(&std))
        .map(|(close, (mid, std))| {
            let (close, mid, std) = ((*close)?, (*mid)?, (*std)?);
            let upper = mid + k * std;
            let lower = mid - k * std;
            if upper - lower == 0.0 {
                Some(0.5)
            } else {
                Some((close - lower) / (upper - lower))
            }
        })
        .collect()
}
