// Technical indicators module
// Series are aligned with the input bars; `None` marks warm-up or missing data.

pub mod adx;
pub mod atr;
pub mod bands;
pub mod moving_average;
pub mod rsi;
pub mod volume;

pub use adx::{adx_series, AdxSeries};
pub use atr::{atr_series, true_range_series};
pub use bands::bollinger_percent_b;
pub use moving_average::{ema_series, macd_diff_series, sma_series, wilder_series};
pub use rsi::{rsi_series, stoch_rsi_series};
pub use volume::{mfi_series, obv_series};

use serde::{Deserialize, Serialize};

use crate::models::DailyBar;

/// Price fields of one bar after zero/non-finite values became missing
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ohlc {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
}

/// Indicator columns appended to each daily bar
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    pub rsi14: Option<f64>,
    pub rsi30: Option<f64>,
    pub macd_std: Option<f64>,
    pub atr14: Option<f64>,
    pub ma_close_7d: Option<f64>,
    pub ma_close_14d: Option<f64>,
    pub boll_percent_b: Option<f64>,
    pub stoch_rsi_k: Option<f64>,
    pub stoch_rsi_d: Option<f64>,
    pub mfi14: Option<f64>,
    pub obv: Option<f64>,
    pub adx: Option<f64>,
    pub adx_pos: Option<f64>,
    pub adx_neg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedBar {
    pub bar: DailyBar,
    pub indicators: Indicators,
}

/// Price field cleanup: zero, negative or non-finite becomes missing.
pub fn clean_price(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Enrich a chronologically sorted daily frame with every indicator column.
///
/// Price fields are cleaned first, so the returned bars carry missing values
/// where the input had zeros. Feeding the returned bars back in yields the
/// same output.
pub fn enrich(bars: &[DailyBar]) -> Vec<EnrichedBar> {
    let cleaned: Vec<DailyBar> = bars
        .iter()
        .map(|b| DailyBar {
            open: clean_price(b.open),
            high: clean_price(b.high),
            low: clean_price(b.low),
            close: clean_price(b.close),
            ..b.clone()
        })
        .collect();

    let ohlc: Vec<Ohlc> = cleaned
        .iter()
        .map(|b| Ohlc {
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
        })
        .collect();
    let closes: Vec<Option<f64>> = cleaned.iter().map(|b| b.close).collect();
    let volumes: Vec<Option<f64>> = cleaned
        .iter()
        .map(|b| b.volume.filter(|v| v.is_finite() && *v >= 0.0))
        .collect();

    let rsi14 = rsi_series(&closes, 14);
    let rsi30 = rsi_series(&closes, 30);
    let macd = macd_diff_series(&closes, 12, 26, 9);
    let atr = atr_series(&ohlc, 14);
    let ma7 = sma_series(&closes, 7);
    let ma14 = sma_series(&closes, 14);
    let percent_b = bollinger_percent_b(&closes, 20, 2.0);
    let (stoch_k, stoch_d) = stoch_rsi_series(&closes, 14, 3, 3);
    let mfi = mfi_series(&ohlc, &volumes, 14);
    let obv = obv_series(&closes, &volumes);
    let adx = adx_series(&ohlc, 14);

    cleaned
        .into_iter()
        .enumerate()
        .map(|(i, bar)| EnrichedBar {
            bar,
            indicators: Indicators {
                rsi14: rsi14[i],
                rsi30: rsi30[i],
                macd_std: macd[i],
                atr14: atr[i],
                ma_close_7d: ma7[i],
                ma_close_14d: ma14[i],
                boll_percent_b: percent_b[i],
                stoch_rsi_k: stoch_k[i],
                stoch_rsi_d: stoch_d[i],
                mfi14: mfi[i],
                obv: obv[i],
                adx: adx.adx[i],
                adx_pos: adx.plus_di[i],
                adx_neg: adx.minus_di[i],
            },
        })
        .collect()
}
