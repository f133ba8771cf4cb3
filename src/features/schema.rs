use crate::error::BotError;
use crate::Result;

/// Bumped whenever a column is added, removed, renamed or reordered.
pub const SCHEMA_VERSION: u32 = 1;

pub const FEATURE_COUNT: usize = 33;

/// Canonical feature order shared by training, backtesting and live inference.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "delta_close_1d",
    "delta_close_3d",
    "delta_vol_1d",
    "delta_vol_3d",
    "rsi14",
    "rsi30",
    "ma_close_7d",
    "ma_close_14d",
    "atr14",
    "macd_std",
    "stoch_rsi_k",
    "stoch_rsi_d",
    "mfi14",
    "boll_percent_b",
    "obv",
    "adx",
    "adx_pos",
    "adx_neg",
    "btc_daily_change",
    "btc_3d_change",
    "eth_daily_change",
    "eth_3d_change",
    "delta_mcap_1d",
    "delta_mcap_3d",
    "galaxy_score",
    "delta_galaxy_score_3d",
    "alt_rank",
    "delta_alt_rank_3d",
    "sentiment",
    "social_dominance",
    "market_dominance",
    "delta_social_dom_3d",
    "delta_market_dom_3d",
];

/// Fail unless `columns` is exactly the canonical list, in order.
pub fn ensure_canonical<S: AsRef<str>>(columns: &[S]) -> Result<()> {
    if columns.len() != FEATURE_COUNT {
        return Err(BotError::SchemaMismatch(format!(
            "expected {} feature columns (schema v{}), got {}",
            FEATURE_COUNT,
            SCHEMA_VERSION,
            columns.len()
        )));
    }

    for (i, (got, want)) in columns.iter().zip(FEATURE_COLUMNS.iter()).enumerate() {
        if got.as_ref() != *want {
            return Err(BotError::SchemaMismatch(format!(
                "column {} is '{}', expected '{}' (schema v{})",
                i,
                got.as_ref(),
                want,
                SCHEMA_VERSION
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_list_accepted() {
        assert!(ensure_canonical(&FEATURE_COLUMNS).is_ok());
    }

    #[test]
    fn test_columns_are_unique() {
        let mut sorted = FEATURE_COLUMNS.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_reordered_columns_rejected() {
        let mut columns: Vec<&str> = FEATURE_COLUMNS.to_vec();
        columns.swap(0, 1);

        let err = ensure_canonical(&columns).unwrap_err();
        assert!(matches!(err, BotError::SchemaMismatch(_)));
        assert!(err.to_string().contains("delta_close_3d"));
    }

    #[test]
    fn test_missing_column_rejected() {
        let columns = &FEATURE_COLUMNS[..32];
        assert!(ensure_canonical(columns).is_err());
    }
}
