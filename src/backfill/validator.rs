use chrono::NaiveDate;

use crate::models::DailyBar;

/// Sanity checks on provider bars before they reach the indicator engine.
///
/// Zero prices are not rejected here; the indicator engine treats them as
/// missing.
#[derive(Debug, Clone, Copy)]
pub struct BarValidator {
    today: NaiveDate,
}

impl BarValidator {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn validate(&self, bar: &DailyBar) -> Result<(), String> {
        self.validate_date(bar)?;
        self.validate_values(bar)?;
        self.validate_ohlc_relationship(bar)?;
        Ok(())
    }

    fn validate_date(&self, bar: &DailyBar) -> Result<(), String> {
        if bar.date > self.today {
            return Err(format!("Bar date {} is in the future (today {})", bar.date, self.today));
        }
        Ok(())
    }

    fn validate_values(&self, bar: &DailyBar) -> Result<(), String> {
        let fields = [
            ("open", bar.open),
            ("close", bar.close),
            ("high", bar.high),
            ("low", bar.low),
            ("volume", bar.volume),
            ("market_cap", bar.market_cap),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                if v.is_nan() || v < 0.0 {
                    return Err(format!("Invalid {}: {}", name, v));
                }
            }
        }
        Ok(())
    }

    /// High must bound open, close and low when all are present and non-zero
    fn validate_ohlc_relationship(&self, bar: &DailyBar) -> Result<(), String> {
        let positive = |v: Option<f64>| v.filter(|x| *x > 0.0);
        let (Some(high), Some(low)) = (positive(bar.high), positive(bar.low)) else {
            return Ok(());
        };

        if high < low {
            return Err(format!("High ({}) is less than low ({})", high, low));
        }
        for (name, value) in [("open", positive(bar.open)), ("close", positive(bar.close))] {
            if let Some(v) = value {
                if v > high * (1.0 + 1e-6) || v < low * (1.0 - 1e-6) {
                    return Err(format!("{} ({}) outside low/high [{}, {}]", name, v, low, high));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    fn bar(open: f64, high: f64, low: f64, close: f64) -> DailyBar {
        DailyBar {
            date: NaiveDate::from_ymd_opt(2024, 6, 9).unwrap(),
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close: Some(close),
            volume: Some(1000.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_bar() {
        let validator = BarValidator::new(today());
        assert!(validator.validate(&bar(100.0, 110.0, 95.0, 105.0)).is_ok());
    }

    #[test]
    fn test_future_bar_rejected() {
        let validator = BarValidator::new(today());
        let mut b = bar(100.0, 110.0, 95.0, 105.0);
        b.date = NaiveDate::from_ymd_opt(2024, 6, 11).unwrap();
        assert!(validator.validate(&b).unwrap_err().contains("future"));
    }

    #[test]
    fn test_high_below_low_rejected() {
        let validator = BarValidator::new(today());
        assert!(validator.validate(&bar(100.0, 90.0, 95.0, 92.0)).is_err());
    }

    #[test]
    fn test_close_outside_range_rejected() {
        let validator = BarValidator::new(today());
        assert!(validator.validate(&bar(100.0, 110.0, 95.0, 120.0)).is_err());
    }

    #[test]
    fn test_zero_and_missing_prices_pass() {
        let validator = BarValidator::new(today());
        let mut b = bar(0.0, 110.0, 95.0, 100.0);
        b.low = None;
        assert!(validator.validate(&b).is_ok());
    }

    #[test]
    fn test_negative_volume_rejected() {
        let validator = BarValidator::new(today());
        let mut b = bar(100.0, 110.0, 95.0, 105.0);
        b.volume = Some(-1.0);
        assert!(validator.validate(&b).is_err());
    }
}
