use crate::error::FetchError;
use crate::models::{Candle, Timeframe};

/// Sanity checks for candles returned by an exchange
pub struct CandleValidator;

impl CandleValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a fetched batch; the first bad candle fails the whole batch
    ///
    /// `now_ms` bounds timestamps: nothing may start after the current bucket.
    pub fn validate_batch(
        &self,
        candles: &[Candle],
        timeframe: Timeframe,
        now_ms: i64,
    ) -> Result<(), FetchError> {
        let current_bucket = timeframe.bucket_start(now_ms);
        for candle in candles {
            self.validate(candle, current_bucket).map_err(|reason| {
                FetchError::MalformedResponse(format!("candle {}: {}", candle.timestamp, reason))
            })?;
        }
        Ok(())
    }

    /// Validate a candle for correctness
    pub fn validate(&self, candle: &Candle, latest_bucket: i64) -> Result<(), String> {
        self.validate_finite(candle)?;
        self.validate_prices(candle)?;
        self.validate_timestamp(candle, latest_bucket)?;
        self.validate_ohlc_relationship(candle)?;
        Ok(())
    }

    fn validate_finite(&self, candle: &Candle) -> Result<(), String> {
        let fields = [
            ("open", candle.open),
            ("high", candle.high),
            ("low", candle.low),
            ("close", candle.close),
            ("volume", candle.volume),
        ];
        match fields.iter().find(|(_, value)| !value.is_finite()) {
            Some((name, value)) => Err(format!("Non-finite {}: {}", name, value)),
            None => Ok(()),
        }
    }

    /// Validate that all prices are positive
    fn validate_prices(&self, candle: &Candle) -> Result<(), String> {
        if candle.open <= 0.0 {
            return Err(format!("Invalid open price: {}", candle.open));
        }
        if candle.high <= 0.0 {
            return Err(format!("Invalid high price: {}", candle.high));
        }
        if candle.low <= 0.0 {
            return Err(format!("Invalid low price: {}", candle.low));
        }
        if candle.close <= 0.0 {
            return Err(format!("Invalid close price: {}", candle.close));
        }
        // Zero volume is a quiet bucket, not an error
        if candle.volume < 0.0 {
            return Err(format!("Invalid volume: {}", candle.volume));
        }
        Ok(())
    }

    /// Validate that the candle does not start after the current bucket
    fn validate_timestamp(&self, candle: &Candle, latest_bucket: i64) -> Result<(), String> {
        if candle.timestamp < 0 {
            return Err(format!("Negative timestamp: {}", candle.timestamp));
        }
        if candle.timestamp > latest_bucket {
            return Err(format!(
                "Candle timestamp is in the future: {} (current bucket: {})",
                candle.timestamp, latest_bucket
            ));
        }
        Ok(())
    }

    /// Validate OHLC relationships (high >= low, etc.)
    fn validate_ohlc_relationship(&self, candle: &Candle) -> Result<(), String> {
        if candle.high < candle.low {
            return Err(format!("High ({}) is less than low ({})", candle.high, candle.low));
        }

        if candle.high < candle.open {
            return Err(format!("High ({}) is less than open ({})", candle.high, candle.open));
        }
        if candle.high < candle.close {
            return Err(format!("High ({}) is less than close ({})", candle.high, candle.close));
        }

        if candle.low > candle.open {
            return Err(format!("Low ({}) is greater than open ({})", candle.low, candle.open));
        }
        if candle.low > candle.close {
            return Err(format!("Low ({}) is greater than close ({})", candle.low, candle.close));
        }

        Ok(())
    }
}

impl Default for CandleValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn make_valid_candle() -> Candle {
        Candle::new(NOW - 3_600_000, 100.0, 102.0, 99.0, 101.0, 1_000_000.0)
    }

    fn validate(candle: &Candle) -> Result<(), String> {
        CandleValidator::new().validate(candle, NOW)
    }

    #[test]
    fn test_validate_valid_candle() {
        assert!(validate(&make_valid_candle()).is_ok());
    }

    #[test]
    fn test_validate_negative_prices() {
        for (field, expected) in [
            ("open", "Invalid open price"),
            ("high", "Invalid high price"),
            ("low", "Invalid low price"),
            ("close", "Invalid close price"),
        ] {
            let mut candle = make_valid_candle();
            match field {
                "open" => candle.open = -100.0,
                "high" => candle.high = -102.0,
                "low" => candle.low = -99.0,
                _ => candle.close = -101.0,
            }
            let err = validate(&candle).unwrap_err();
            assert!(err.contains(expected), "{} -> {}", field, err);
        }
    }

    #[test]
    fn test_validate_zero_volume_allowed() {
        let mut candle = make_valid_candle();
        candle.volume = 0.0;
        assert!(validate(&candle).is_ok());
    }

    #[test]
    fn test_validate_negative_volume() {
        let mut candle = make_valid_candle();
        candle.volume = -1000.0;
        assert!(validate(&candle).unwrap_err().contains("Invalid volume"));
    }

    #[test]
    fn test_validate_non_finite() {
        let mut candle = make_valid_candle();
        candle.close = f64::NAN;
        assert!(validate(&candle).unwrap_err().contains("Non-finite close"));
    }

    #[test]
    fn test_validate_high_less_than_low() {
        let mut candle = make_valid_candle();
        candle.high = 98.0;
        let err = validate(&candle).unwrap_err();
        assert!(err.contains("High") && err.contains("less than low"));
    }

    #[test]
    fn test_validate_high_less_than_close() {
        let mut candle = make_valid_candle();
        candle.close = 105.0;
        candle.high = 104.0;
        let err = validate(&candle).unwrap_err();
        assert!(err.contains("High") && err.contains("less than close"));
    }

    #[test]
    fn test_validate_low_greater_than_open() {
        let mut candle = make_valid_candle();
        candle.open = 95.0;
        candle.low = 96.0;
        let err = validate(&candle).unwrap_err();
        assert!(err.contains("Low") && err.contains("greater than open"));
    }

    #[test]
    fn test_validate_all_prices_equal() {
        // No trading activity: flat candle is valid
        let mut candle = make_valid_candle();
        candle.open = 100.0;
        candle.high = 100.0;
        candle.low = 100.0;
        candle.close = 100.0;
        assert!(validate(&candle).is_ok());
    }

    #[test]
    fn test_batch_rejects_candle_past_current_bucket() {
        let tf: Timeframe = "1m".parse().unwrap();
        let current = tf.bucket_start(NOW);
        let ok = Candle::new(current, 1.0, 1.0, 1.0, 1.0, 0.0);
        let future = Candle::new(current + 60_000, 1.0, 1.0, 1.0, 1.0, 0.0);

        let validator = CandleValidator::new();
        assert!(validator.validate_batch(&[ok.clone()], tf, NOW).is_ok());

        let err = validator.validate_batch(&[ok, future], tf, NOW).unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(msg) if msg.contains("future")));
    }
}
