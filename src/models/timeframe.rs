use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle bucket width, e.g. `1m`, `15m`, `4h`, `1d`, `1w`.
///
/// Stored as milliseconds; the original label is reproduced by `Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    millis: i64,
}

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
const WEEK_MS: i64 = 7 * DAY_MS;

impl Timeframe {
    pub fn from_millis(millis: i64) -> Option<Self> {
        (millis > 0).then_some(Self { millis })
    }

    pub fn as_millis(&self) -> i64 {
        self.millis
    }

    pub fn as_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.millis)
    }

    /// Start of the bucket containing `timestamp_ms`.
    pub fn bucket_start(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms - timestamp_ms.rem_euclid(self.millis)
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < 2 {
            return Err(format!("invalid timeframe: {:?}", s));
        }
        let split = s.char_indices().last().map_or(0, |(i, _)| i);
        let (count, unit) = s.split_at(split);
        let count: i64 = count
            .parse()
            .map_err(|_| format!("invalid timeframe count: {:?}", s))?;
        if count <= 0 {
            return Err(format!("timeframe must be positive: {:?}", s));
        }
        let unit_ms = match unit {
            "s" => 1_000,
            "m" => MINUTE_MS,
            "h" => HOUR_MS,
            "d" => DAY_MS,
            "w" => WEEK_MS,
            _ => return Err(format!("unknown timeframe unit in {:?}", s)),
        };
        let millis = count
            .checked_mul(unit_ms)
            .ok_or_else(|| format!("timeframe too large: {:?}", s))?;
        Ok(Self { millis })
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.millis;
        for (unit_ms, suffix) in [(WEEK_MS, "w"), (DAY_MS, "d"), (HOUR_MS, "h"), (MINUTE_MS, "m")] {
            if ms % unit_ms == 0 {
                return write!(f, "{}{}", ms / unit_ms, suffix);
            }
        }
        write!(f, "{}s", ms / 1_000)
    }
}
