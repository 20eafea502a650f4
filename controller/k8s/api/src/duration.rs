//! Durations written the way Go's `time.ParseDuration` accepts them, e.g.
//! `90s`, `1h30m`, `1.5m`.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};

#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct GoDuration {
    duration: Duration,
    is_negative: bool,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("empty duration")]
    Empty,

    #[error("unknown unit {0:?}: {EXPECTED_UNITS}")]
    InvalidUnit(String),

    #[error("missing unit: {EXPECTED_UNITS}")]
    NoUnit,

    #[error("invalid number: {0}")]
    NotANumber(#[from] std::num::ParseFloatError),
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

// === impl GoDuration ===

impl GoDuration {
    pub fn is_negative(&self) -> bool {
        self.is_negative
    }

    /// The duration, or `None` if it is negative.
    pub fn to_std(self) -> Option<Duration> {
        if self.is_negative && !self.duration.is_zero() {
            return None;
        }
        Some(self.duration)
    }
}

impl From<Duration> for GoDuration {
    fn from(duration: Duration) -> Self {
        Self {
            duration,
            is_negative: false,
        }
    }
}

impl fmt::Debug for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative {
            f.write_str("-")?;
        }
        fmt::Debug::fmt(&self.duration, f)
    }
}

fn unit_base(unit: &str) -> Result<Duration, ParseError> {
    Ok(match unit {
        "ns" => Duration::from_nanos(1),
        // U+00B5 is the micro sign, U+03BC is the Greek letter mu.
        "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
        "ms" => Duration::from_millis(1),
        "s" => Duration::from_secs(1),
        "m" => Duration::from_secs(60),
        "h" => Duration::from_secs(60 * 60),
        _ => return Err(ParseError::InvalidUnit(unit.to_string())),
    })
}

impl FromStr for GoDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (is_negative, mut rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        if rest.is_empty() {
            return Err(ParseError::Empty);
        }
        if rest == "0" {
            return Ok(Self {
                duration: Duration::ZERO,
                is_negative,
            });
        }

        let mut duration = Duration::ZERO;
        while !rest.is_empty() {
            let unit_at = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .ok_or(ParseError::NoUnit)?;
            let (value, tail) = rest.split_at(unit_at);
            let value = value.parse::<f64>()?;
            let unit_end = tail
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_end);
            duration += unit_base(unit)?.mul_f64(value);
            rest = tail;
        }

        Ok(Self {
            duration,
            is_negative,
        })
    }
}

impl Serialize for GoDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GoDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_go_durations() {
        const MINUTE: Duration = Duration::from_secs(60);
        let cases: &[(&str, Duration)] = &[
            ("0", Duration::ZERO),
            ("+0", Duration::ZERO),
            ("5s", Duration::from_secs(5)),
            ("90s", Duration::from_secs(90)),
            ("+5s", Duration::from_secs(5)),
            ("5.6s", Duration::from_millis(5600)),
            (".5s", Duration::from_millis(500)),
            ("5.s", Duration::from_secs(5)),
            ("10ms", Duration::from_millis(10)),
            ("11us", Duration::from_micros(11)),
            ("12\u{00b5}s", Duration::from_micros(12)),
            ("13ns", Duration::from_nanos(13)),
            ("2m", 2 * MINUTE),
            ("1h30m", 90 * MINUTE),
            ("3h2m1s", Duration::from_secs(3 * 3600 + 2 * 60 + 1)),
        ];
        for (input, expected) in cases {
            let parsed = input
                .parse::<GoDuration>()
                .unwrap_or_else(|e| panic!("{input:?} must parse: {e}"));
            assert_eq!(parsed.to_std(), Some(*expected), "{input}");
        }
    }

    #[test]
    fn negative_durations() {
        let d = "-5s".parse::<GoDuration>().expect("must parse");
        assert!(d.is_negative());
        assert_eq!(d.to_std(), None);
        assert_eq!(
            "-0".parse::<GoDuration>().expect("must parse").to_std(),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!("".parse::<GoDuration>(), Err(ParseError::Empty));
        assert_eq!("3".parse::<GoDuration>(), Err(ParseError::NoUnit));
        assert_eq!(
            "3x".parse::<GoDuration>(),
            Err(ParseError::InvalidUnit("x".to_string()))
        );
        assert!("s".parse::<GoDuration>().is_err());
        assert!("1.2.3s".parse::<GoDuration>().is_err());
    }
}
