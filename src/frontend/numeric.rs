//! The dodecagram (base-twelve) numeric model and the duration model built on
//! top of it. All durations are stored as signed 64-bit nanosecond counts.

use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NumericError {
    #[error("invalid dodecagram digit `{0}`")]
    InvalidDigit(char),
    #[error("empty numeric literal")]
    Empty,
}

/// Parses a base-twelve digit string (digits `0-9`, `a`, `b`; uppercase
/// accepted) into its decimal value. A leading `-` negates.
pub fn parse_base_twelve(text: &str) -> Result<i64, NumericError> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    if digits.is_empty() {
        return Err(NumericError::Empty);
    }

    let mut value: i64 = 0;

    for c in digits.chars() {
        let digit = match c.to_ascii_lowercase() {
            d @ '0'..='9' => d as i64 - '0' as i64,
            'a' => 10,
            'b' => 11,
            other => return Err(NumericError::InvalidDigit(other)),
        };

        value = value.wrapping_mul(12).wrapping_add(if negative { -digit } else { digit });
    }

    Ok(value)
}

/// Parses a decimal digit string. Used for `10#`-prefixed literals, which
/// admit only `[0-9]` digits.
pub fn parse_decimal(text: &str) -> Result<i64, NumericError> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    if digits.is_empty() {
        return Err(NumericError::Empty);
    }

    let mut value: i64 = 0;

    for c in digits.chars() {
        let digit = match c {
            d @ '0'..='9' => d as i64 - '0' as i64,
            other => return Err(NumericError::InvalidDigit(other)),
        };

        value = value.wrapping_mul(10).wrapping_add(if negative { -digit } else { digit });
    }

    Ok(value)
}

/// Formats a value as lowercase base-twelve text with no leading zeros and a
/// leading `-` for negatives. Round-trips through [`parse_base_twelve`] for
/// every `i64`, including `i64::MIN`.
pub fn to_base_twelve(value: i64) -> String {
    if value == 0 {
        return "0".to_owned();
    }

    const DIGITS: &[u8; 12] = b"0123456789ab";

    // Widen before negating so i64::MIN does not overflow
    let negative = value < 0;
    let mut remaining = (value as i128).unsigned_abs();

    let mut out = Vec::new();
    while remaining > 0 {
        out.push(DIGITS[(remaining % 12) as usize]);
        remaining /= 12;
    }

    if negative {
        out.push(b'-');
    }

    out.reverse();
    String::from_utf8(out).unwrap()
}

/// The units a numeric literal may be suffixed with. `ms` is the dozisecond,
/// one twelfth of a second, not the SI millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, Display)]
#[strum(ascii_case_insensitive)]
pub enum TimeUnit {
    #[strum(serialize = "ns")]
    Nanoseconds,
    #[strum(serialize = "ms")]
    Doziseconds,
    #[strum(serialize = "s")]
    Seconds,
    #[strum(serialize = "m")]
    Minutes,
    #[strum(serialize = "h")]
    Hours,
}

impl TimeUnit {
    /// Nanoseconds per one of this unit.
    pub fn nanoseconds(self) -> i64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Doziseconds => 83_333_333,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 3600 * 1_000_000_000,
        }
    }
}

/// A span of time, stored in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Duration {
    nanoseconds: i64,
}

impl Duration {
    pub const fn from_nanoseconds(nanoseconds: i64) -> Self {
        Self { nanoseconds }
    }

    /// Builds a duration from a magnitude and unit, saturating to
    /// `i64::MAX`/`i64::MIN` on overflow. Callers that need to surface the
    /// saturation as a diagnostic should use [`Duration::from_parts_exact`]
    /// first.
    pub fn from_parts(magnitude: i64, unit: TimeUnit) -> Self {
        Self {
            nanoseconds: magnitude.saturating_mul(unit.nanoseconds()),
        }
    }

    /// As [`Duration::from_parts`] but `None` when the conversion overflows.
    pub fn from_parts_exact(magnitude: i64, unit: TimeUnit) -> Option<Self> {
        magnitude
            .checked_mul(unit.nanoseconds())
            .map(Self::from_nanoseconds)
    }

    pub fn nanoseconds(&self) -> i64 {
        self.nanoseconds
    }

    /// The magnitude of this duration in the given unit, truncated.
    pub fn as_unit(&self, unit: TimeUnit) -> i64 {
        self.nanoseconds / unit.nanoseconds()
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn parses_canonical_digits() {
        assert_eq!(parse_base_twelve("0"), Ok(0));
        assert_eq!(parse_base_twelve("10"), Ok(12));
        assert_eq!(parse_base_twelve("3b"), Ok(47));
        assert_eq!(parse_base_twelve("3B"), Ok(47));
        assert_eq!(parse_base_twelve("100"), Ok(144));
        assert_eq!(parse_base_twelve("-10"), Ok(-12));
    }

    #[test]
    fn rejects_foreign_digits() {
        assert_eq!(parse_base_twelve("3c"), Err(NumericError::InvalidDigit('c')));
        assert_eq!(parse_base_twelve(""), Err(NumericError::Empty));
        assert_eq!(parse_decimal("4a"), Err(NumericError::InvalidDigit('a')));
    }

    #[test]
    fn formats_canonically() {
        assert_eq!(to_base_twelve(0), "0");
        assert_eq!(to_base_twelve(47), "3b");
        assert_eq!(to_base_twelve(144), "100");
        assert_eq!(to_base_twelve(-12), "-10");
    }

    #[test]
    fn round_trips_across_the_value_space() {
        for value in [
            0,
            1,
            -1,
            11,
            12,
            47,
            143,
            144,
            1_000_000_007,
            i64::MAX,
            i64::MIN,
            i64::MIN + 1,
        ] {
            assert_eq!(parse_base_twelve(&to_base_twelve(value)), Ok(value));
        }
    }

    #[test]
    fn dozisecond_factor_is_a_twelfth_of_a_second() {
        assert_eq!(TimeUnit::Doziseconds.nanoseconds(), 83_333_333);
        assert_eq!(
            Duration::from_parts(12, TimeUnit::Doziseconds).nanoseconds(),
            999_999_996
        );
        assert_eq!(
            Duration::from_parts(1, TimeUnit::Seconds).nanoseconds(),
            1_000_000_000
        );
    }

    #[test]
    fn unit_round_trip_modulo_truncation() {
        for unit in TimeUnit::iter() {
            let duration = Duration::from_parts(7, unit);
            assert_eq!(
                Duration::from_parts(duration.as_unit(unit), unit).nanoseconds(),
                duration.nanoseconds()
            );
        }
    }

    #[test]
    fn saturates_instead_of_panicking() {
        let saturated = Duration::from_parts(i64::MAX, TimeUnit::Hours);
        assert_eq!(saturated.nanoseconds(), i64::MAX);
        assert_eq!(Duration::from_parts_exact(i64::MAX, TimeUnit::Hours), None);

        let negative = Duration::from_parts(i64::MIN, TimeUnit::Seconds);
        assert_eq!(negative.nanoseconds(), i64::MIN);
    }

    #[test]
    fn unit_names_parse_case_insensitively() {
        assert_eq!("ms".parse(), Ok(TimeUnit::Doziseconds));
        assert_eq!("MS".parse(), Ok(TimeUnit::Doziseconds));
        assert_eq!("h".parse(), Ok(TimeUnit::Hours));
        assert!("sec".parse::<TimeUnit>().is_err());
    }
}
