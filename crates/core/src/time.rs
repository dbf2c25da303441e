use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use thiserror::Error;

/// A simple clock abstraction for deterministic time in services and tests.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    Default,
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Returns a clock that uses the current system time.
    #[must_use]
    pub fn default_clock() -> Self {
        Self::Default
    }

    /// Returns a clock fixed at the given timestamp.
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Returns the current time according to the clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Default => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }

    /// If this is a fixed clock, advance it by the given duration.
    ///
    /// Has no effect on `Clock::Default`.
    pub fn advance(&mut self, delta: Duration) {
        if let Clock::Fixed(t) = self {
            *t += delta;
        }
    }

    #[must_use]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Clock::Fixed(_))
    }
}

/// Deterministic timestamp for tests and examples (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Returns a deterministic `DateTime<Utc>` for tests and doc examples.
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

/// Returns a `Clock` fixed at the deterministic test timestamp.
#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

//
// ─── PARSING ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid timestamp: {raw:?}")]
pub struct TimeParseError {
    raw: String,
}

impl TimeParseError {
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Parse an instant from the formats the course backend emits.
///
/// Accepts RFC 3339 with an explicit offset, or a naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` (space separator also accepted), which is
/// read as UTC because the backend stores naive UTC datetimes.
///
/// # Errors
///
/// Returns `TimeParseError` when none of the accepted formats match.
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|_| TimeParseError {
            raw: raw.to_owned(),
        })
}

/// Like [`parse_instant`], but absent or blank input means "no timestamp".
///
/// # Errors
///
/// Returns `TimeParseError` for non-blank input that cannot be parsed.
pub fn parse_optional_instant(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, TimeParseError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_instant(value).map(Some),
    }
}

//
// ─── FORMATTING ────────────────────────────────────────────────────────────────
//

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Whole days covered by `span`, rounded up. Negative spans count as zero.
#[must_use]
pub fn ceil_days(span: Duration) -> i64 {
    let millis = span.num_milliseconds().max(0);
    (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}

/// Zero-padded `HH:MM:SS`. Hours are not wrapped at 24; negative spans render as zero.
#[must_use]
pub fn format_countdown(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let parsed = parse_instant("2023-11-15T00:13:20+02:00").unwrap();
        assert_eq!(parsed, fixed_now());
    }

    #[test]
    fn parses_naive_backend_timestamps_as_utc() {
        assert_eq!(parse_instant("2023-11-14T22:13:20").unwrap(), fixed_now());
        assert_eq!(parse_instant("2023-11-14 22:13:20").unwrap(), fixed_now());
        let with_fraction = parse_instant("2023-11-14T22:13:20.500").unwrap();
        assert_eq!(with_fraction - fixed_now(), Duration::milliseconds(500));
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_instant("next tuesday").unwrap_err();
        assert_eq!(err.raw(), "next tuesday");
    }

    #[test]
    fn blank_optional_is_none() {
        assert_eq!(parse_optional_instant(None).unwrap(), None);
        assert_eq!(parse_optional_instant(Some("  ")).unwrap(), None);
        assert!(parse_optional_instant(Some("nope")).is_err());
    }

    #[test]
    fn ceil_days_rounds_partial_days_up() {
        assert_eq!(ceil_days(Duration::zero()), 0);
        assert_eq!(ceil_days(Duration::seconds(1)), 1);
        assert_eq!(ceil_days(Duration::hours(24)), 1);
        assert_eq!(ceil_days(Duration::hours(25)), 2);
        assert_eq!(ceil_days(Duration::hours(-3)), 0);
    }

    #[test]
    fn countdown_is_zero_padded_and_unbounded() {
        assert_eq!(format_countdown(Duration::seconds(5)), "00:00:05");
        assert_eq!(format_countdown(Duration::seconds(3 * 3600 + 61)), "03:01:01");
        assert_eq!(format_countdown(Duration::hours(30)), "30:00:00");
        assert_eq!(format_countdown(Duration::seconds(-10)), "00:00:00");
    }

    #[test]
    fn fixed_clock_advances() {
        let mut clock = fixed_clock();
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), fixed_now() + Duration::hours(2));
        assert!(clock.is_fixed());
    }
}
