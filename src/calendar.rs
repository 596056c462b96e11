//! Local wall-clock ↔ absolute instant conversion for one organisation.
//!
//! Organisations run on a fixed UTC offset (no DST). All slot arithmetic
//! goes through here so that day boundaries are handled in one place:
//! local midnight in São Paulo is 03:00 UTC, so a local day straddles two
//! UTC dates.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, Timelike, Utc};

use crate::engine::EngineError;
use crate::model::{Ms, Span, MINUTE_MS};

pub const MINUTES_PER_DAY: u16 = 24 * 60;
const DAY_MS: Ms = MINUTES_PER_DAY as Ms * MINUTE_MS;

/// Largest accepted offset magnitude (UTC−14 … UTC+14).
pub const MAX_OFFSET_MINUTES: i32 = 14 * 60;

/// São Paulo, UTC−3.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = -180;

/// Local time decomposition of an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalParts {
    pub date: NaiveDate,
    /// 0 = Sunday … 6 = Saturday.
    pub weekday: u8,
    pub minute_of_day: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgClock {
    utc_offset_minutes: i32,
}

impl Default for OrgClock {
    fn default() -> Self {
        Self::new(DEFAULT_UTC_OFFSET_MINUTES)
    }
}

impl OrgClock {
    pub fn new(utc_offset_minutes: i32) -> Self {
        Self {
            utc_offset_minutes: utc_offset_minutes.clamp(-MAX_OFFSET_MINUTES, MAX_OFFSET_MINUTES),
        }
    }

    pub fn utc_offset_minutes(&self) -> i32 {
        self.utc_offset_minutes
    }

    fn offset_ms(&self) -> Ms {
        self.utc_offset_minutes as Ms * MINUTE_MS
    }

    /// Absolute instant of local `date` at `minute_of_day`.
    pub fn instant_at(&self, date: NaiveDate, minute_of_day: u16) -> Ms {
        let local_midnight_as_utc = date
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp_millis();
        local_midnight_as_utc - self.offset_ms() + minute_of_day as Ms * MINUTE_MS
    }

    /// The whole local calendar day `[local midnight, next local midnight)`.
    pub fn local_day_span(&self, date: NaiveDate) -> Span {
        let start = self.instant_at(date, 0);
        Span::new(start, start + DAY_MS)
    }

    pub fn local_parts(&self, t: Ms) -> LocalParts {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        let local = DateTime::from_timestamp_millis(t)
            .unwrap_or_default()
            .with_timezone(&offset);
        LocalParts {
            date: local.date_naive(),
            weekday: local.weekday().num_days_from_sunday() as u8,
            minute_of_day: (local.hour() * 60 + local.minute()) as u16,
        }
    }
}

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

pub fn weekday_of(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Parse a calendar date in `YYYY-MM-DD` form.
pub fn parse_date(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidInput(format!("malformed date: {s:?}")))
}

/// Parse `HH:MM` into minutes since midnight. `24:00` is accepted so a rule
/// can run to the end of the day.
pub fn parse_time_of_day(s: &str) -> Result<u16, EngineError> {
    let s = s.trim();
    if s == "24:00" {
        return Ok(MINUTES_PER_DAY);
    }
    let t = NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| EngineError::InvalidInput(format!("malformed time of day: {s:?}")))?;
    Ok((t.hour() * 60 + t.minute()) as u16)
}

pub fn format_time_of_day(minute_of_day: u16) -> String {
    format!("{:02}:{:02}", minute_of_day / 60, minute_of_day % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn local_midnight_is_three_utc_in_sao_paulo() {
        let clock = OrgClock::default();
        let day = clock.local_day_span(date(2030, 6, 3));
        let utc = DateTime::from_timestamp_millis(day.start).unwrap();
        assert_eq!(utc.to_rfc3339(), "2030-06-03T03:00:00+00:00");
        assert_eq!(day.duration_ms(), 24 * 60 * MINUTE_MS);
    }

    #[test]
    fn late_evening_local_is_next_day_utc() {
        let clock = OrgClock::default();
        // 22:30 local on Monday is 01:30 UTC on Tuesday.
        let t = clock.instant_at(date(2030, 6, 3), 22 * 60 + 30);
        let utc = DateTime::from_timestamp_millis(t).unwrap();
        assert_eq!(utc.to_rfc3339(), "2030-06-04T01:30:00+00:00");

        let parts = clock.local_parts(t);
        assert_eq!(parts.date, date(2030, 6, 3));
        assert_eq!(parts.weekday, 1);
        assert_eq!(parts.minute_of_day, 22 * 60 + 30);
    }

    #[test]
    fn positive_offset_roundtrip() {
        let clock = OrgClock::new(330); // UTC+5:30
        let t = clock.instant_at(date(2030, 1, 1), 30);
        let parts = clock.local_parts(t);
        assert_eq!(parts.date, date(2030, 1, 1));
        assert_eq!(parts.minute_of_day, 30);
    }

    #[test]
    fn offset_is_clamped() {
        assert_eq!(OrgClock::new(-10_000).utc_offset_minutes(), -MAX_OFFSET_MINUTES);
    }

    #[test]
    fn weekday_numbering_starts_sunday() {
        assert_eq!(weekday_of(date(2030, 6, 2)), 0); // Sunday
        assert_eq!(weekday_of(date(2030, 6, 3)), 1); // Monday
        assert_eq!(weekday_of(date(2030, 6, 8)), 6); // Saturday
    }

    #[test]
    fn parse_and_format_time() {
        assert_eq!(parse_time_of_day("09:30").unwrap(), 570);
        assert_eq!(parse_time_of_day("24:00").unwrap(), 1440);
        assert!(parse_time_of_day("25:00").is_err());
        assert!(parse_time_of_day("nine").is_err());
        assert_eq!(format_time_of_day(570), "09:30");
        assert_eq!(format_time_of_day(0), "00:00");
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert_eq!(parse_date("2030-06-03").unwrap(), date(2030, 6, 3));
        assert!(matches!(parse_date("2030-13-01"), Err(EngineError::InvalidInput(_))));
        assert!(parse_date("03/06/2030").is_err());
    }
}
