use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::model::{Minute, Ms, Span};

/// Grid granularity in minutes.
pub const GRANULARITY: Minute = 15;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

const MS_PER_MINUTE: Ms = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("bad time of day {0:?}: expected HH:MM")]
    BadTime(String),
    #[error("bad date {0:?}: expected YYYY-MM-DD")]
    BadDate(String),
}

/// Parse `HH:MM` (an optional `:SS` suffix is accepted and ignored) into
/// minutes since midnight.
pub fn parse_hhmm(s: &str) -> Result<Minute, GridError> {
    let bad = || GridError::BadTime(s.to_string());
    let mut parts = s.trim().split(':');
    let hours: u16 = parts.next().and_then(|h| h.parse().ok()).ok_or_else(bad)?;
    let minutes: u16 = parts.next().and_then(|m| m.parse().ok()).ok_or_else(bad)?;
    if let Some(seconds) = parts.next() {
        let secs: u16 = seconds.parse().map_err(|_| bad())?;
        if secs > 59 {
            return Err(bad());
        }
    }
    if parts.next().is_some() || hours > 23 || minutes > 59 {
        return Err(bad());
    }
    Ok(hours * 60 + minutes)
}

pub fn format_hhmm(minute: Minute) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

pub fn parse_date(s: &str) -> Result<NaiveDate, GridError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| GridError::BadDate(s.to_string()))
}

/// Number of consecutive grid slots a booking of `total_minutes` occupies.
/// `None` when the duration is not positive.
pub fn slots_needed(total_minutes: i64) -> Option<usize> {
    if total_minutes <= 0 {
        return None;
    }
    let g = GRANULARITY as i64;
    usize::try_from((total_minutes + g - 1) / g).ok()
}

/// First grid tick at or after `minute`. Ticks are aligned to midnight.
pub fn first_tick_at_or_after(minute: u32) -> u32 {
    let g = GRANULARITY as u32;
    minute.div_ceil(g) * g
}

/// A calendar date pinned to the business timezone. Every conversion between
/// local wall-clock minutes and absolute timestamps goes through here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessDay {
    pub date: NaiveDate,
    pub tz: Tz,
}

impl BusinessDay {
    pub fn new(date: NaiveDate, tz: Tz) -> Self {
        Self { date, tz }
    }

    /// Locate the local day and minute of an absolute timestamp. Every
    /// instant has exactly one local reading; `None` only for timestamps
    /// chrono cannot represent.
    pub fn locate(ms: Ms, tz: Tz) -> Option<(Self, u32)> {
        let local = DateTime::from_timestamp_millis(ms)?.with_timezone(&tz);
        let minute = local.hour() * 60 + local.minute();
        Some((Self::new(local.date_naive(), tz), minute))
    }

    /// 0 = Sunday .. 6 = Saturday.
    pub fn weekday(&self) -> u8 {
        self.date.weekday().num_days_from_sunday() as u8
    }

    /// Absolute timestamp of `minute` minutes after local midnight.
    ///
    /// Local times skipped by a forward DST jump keep the offset of the
    /// previous day, so they land just after the jump.
    pub fn instant(&self, minute: u32) -> Ms {
        let naive: NaiveDateTime = self.date.and_time(NaiveTime::MIN)
            + chrono::Duration::minutes(i64::from(minute));
        match self.tz.from_local_datetime(&naive).earliest() {
            Some(dt) => dt.timestamp_millis(),
            None => {
                let day_before = naive - chrono::Duration::days(1);
                let offset = self.tz.offset_from_utc_datetime(&day_before).fix();
                naive.and_utc().timestamp_millis() - i64::from(offset.local_minus_utc()) * 1000
            }
        }
    }

    /// `[local midnight, next local midnight)`.
    pub fn span(&self) -> Span {
        let start = self.instant(0);
        let end = match self.date.succ_opt() {
            Some(next) => BusinessDay::new(next, self.tz).instant(0),
            None => start + i64::from(MINUTES_PER_DAY) * MS_PER_MINUTE,
        };
        Span::new(start, end)
    }

    /// The absolute range covered by the grid cell starting at `minute`.
    pub fn slot_span(&self, minute: u32) -> Span {
        let start = self.instant(minute);
        Span::new(start, start + i64::from(GRANULARITY) * MS_PER_MINUTE)
    }
}

pub fn minutes_to_ms(minutes: i64) -> Ms {
    minutes * MS_PER_MINUTE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn parse_and_format_roundtrip() {
        assert_eq!(parse_hhmm("09:00"), Ok(540));
        assert_eq!(parse_hhmm("13:45"), Ok(825));
        assert_eq!(parse_hhmm("00:00"), Ok(0));
        assert_eq!(parse_hhmm("23:59"), Ok(1439));
        assert_eq!(format_hhmm(540), "09:00");
        assert_eq!(format_hhmm(825), "13:45");
        assert_eq!(format_hhmm(5), "00:05");
    }

    #[test]
    fn parse_accepts_seconds_suffix() {
        assert_eq!(parse_hhmm("18:00:00"), Ok(1080));
        assert!(parse_hhmm("18:00:61").is_err());
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "9", "24:00", "12:60", "ab:cd", "12:00:00:00", "-1:00"] {
            assert!(parse_hhmm(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn slots_needed_rounds_up() {
        assert_eq!(slots_needed(15), Some(1));
        assert_eq!(slots_needed(10), Some(1));
        assert_eq!(slots_needed(16), Some(2));
        assert_eq!(slots_needed(30), Some(2));
        assert_eq!(slots_needed(55), Some(4));
        assert_eq!(slots_needed(0), None);
        assert_eq!(slots_needed(-15), None);
    }

    #[test]
    fn ticks_align_to_midnight() {
        assert_eq!(first_tick_at_or_after(540), 540);
        assert_eq!(first_tick_at_or_after(541), 555);
        assert_eq!(first_tick_at_or_after(550), 555);
        assert_eq!(first_tick_at_or_after(0), 0);
    }

    #[test]
    fn weekday_sunday_is_zero() {
        let tz: Tz = "UTC".parse().unwrap();
        // 2026-01-18 is a Sunday, 2026-01-20 a Tuesday.
        assert_eq!(BusinessDay::new(date("2026-01-18"), tz).weekday(), 0);
        assert_eq!(BusinessDay::new(date("2026-01-20"), tz).weekday(), 2);
        assert_eq!(BusinessDay::new(date("2026-01-24"), tz).weekday(), 6);
    }

    #[test]
    fn instants_in_utc() {
        let tz: Tz = "UTC".parse().unwrap();
        let day = BusinessDay::new(date("1970-01-02"), tz);
        assert_eq!(day.instant(0), 86_400_000);
        assert_eq!(day.instant(60), 86_400_000 + 3_600_000);
        assert_eq!(day.span(), Span::new(86_400_000, 2 * 86_400_000));
        assert_eq!(day.slot_span(0).duration_ms(), 15 * 60_000);
    }

    #[test]
    fn instants_follow_business_timezone() {
        let utc: Tz = "UTC".parse().unwrap();
        let berlin: Tz = "Europe/Berlin".parse().unwrap();
        let d = date("2026-01-20");
        // Berlin is UTC+1 in January.
        assert_eq!(
            BusinessDay::new(d, berlin).instant(540),
            BusinessDay::new(d, utc).instant(480)
        );
    }

    #[test]
    fn dst_day_is_short() {
        let london: Tz = "Europe/London".parse().unwrap();
        // Clocks go forward on 2026-03-29.
        let day = BusinessDay::new(date("2026-03-29"), london);
        assert_eq!(day.span().duration_ms(), 23 * 3_600_000);
        // 01:30 does not exist locally; it still maps to a timestamp inside the day.
        let gap = day.instant(90);
        assert!(day.span().contains_instant(gap));
    }

    #[test]
    fn locate_inverts_instant() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let day = BusinessDay::new(date("2026-06-10"), tz);
        let ms = day.instant(13 * 60 + 15);
        let (found, minute) = BusinessDay::locate(ms, tz).unwrap();
        assert_eq!(found, day);
        assert_eq!(minute, 13 * 60 + 15);
    }

    #[test]
    fn locate_repeated_hour_and_range() {
        let london: Tz = "Europe/London".parse().unwrap();
        // Clocks go back on 2026-10-25: 01:30 local happens at 00:30 and 01:30 UTC.
        let first = 1_792_888_200_000;
        let second = first + 3_600_000;
        for ms in [first, second] {
            let (day, minute) = BusinessDay::locate(ms, london).unwrap();
            assert_eq!(day.date, date("2026-10-25"));
            assert_eq!(minute, 90);
        }
        assert!(BusinessDay::locate(i64::MAX, london).is_none());
    }
}
