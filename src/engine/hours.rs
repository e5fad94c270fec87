use crate::model::{Minute, WorkingHours};

/// What a single calendar day looks like from the booking side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaySchedule {
    Closed,
    Open {
        start: Minute,
        end: Minute,
        lunch: Option<(Minute, Minute)>,
    },
}

impl DaySchedule {
    pub fn is_open(&self) -> bool {
        matches!(self, DaySchedule::Open { .. })
    }

    /// `lunch_start <= minute < lunch_end`. Membership only; an inverted or
    /// out-of-hours lunch simply never matches.
    pub fn is_lunch(&self, minute: u32) -> bool {
        match self {
            DaySchedule::Open {
                lunch: Some((ls, le)),
                ..
            } => u32::from(*ls) <= minute && minute < u32::from(*le),
            _ => false,
        }
    }

    /// Whether `[start, end)` (local minutes) sits inside the open window
    /// without touching lunch.
    pub fn admits(&self, start: u32, end: u32) -> bool {
        match self {
            DaySchedule::Closed => false,
            DaySchedule::Open {
                start: open,
                end: close,
                lunch,
            } => {
                let inside = u32::from(*open) <= start && end <= u32::from(*close) && start < end;
                let hits_lunch = lunch.is_some_and(|(ls, le)| {
                    u32::from(ls) < end && start < u32::from(le)
                });
                inside && !hits_lunch
            }
        }
    }
}

/// Resolve the stored record for a weekday into the day's schedule.
///
/// A missing or inactive record means closed. Lunch is carried only when both
/// bounds are present; values are passed through uncorrected.
pub fn resolve(record: Option<&WorkingHours>) -> DaySchedule {
    let Some(hours) = record.filter(|h| h.is_active) else {
        return DaySchedule::Closed;
    };
    let lunch = match (hours.lunch_start, hours.lunch_end) {
        (Some(ls), Some(le)) => Some((ls, le)),
        _ => None,
    };
    DaySchedule::Open {
        start: hours.start_time,
        end: hours.end_time,
        lunch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(active: bool, lunch_start: Option<Minute>, lunch_end: Option<Minute>) -> WorkingHours {
        WorkingHours {
            day_of_week: 1,
            start_time: 9 * 60,
            end_time: 18 * 60,
            is_active: active,
            lunch_start,
            lunch_end,
        }
    }

    #[test]
    fn missing_record_is_closed() {
        assert_eq!(resolve(None), DaySchedule::Closed);
    }

    #[test]
    fn inactive_record_is_closed() {
        assert_eq!(resolve(Some(&hours(false, None, None))), DaySchedule::Closed);
    }

    #[test]
    fn active_record_without_lunch() {
        assert_eq!(
            resolve(Some(&hours(true, None, None))),
            DaySchedule::Open { start: 540, end: 1080, lunch: None }
        );
    }

    #[test]
    fn lunch_carried_through() {
        let day = resolve(Some(&hours(true, Some(780), Some(840))));
        assert_eq!(day, DaySchedule::Open { start: 540, end: 1080, lunch: Some((780, 840)) });
        assert!(day.is_lunch(780));
        assert!(day.is_lunch(825));
        assert!(!day.is_lunch(840));
        assert!(!day.is_lunch(765));
    }

    #[test]
    fn partial_lunch_means_no_lunch() {
        let only_start = resolve(Some(&hours(true, Some(780), None)));
        let only_end = resolve(Some(&hours(true, None, Some(840))));
        assert_eq!(only_start, DaySchedule::Open { start: 540, end: 1080, lunch: None });
        assert_eq!(only_end, DaySchedule::Open { start: 540, end: 1080, lunch: None });
    }

    #[test]
    fn inverted_lunch_is_carried_but_never_matches() {
        let day = resolve(Some(&hours(true, Some(840), Some(780))));
        assert_eq!(day, DaySchedule::Open { start: 540, end: 1080, lunch: Some((840, 780)) });
        for minute in 0..1440 {
            assert!(!day.is_lunch(minute));
        }
    }

    #[test]
    fn admits_inside_window_only() {
        let day = resolve(Some(&hours(true, Some(780), Some(840))));
        assert!(day.admits(540, 570));
        assert!(day.admits(1050, 1080));
        assert!(day.admits(750, 780)); // ends as lunch starts
        assert!(day.admits(840, 870)); // starts as lunch ends
        assert!(!day.admits(525, 555)); // before opening
        assert!(!day.admits(1065, 1095)); // runs past closing
        assert!(!day.admits(765, 795)); // runs into lunch
        assert!(!DaySchedule::Closed.admits(600, 630));
    }
}
