//! Occurrence resolution for scheduled calls.
//!
//! `scheduledDate` is the anchor and is never rewritten. A record with
//! repeat days also fires on every later listed weekday at the anchor's
//! wall-clock time in the recurrence zone.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

use crate::models::ScheduledCall;

pub fn utc_zone() -> FixedOffset {
    Utc.fix()
}

fn weekly_candidate(
    call: &ScheduledCall,
    date: NaiveDate,
    zone: FixedOffset,
) -> Option<DateTime<Utc>> {
    if !call.repeats_on(date.weekday()) {
        return None;
    }
    let time = call.scheduled_date.with_timezone(&zone).time();
    zone.from_local_datetime(&date.and_time(time))
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Latest occurrence at or before `now`, or `None` when the anchor is still
/// in the future.
pub fn latest_occurrence(
    call: &ScheduledCall,
    now: DateTime<Utc>,
    zone: FixedOffset,
) -> Option<DateTime<Utc>> {
    let anchor = call.scheduled_date;
    if anchor > now {
        return None;
    }
    if !call.is_repeating() {
        return Some(anchor);
    }

    let today = now.with_timezone(&zone).date_naive();
    // Any weekday repeats within a week, so seven days back covers the latest one.
    let latest_weekly = (0..7)
        .filter_map(|days_back| today.checked_sub_signed(Duration::days(days_back)))
        .filter_map(|date| weekly_candidate(call, date, zone))
        .find(|candidate| *candidate <= now);

    match latest_weekly {
        Some(candidate) if candidate > anchor => Some(candidate),
        _ => Some(anchor),
    }
}

/// First occurrence strictly after `after`. Non-repeating records have at
/// most one occurrence, so they return `None` once the anchor has passed.
pub fn next_occurrence_after(
    call: &ScheduledCall,
    after: DateTime<Utc>,
    zone: FixedOffset,
) -> Option<DateTime<Utc>> {
    if call.scheduled_date > after {
        return Some(call.scheduled_date);
    }
    if !call.is_repeating() {
        return None;
    }

    let start = after.with_timezone(&zone).date_naive();
    (0..=7)
        .filter_map(|days_ahead| start.checked_add_signed(Duration::days(days_ahead)))
        .filter_map(|date| weekly_candidate(call, date, zone))
        .find(|candidate| *candidate > after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RepeatDay;
    use crate::test_utils::call_at;

    fn monday_nine() -> DateTime<Utc> {
        // 2025-03-03 is a Monday.
        Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
    }

    #[test]
    fn one_shot_occurrence_is_the_anchor() {
        let call = call_at("1", monday_nine());
        assert_eq!(latest_occurrence(&call, monday_nine() - Duration::seconds(1), utc_zone()), None);
        assert_eq!(
            latest_occurrence(&call, monday_nine() + Duration::days(3), utc_zone()),
            Some(monday_nine())
        );
        assert_eq!(next_occurrence_after(&call, monday_nine(), utc_zone()), None);
        assert_eq!(
            next_occurrence_after(&call, monday_nine() - Duration::hours(1), utc_zone()),
            Some(monday_nine())
        );
    }

    #[test]
    fn weekly_occurrence_follows_repeat_days() {
        let mut call = call_at("1", monday_nine());
        call.repeat_days.insert(RepeatDay::Wednesday);
        call.repeat_days.insert(RepeatDay::Friday);

        let wednesday_nine = monday_nine() + Duration::days(2);
        let friday_nine = monday_nine() + Duration::days(4);

        // Between the anchor and the first repeat day the anchor is latest.
        assert_eq!(
            latest_occurrence(&call, monday_nine() + Duration::days(1), utc_zone()),
            Some(monday_nine())
        );
        assert_eq!(
            latest_occurrence(&call, wednesday_nine + Duration::seconds(30), utc_zone()),
            Some(wednesday_nine)
        );
        // Thursday evening still points at Wednesday.
        assert_eq!(
            latest_occurrence(&call, wednesday_nine + Duration::hours(34), utc_zone()),
            Some(wednesday_nine)
        );
        assert_eq!(
            next_occurrence_after(&call, wednesday_nine, utc_zone()),
            Some(friday_nine)
        );
        // Monday is not a repeat day, so the week wraps to Wednesday.
        assert_eq!(
            next_occurrence_after(&call, friday_nine, utc_zone()),
            Some(wednesday_nine + Duration::days(7))
        );
    }

    #[test]
    fn repeat_days_use_the_recurrence_zone() {
        // 23:30 on Sunday in UTC-05:00 is 04:30 Monday UTC.
        let zone = FixedOffset::west_opt(5 * 3600).unwrap();
        let anchor = Utc.with_ymd_and_hms(2025, 3, 3, 4, 30, 0).unwrap();
        let mut call = call_at("1", anchor);
        call.repeat_days.insert(RepeatDay::Sunday);

        let next = next_occurrence_after(&call, anchor, zone).unwrap();
        assert_eq!(next, anchor + Duration::days(7));
        assert_eq!(latest_occurrence(&call, next, zone), Some(next));

        // Evaluated in UTC the same tag would land on a different instant.
        let utc_next = next_occurrence_after(&call, anchor, utc_zone()).unwrap();
        assert_ne!(utc_next, next);
    }
}
