//! Due-call selection. Pure functions over a snapshot of the collection.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Serialize;

use super::recurrence::{latest_occurrence, utc_zone};
use crate::models::ScheduledCall;

/// A record together with the occurrence that made it due.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueCall {
    pub call: ScheduledCall,
    pub occurrence: DateTime<Utc>,
}

/// Due calls evaluated against the UTC calendar.
pub fn due_calls(records: &[ScheduledCall], now: DateTime<Utc>, lookback: Duration) -> Vec<DueCall> {
    due_calls_in(records, now, lookback, utc_zone())
}

/// Every active record whose current occurrence lies in `(now - lookback, now]`,
/// earliest occurrence first, ties broken by id.
pub fn due_calls_in(
    records: &[ScheduledCall],
    now: DateTime<Utc>,
    lookback: Duration,
    zone: FixedOffset,
) -> Vec<DueCall> {
    let window_start = now - lookback;

    let mut due: Vec<DueCall> = records
        .iter()
        .filter(|call| call.is_active)
        .filter_map(|call| {
            let occurrence = latest_occurrence(call, now, zone)?;
            (occurrence > window_start && occurrence <= now).then(|| DueCall {
                call: call.clone(),
                occurrence,
            })
        })
        .collect();

    due.sort_by(|a, b| {
        a.occurrence
            .cmp(&b.occurrence)
            .then_with(|| a.call.id.cmp(&b.call.id))
    });
    due
}

/// The single call a cycle should dispatch, if any.
pub fn next_due(
    records: &[ScheduledCall],
    now: DateTime<Utc>,
    lookback: Duration,
    zone: FixedOffset,
) -> Option<DueCall> {
    due_calls_in(records, now, lookback, zone).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RepeatDay;
    use crate::test_utils::call_at;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn future_call_becomes_due_once_its_time_passes() {
        let call = call_at("1", now() + Duration::minutes(10));
        let window = Duration::seconds(60);

        assert!(due_calls(&[call.clone()], now(), window).is_empty());

        let later = now() + Duration::minutes(10) + Duration::seconds(1);
        let due = due_calls(&[call], later, window);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].call.id, "1");
        assert_eq!(due[0].occurrence, now() + Duration::minutes(10));
    }

    #[test]
    fn window_is_exclusive_below_and_inclusive_at_now() {
        let window = Duration::seconds(60);
        let at_now = call_at("now", now());
        let at_edge = call_at("edge", now() - window);
        let inside = call_at("inside", now() - window + Duration::milliseconds(1));
        let future = call_at("future", now() + Duration::milliseconds(1));

        let due = due_calls(&[at_now, at_edge, inside, future], now(), window);
        let ids: Vec<&str> = due.iter().map(|d| d.call.id.as_str()).collect();
        assert_eq!(ids, vec!["inside", "now"]);
    }

    #[test]
    fn inactive_records_are_never_due() {
        let window = Duration::minutes(5);
        for offset_secs in [-299, -60, 0] {
            let mut call = call_at("1", now() + Duration::seconds(offset_secs));
            call.is_active = false;
            call.repeat_days.insert(RepeatDay::Wednesday);
            assert!(due_calls(&[call], now(), window).is_empty());
        }
    }

    #[test]
    fn matches_the_window_rule_for_every_offset() {
        let window = Duration::seconds(60);
        for offset_secs in -180..=60 {
            let scheduled = now() + Duration::seconds(offset_secs);
            let call = call_at("1", scheduled);
            let expected = now() - window < scheduled && scheduled <= now();
            assert_eq!(
                !due_calls(&[call], now(), window).is_empty(),
                expected,
                "offset {offset_secs}s"
            );
        }
    }

    #[test]
    fn earliest_due_call_wins_then_id() {
        let window = Duration::minutes(5);
        let later = call_at("a", now() - Duration::seconds(10));
        let earlier = call_at("z", now() - Duration::seconds(90));
        let tie = call_at("b", now() - Duration::seconds(10));

        let picked = next_due(&[later, tie, earlier], now(), window, utc_zone()).unwrap();
        assert_eq!(picked.call.id, "z");

        let due = due_calls(
            &[call_at("b", now()), call_at("a", now())],
            now(),
            window,
        );
        assert_eq!(due[0].call.id, "a");
    }

    #[test]
    fn repeating_call_is_due_on_its_weekday() {
        // 2025-03-05 is a Wednesday; anchor a week earlier on Monday.
        let mut call = call_at("1", now() - Duration::days(9));
        call.repeat_days.insert(RepeatDay::Wednesday);

        let due = due_calls(&[call.clone()], now() + Duration::seconds(20), Duration::seconds(60));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].occurrence, now());

        assert!(due_calls(&[call], now() + Duration::minutes(2), Duration::seconds(60)).is_empty());
    }
}
