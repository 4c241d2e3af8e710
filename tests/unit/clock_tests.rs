use std::time::Duration;

use cast_dispatch::clock::{
    canonical_offset, parse_offset, parse_schedule, wall_time, Clock, ManualClock, SystemClock,
};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};

fn jst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

#[test]
fn canonical_offset_is_utc_plus_nine() {
    assert_eq!(canonical_offset(), jst());
}

#[test]
fn parse_offset_accepts_signed_and_utc_forms() {
    assert_eq!(parse_offset("+09:00").unwrap(), jst());
    assert_eq!(
        parse_offset("-05:30").unwrap(),
        FixedOffset::west_opt(5 * 3600 + 1800).unwrap()
    );
    assert_eq!(parse_offset("Z").unwrap().local_minus_utc(), 0);
    assert_eq!(parse_offset("utc").unwrap().local_minus_utc(), 0);
    assert!(parse_offset("nine").is_err());
}

#[test]
fn naive_schedule_is_canonical_wall_time() {
    let at = parse_schedule("2026-03-01 09:30:00", jst()).unwrap();
    assert_eq!(at.offset(), &jst());
    assert_eq!(
        at.with_timezone(&Utc),
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 30, 0).unwrap()
    );

    let without_seconds = parse_schedule("2026-03-01T09:30", jst()).unwrap();
    assert_eq!(without_seconds, at);
}

#[test]
fn aware_schedule_is_converted_not_reinterpreted() {
    let at = parse_schedule("2026-03-01T00:30:00Z", jst()).unwrap();
    assert_eq!(at.offset(), &jst());
    assert_eq!(wall_time(&at, jst()), "2026-03-01 09:30:00");
}

#[test]
fn garbage_schedule_is_rejected() {
    let err = parse_schedule("tomorrow morning", jst()).unwrap_err();
    assert!(err.to_string().starts_with("validation:"));
}

#[test]
fn system_clock_reports_in_its_offset() {
    let clock = SystemClock::new(jst());
    assert_eq!(clock.now().offset(), &jst());
    assert_eq!(clock.offset(), jst());
}

#[tokio::test]
async fn manual_clock_sleep_advances_without_waiting() {
    let start: DateTime<FixedOffset> = jst().with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let clock = ManualClock::new(start, jst());

    clock.sleep(Duration::from_secs(90)).await;
    clock.advance(chrono::Duration::minutes(1));

    assert_eq!(clock.now(), start + chrono::Duration::seconds(150));
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(90)]);
}

#[test]
fn manual_clock_normalises_to_its_offset() {
    let utc_start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap().fixed_offset();
    let clock = ManualClock::new(utc_start, jst());
    assert_eq!(clock.now().offset(), &jst());
    assert_eq!(wall_time(&clock.now(), jst()), "2026-01-01 09:00:00");
}
