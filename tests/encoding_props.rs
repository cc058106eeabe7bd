//! Property tests for the day/time/status encodings

use proptest::prelude::*;
use regsync::encoding::{
    days_to_value, derive_course_status, meetings_conflict, time_key, time_to_value,
    value_to_days, value_to_time, Meeting, Status,
};

const TOKENS: [&str; 5] = ["M", "T", "W", "Th", "F"];

fn clock(minute_of_day: u32) -> String {
    let hour = minute_of_day / 60;
    let minute = minute_of_day % 60;
    let meridiem = if hour >= 12 { "PM" } else { "AM" };
    let display = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{display}:{minute:02} {meridiem}")
}

fn status() -> impl Strategy<Value = Status> {
    prop_oneof![
        Just(Status::Open),
        Just(Status::Closed),
        Just(Status::Canceled)
    ]
}

proptest! {
    #[test]
    fn days_mask_matches_tokens(mask in 0u8..32) {
        let tokens: Vec<&str> = (0..5)
            .filter(|bit| mask & (1 << bit) != 0)
            .map(|bit| TOKENS[bit])
            .collect();

        prop_assert_eq!(days_to_value(&tokens).unwrap(), mask);

        let expected: Vec<u8> = (0..5u8).filter(|bit| mask & (1 << bit) != 0).map(|b| b + 1).collect();
        prop_assert_eq!(value_to_days(mask), expected);
    }

    #[test]
    fn day_tokens_ignore_case(mask in 1u8..32) {
        let upper: Vec<String> = (0..5)
            .filter(|bit| mask & (1 << bit) != 0)
            .map(|bit| TOKENS[bit].to_uppercase())
            .collect();
        let lower: Vec<String> = upper.iter().map(|t| t.to_lowercase()).collect();

        prop_assert_eq!(days_to_value(&upper).unwrap(), days_to_value(&lower).unwrap());
    }

    #[test]
    fn clock_time_decodes_to_same_minute(minute_of_day in 0u32..1440) {
        let encoded = time_to_value(Some(&clock(minute_of_day))).unwrap();
        let (hour, minute) = value_to_time(encoded).unwrap();
        prop_assert_eq!(u32::from(hour) * 60 + u32::from(minute), minute_of_day);
    }

    #[test]
    fn meridiem_case_is_ignored(minute_of_day in 0u32..1440) {
        let text = clock(minute_of_day);
        prop_assert_eq!(
            time_to_value(Some(&text)).unwrap(),
            time_to_value(Some(&text.to_lowercase())).unwrap()
        );
    }

    #[test]
    fn encoding_preserves_time_order(a in 0u32..1440, b in 0u32..1440) {
        let va = time_key(time_to_value(Some(&clock(a))).unwrap());
        let vb = time_key(time_to_value(Some(&clock(b))).unwrap());
        prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
    }

    #[test]
    fn conflict_is_symmetric(
        days_a in 0u8..32, days_b in 0u8..32,
        start_a in 0u32..1380, len_a in 1u32..60,
        start_b in 0u32..1380, len_b in 1u32..60,
    ) {
        let encode = |m: u32| time_to_value(Some(&clock(m))).unwrap();
        let a = Meeting { days: days_a, start: encode(start_a), end: encode(start_a + len_a) };
        let b = Meeting { days: days_b, start: encode(start_b), end: encode(start_b + len_b) };

        prop_assert_eq!(meetings_conflict(&a, &b), meetings_conflict(&b, &a));
        if days_a & days_b == 0 {
            prop_assert!(!meetings_conflict(&a, &b));
        }
    }

    #[test]
    fn open_section_in_every_category_opens_course(
        statuses in prop::collection::vec(status(), 0..6),
    ) {
        let mut sections: Vec<(String, Status)> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("{}0{}", if i % 2 == 0 { 'L' } else { 'P' }, i), *s))
            .collect();
        sections.push(("L99".to_string(), Status::Open));
        sections.push(("P99".to_string(), Status::Open));

        let status = derive_course_status(sections.iter().map(|(t, s)| (t.as_str(), *s)));
        prop_assert_eq!(status, Status::Open);
    }

    #[test]
    fn all_canceled_course_is_canceled(count in 1usize..6) {
        let sections: Vec<(String, Status)> =
            (0..count).map(|i| (format!("C0{i}"), Status::Canceled)).collect();
        let status = derive_course_status(sections.iter().map(|(t, s)| (t.as_str(), *s)));
        prop_assert_eq!(status, Status::Canceled);
    }
}
