#[cfg(test)]
mod tests {
    use chrono::{Datelike, Duration, Local, Timelike};

    use crate::source::dates::{from_epoch_value, parse_flexible, parse_or_now};

    fn minutes_apart(a: chrono::DateTime<Local>, b: chrono::DateTime<Local>) -> i64 {
        (a - b).num_seconds().abs() / 60
    }

    #[test]
    fn test_full_datetime_forms() {
        let ts = parse_flexible("2025-03-14 09:26:53").expect("full form");
        assert_eq!(
            (ts.year(), ts.month(), ts.day(), ts.hour(), ts.minute(), ts.second()),
            (2025, 3, 14, 9, 26, 53)
        );

        let no_secs = parse_flexible("2025-03-14 09:26").expect("no seconds");
        assert_eq!(no_secs.second(), 0);

        let slashed = parse_flexible("2025/03/14 09:26:53").expect("slash separators");
        assert_eq!(slashed, ts);

        let t_sep = parse_flexible("2025-03-14T09:26:53").expect("T separator");
        assert_eq!(t_sep, ts);

        let date_only = parse_flexible("2025-03-14").expect("date only");
        assert_eq!((date_only.hour(), date_only.minute()), (0, 0));
    }

    #[test]
    fn test_bare_time_combines_with_today() {
        let ts = parse_flexible("09:26").expect("bare time");
        let today = Local::now().date_naive();
        assert_eq!(ts.date_naive(), today);
        assert_eq!((ts.hour(), ts.minute()), (9, 26));

        let with_secs = parse_flexible("09:26:53").expect("bare time with seconds");
        assert_eq!(with_secs.second(), 53);
    }

    #[test]
    fn test_month_day_uses_current_year() {
        let now = Local::now();
        // Yesterday as MM-DD keeps the current year.
        let yesterday = now - Duration::days(1);
        let input = format!("{:02}-{:02} 10:30", yesterday.month(), yesterday.day());
        let ts = parse_flexible(&input).expect("month-day form");
        assert_eq!(ts.year(), yesterday.year());
        assert_eq!((ts.hour(), ts.minute()), (10, 30));
    }

    #[test]
    fn test_month_day_in_future_rolls_back_a_year() {
        let now = Local::now();
        // A month-day ~30 days ahead of now must resolve to last year.
        let ahead = now + Duration::days(30);
        let input = format!("{:02}-{:02} 10:30", ahead.month(), ahead.day());
        if let Some(ts) = parse_flexible(&input) {
            assert!(ts <= now + Duration::days(1), "resolved into the future: {}", ts);
            assert_eq!(ts.year(), ahead.year() - 1);
        }
    }

    #[test]
    fn test_relative_chinese_forms() {
        let now = Local::now();
        let cases = [
            ("5分钟前", Duration::minutes(5)),
            ("2小时前", Duration::hours(2)),
            ("3天前", Duration::days(3)),
            ("1周前", Duration::weeks(1)),
            ("2个月前", Duration::days(60)),
            ("1年前", Duration::days(365)),
        ];
        for (input, offset) in cases {
            let ts = parse_flexible(input).unwrap_or_else(|| panic!("parse {}", input));
            assert!(minutes_apart(ts, now - offset) < 1, "drift for {}", input);
        }
    }

    #[test]
    fn test_relative_english_forms() {
        let now = Local::now();
        let cases = [
            ("5 minutes ago", Duration::minutes(5)),
            ("1 minute ago", Duration::minutes(1)),
            ("2 hours ago", Duration::hours(2)),
            ("3 days ago", Duration::days(3)),
            ("1 week ago", Duration::weeks(1)),
            ("2 months ago", Duration::days(60)),
            ("1 year ago", Duration::days(365)),
        ];
        for (input, offset) in cases {
            let ts = parse_flexible(input).unwrap_or_else(|| panic!("parse {}", input));
            assert!(minutes_apart(ts, now - offset) < 1, "drift for {}", input);
        }
    }

    #[test]
    fn test_contextual_forms() {
        let today = Local::now().date_naive();
        let yesterday = today - Duration::days(1);

        let ts = parse_flexible("昨天 18:30").expect("昨天 with time");
        assert_eq!(ts.date_naive(), yesterday);
        assert_eq!((ts.hour(), ts.minute()), (18, 30));

        let ts = parse_flexible("今天 08:15").expect("今天 with time");
        assert_eq!(ts.date_naive(), today);

        let ts = parse_flexible("yesterday 18:30").expect("yesterday with time");
        assert_eq!(ts.date_naive(), yesterday);

        let ts = parse_flexible("today").expect("bare today");
        assert_eq!(ts.date_naive(), today);
        assert_eq!((ts.hour(), ts.minute()), (0, 0));

        let ts = parse_flexible("刚刚").expect("刚刚");
        assert!(minutes_apart(ts, Local::now()) < 1);
    }

    /// Unparseable input yields a timestamp within one second of now.
    #[test]
    fn test_unparseable_falls_back_to_now() {
        assert!(parse_flexible("not a date").is_none());
        assert!(parse_flexible("").is_none());
        assert!(parse_flexible("2025-13-45 99:99").is_none());

        let before = Local::now();
        let ts = parse_or_now("test-source", "not a date");
        let after = Local::now();
        assert!(ts >= before - Duration::seconds(1));
        assert!(ts <= after + Duration::seconds(1));
    }

    #[test]
    fn test_epoch_values() {
        let secs = from_epoch_value(&serde_json::json!(1_710_000_000)).expect("seconds");
        assert_eq!(secs.timestamp(), 1_710_000_000);

        let millis = from_epoch_value(&serde_json::json!(1_710_000_000_123i64)).expect("millis");
        assert_eq!(millis.timestamp(), 1_710_000_000);

        let stringy = from_epoch_value(&serde_json::json!("1710000000")).expect("string epoch");
        assert_eq!(stringy.timestamp(), 1_710_000_000);

        let formatted =
            from_epoch_value(&serde_json::json!("2025-03-14 09:26:53")).expect("string date");
        assert_eq!(formatted.year(), 2025);

        assert!(from_epoch_value(&serde_json::json!(null)).is_none());
        assert!(from_epoch_value(&serde_json::json!(0)).is_none());
    }
}
