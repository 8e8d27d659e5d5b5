use std::fs;
use std::path::PathBuf;

use chrono::{Duration, TimeZone, Utc};
use chrono_tz::Tz;

use crate::errors::ParserError;
use crate::parse_scan_log;
use crate::scan_log::MEASUREMENT_MARKER;

const ZONE: Tz = chrono_tz::Europe::Amsterdam;

fn fixture(path: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let full_path = base.join("tests/data").join(path);
    fs::read_to_string(&full_path)
        .unwrap_or_else(|err| panic!("failed to read fixture {}: {}", full_path.display(), err))
}

/// Builds one marker line with every vMon set to `v` and every rate set
/// to `rate`.
fn scan_line(ts: &str, v: f64, rate: f64) -> String {
    let mut fields = vec![ts.to_string(), MEASUREMENT_MARKER.to_string()];
    fields.extend((0..16).map(|_| format!("{v:.3}")));
    fields.extend((0..16).map(|i| format!("{:.4}", 0.001 * (i + 1) as f64)));
    fields.extend((0..16).map(|_| format!("{rate:.2}")));
    fields.push(format!("{rate:.2}"));
    fields.join(",")
}

#[test]
fn parses_fixture_and_skips_non_marker_lines() {
    let content = fixture("Scan_2021_03_28.txt");
    let measurements = parse_scan_log(&content, ZONE).expect("fixture parse failed");

    // 3 header/diagnostic lines and the trailer are dropped silently
    assert_eq!(measurements.len(), 4);

    // 01:30 CET is 00:30 UTC
    let first = &measurements[0];
    assert_eq!(
        first.timestamp,
        Utc.with_ymd_and_hms(2021, 3, 28, 0, 30, 0).unwrap()
    );
    assert_eq!(
        measurements[1].timestamp,
        Utc.with_ymd_and_hms(2021, 3, 28, 0, 45, 0).unwrap() + Duration::microseconds(250_000)
    );

    assert_eq!(first.avg_rate, 3075.0);
}

#[test]
fn channel_permutation_routes_columns_to_physical_ids() {
    let content = fixture("Scan_2021_03_28.txt");
    let measurements = parse_scan_log(&content, ZONE).expect("fixture parse failed");
    let first = &measurements[0];

    // first vMon column belongs to physical channel 12
    assert_eq!(first.v_mon[12], 111.5);
    // twelfth rate column belongs to physical channel 7
    assert_eq!(first.rate[7], 777.25);
    // and channel 12's rate comes from the first rate column
    assert_eq!(first.rate[12], 3000.0);
    assert_eq!(first.i_mon[12], 0.001);
}

#[test]
fn dst_transition_inside_a_session_uses_both_offsets() {
    let content = fixture("Scan_2021_03_28.txt");
    let measurements = parse_scan_log(&content, ZONE).expect("fixture parse failed");

    // local 01:45:00.250 (+01:00) and local 03:05:00.500 (+02:00) are
    // 20 min 250 ms apart in UTC
    let gap = measurements[2].timestamp - measurements[1].timestamp;
    assert_eq!(gap, Duration::minutes(20) + Duration::milliseconds(250));
}

#[test]
fn output_is_sorted_by_timestamp() {
    let content = [
        scan_line("2021.03.28 12:10:00.000000", 800.0, 3000.0),
        scan_line("2021.03.28 12:00:00.000000", 800.0, 3000.0),
        scan_line("2021.03.28 12:05:00.000000", 800.0, 3000.0),
    ]
    .join("\n");
    let measurements = parse_scan_log(&content, ZONE).expect("parse failed");
    assert!(measurements
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));
}

#[test]
fn wrong_field_count_is_fatal() {
    let mut line = scan_line("2021.03.28 12:00:00.000000", 800.0, 3000.0);
    line.push_str(",1.0");
    let err = parse_scan_log(&line, ZONE).expect_err("expected field count error");
    assert!(matches!(
        err,
        ParserError::FieldCount {
            line_index: 1,
            expected: 51,
            found: 52,
        }
    ));
}

#[test]
fn unparseable_numeric_field_is_fatal() {
    let line = scan_line("2021.03.28 12:00:00.000000", 800.0, 3000.0).replace("3000.00", "n/a");
    let err = parse_scan_log(&line, ZONE).expect_err("expected numeric error");
    assert!(matches!(err, ParserError::Numeric { line_index: 1, .. }));
}

#[test]
fn log_without_marker_lines_is_empty_data() {
    let content = "# header only\n# no measurements in this file\n";
    let err = parse_scan_log(content, ZONE).expect_err("expected empty data error");
    assert!(matches!(err, ParserError::EmptyData));
}

#[test]
fn ambiguous_local_time_is_rejected() {
    // 2021-10-31 02:30 occurs twice in Europe/Amsterdam
    let line = scan_line("2021.10.31 02:30:00.000000", 800.0, 3000.0);
    let err = parse_scan_log(&line, ZONE).expect_err("expected timestamp error");
    assert!(matches!(err, ParserError::Timestamp { line_index: 1, .. }));
}

#[test]
fn nonexistent_local_time_is_rejected() {
    // 2021-03-28 02:30 was skipped in Europe/Amsterdam
    let line = scan_line("2021.03.28 02:30:00.000000", 800.0, 3000.0);
    let err = parse_scan_log(&line, ZONE).expect_err("expected timestamp error");
    assert!(matches!(err, ParserError::Timestamp { line_index: 1, .. }));
}
