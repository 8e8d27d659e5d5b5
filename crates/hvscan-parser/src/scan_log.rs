use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use csv::StringRecord;

use crate::errors::ParserError;
use crate::model::{Measurement, CHANNEL_COLUMN_ORDER, CHANNEL_COUNT};

/// Token distinguishing measurement records from headers and
/// diagnostics interleaved in the same log.
pub const MEASUREMENT_MARKER: &str = "#M";

/// Local-time format used by the auto-HV-scan logger.
pub const TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S%.f";

// timestamp, marker, vMon x16, iMon x16, rate x16, avgRate
const FIELD_COUNT: usize = 2 + 3 * CHANNEL_COUNT + 1;

/// Parses one scan session's raw log text into measurements sorted by
/// timestamp ascending.
///
/// Lines without the `#M` marker are skipped silently. Any marker line
/// that fails to parse is fatal for the whole session; logs are assumed
/// internally consistent and partial recovery is not attempted.
pub fn parse_scan_log(content: &str, zone: Tz) -> Result<Vec<Measurement>, ParserError> {
    let mut line_numbers = Vec::new();
    let mut filtered = String::new();
    for (idx, line) in content.lines().enumerate() {
        if line.contains(MEASUREMENT_MARKER) {
            line_numbers.push(idx + 1);
            filtered.push_str(line);
            filtered.push('\n');
        }
    }
    if line_numbers.is_empty() {
        return Err(ParserError::EmptyData);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(filtered.as_bytes());

    let mut measurements = Vec::with_capacity(line_numbers.len());
    for (idx, record) in reader.records().enumerate() {
        let line_index = line_numbers[idx];
        let record = record.map_err(|source| ParserError::Csv { line_index, source })?;
        measurements.push(parse_record(&record, line_index, zone)?);
    }

    measurements.sort_by_key(|m| m.timestamp);
    Ok(measurements)
}

fn parse_record(
    record: &StringRecord,
    line_index: usize,
    zone: Tz,
) -> Result<Measurement, ParserError> {
    if record.len() != FIELD_COUNT {
        return Err(ParserError::FieldCount {
            line_index,
            expected: FIELD_COUNT,
            found: record.len(),
        });
    }

    let timestamp = parse_timestamp(record.get(0).unwrap_or_default(), line_index, zone)?;
    let v_mon = parse_channel_block(record, 2, "vMon", line_index)?;
    let i_mon = parse_channel_block(record, 2 + CHANNEL_COUNT, "iMon", line_index)?;
    let rate = parse_channel_block(record, 2 + 2 * CHANNEL_COUNT, "rate", line_index)?;
    let avg_rate = parse_f64(
        record.get(FIELD_COUNT - 1).unwrap_or_default(),
        line_index,
        "avgRate",
    )?;

    Ok(Measurement {
        timestamp,
        v_mon,
        i_mon,
        rate,
        avg_rate,
    })
}

/// Reads one 16-column block, routing column position to physical
/// channel ID through [`CHANNEL_COLUMN_ORDER`].
fn parse_channel_block(
    record: &StringRecord,
    offset: usize,
    prefix: &str,
    line_index: usize,
) -> Result<[f64; CHANNEL_COUNT], ParserError> {
    let mut values = [0.0; CHANNEL_COUNT];
    for (position, &channel) in CHANNEL_COLUMN_ORDER.iter().enumerate() {
        let raw = record.get(offset + position).unwrap_or_default();
        values[channel] = parse_f64(raw, line_index, &format!("{prefix}{channel}"))?;
    }
    Ok(values)
}

fn parse_timestamp(value: &str, line_index: usize, zone: Tz) -> Result<DateTime<Utc>, ParserError> {
    let trimmed = value.trim();
    let naive = NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT).map_err(|err| {
        ParserError::Timestamp {
            line_index,
            value: trimmed.to_string(),
            message: err.to_string(),
        }
    })?;
    // Zone-aware conversion through the IANA database; sessions can
    // straddle a DST transition.
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(_, _) => Err(ParserError::Timestamp {
            line_index,
            value: trimmed.to_string(),
            message: format!("ambiguous local time in zone {zone}"),
        }),
        LocalResult::None => Err(ParserError::Timestamp {
            line_index,
            value: trimmed.to_string(),
            message: format!("nonexistent local time in zone {zone}"),
        }),
    }
}

fn parse_f64(value: &str, line_index: usize, column: &str) -> Result<f64, ParserError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|err| ParserError::Numeric {
            line_index,
            column: column.to_string(),
            message: err.to_string(),
        })
}
