use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use hvscan_parser::{Measurement, CHANNEL_COUNT};

use crate::reference::{DetectorType, ReferenceError, ReferenceSource};
use crate::types::{MergedRecord, ReferencePoint};

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("session has no measurements to align")]
    NoMeasurements,

    #[error("reference data unavailable for {begin}..{end}: {reason}")]
    ReferenceUnavailable {
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
        reason: String,
        #[source]
        source: Option<ReferenceError>,
    },
}

/// Merges a session's measurements with reference pileup data via an
/// as-of backward join: each measurement pairs with the reference point
/// carrying the greatest timestamp not exceeding its own.
///
/// Measurements preceding the first reference point, or whose matched
/// pileup is non-positive or non-finite, are dropped rather than
/// imputed. Output preserves measurement order.
pub fn align(
    measurements: &[Measurement],
    source: &dyn ReferenceSource,
) -> Result<Vec<MergedRecord>, AlignError> {
    let begin = measurements
        .first()
        .map(|m| m.timestamp)
        .ok_or(AlignError::NoMeasurements)?;
    let end = measurements
        .last()
        .map(|m| m.timestamp)
        .ok_or(AlignError::NoMeasurements)?;

    let mut points = fetch_with_fallback(source, begin, end)?;
    points.sort_by_key(|p| p.timestamp);
    info!(points = points.len(), %begin, %end, "fetched reference interval");

    let mut merged = Vec::with_capacity(measurements.len());
    let mut cursor = 0usize;
    let mut current: Option<&ReferencePoint> = None;
    let mut dropped = 0usize;

    for measurement in measurements {
        while cursor < points.len() && points[cursor].timestamp <= measurement.timestamp {
            current = Some(&points[cursor]);
            cursor += 1;
        }
        let point = match current {
            Some(point) => point,
            None => {
                dropped += 1;
                continue;
            }
        };
        let pileup = point.avg_pileup;
        if !pileup.is_finite() || pileup <= 0.0 {
            dropped += 1;
            continue;
        }
        let mut rate_n = [0.0; CHANNEL_COUNT];
        for (ch, slot) in rate_n.iter_mut().enumerate() {
            *slot = measurement.rate[ch] / pileup;
        }
        merged.push(MergedRecord {
            measurement: measurement.clone(),
            avg_pileup: pileup,
            rate_n,
        });
    }

    if dropped > 0 {
        warn!(dropped, "dropped measurements without a usable pileup match");
    }
    Ok(merged)
}

/// Queries the primary detector type, falling back to the alternate
/// exactly once when the primary interval is empty. Two empty results,
/// or any fetch failure, make the session's reference unavailable.
fn fetch_with_fallback(
    source: &dyn ReferenceSource,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<ReferencePoint>, AlignError> {
    let unavailable =
        |reason: String, source: Option<ReferenceError>| AlignError::ReferenceUnavailable {
            begin,
            end,
            reason,
            source,
        };
    let failed = |err: ReferenceError| {
        let reason = err.to_string();
        unavailable(reason, Some(err))
    };

    let points = source
        .fetch(begin, end, DetectorType::PRIMARY)
        .map_err(failed)?;
    if !points.is_empty() {
        return Ok(points);
    }

    warn!(
        primary = %DetectorType::PRIMARY,
        fallback = %DetectorType::FALLBACK,
        "primary detector returned no reference points; querying fallback"
    );
    let points = source
        .fetch(begin, end, DetectorType::FALLBACK)
        .map_err(failed)?;
    if points.is_empty() {
        return Err(unavailable(
            format!(
                "both {} and {} returned no points",
                DetectorType::PRIMARY,
                DetectorType::FALLBACK
            ),
            None,
        ));
    }
    Ok(points)
}
