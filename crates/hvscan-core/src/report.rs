use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use hvscan_parser::{parse_scan_log, ParserError, CHANNEL_COUNT};

use crate::align::{self, AlignError};
use crate::analysis::{analyze_channel, AnalyzerConfig};
use crate::reference::ReferenceSource;
use crate::types::{ChannelAnalysis, ScanStep};

/// Session-scoped fail-fast errors. Analysis-time "not found"
/// conditions are data results, never errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("log ingest failed: {0}")]
    Parse(#[from] ParserError),

    #[error("reference alignment failed: {0}")]
    Align(#[from] AlignError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub channel: usize,
    /// 0 means no plateau boundary was found.
    pub depletion_volts: i64,
    pub plateau_rate_stdev: f64,
    pub steps: Vec<ScanStep>,
}

impl From<ChannelAnalysis> for ChannelReport {
    fn from(analysis: ChannelAnalysis) -> Self {
        Self {
            channel: analysis.channel,
            depletion_volts: analysis.depletion.volts,
            plateau_rate_stdev: analysis.depletion.plateau_rate_stdev,
            steps: analysis.steps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    /// Date of the first record, `YYYY-MM-DD` (UTC); used to key
    /// downstream artifacts.
    pub session_date: String,
    pub log_file: String,
    pub channels: Vec<ChannelReport>,
}

/// Runs the full ingest → align → analyze pipeline for one scan
/// session over all 16 channels. Either every channel is reported or
/// the session fails as a whole.
pub fn run_session(
    log_file: &str,
    content: &str,
    zone: Tz,
    source: &dyn ReferenceSource,
    cfg: &AnalyzerConfig,
) -> Result<SessionReport, SessionError> {
    let measurements = parse_scan_log(content, zone)?;
    info!(log_file, records = measurements.len(), "ingested scan log");

    let merged = align::align(&measurements, source)?;

    let session_date = measurements
        .first()
        .map(|m| m.timestamp.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    let channels = (0..CHANNEL_COUNT)
        .map(|channel| ChannelReport::from(analyze_channel(&merged, channel, cfg)))
        .collect();

    Ok(SessionReport {
        session_date,
        log_file: log_file.to_string(),
        channels,
    })
}
