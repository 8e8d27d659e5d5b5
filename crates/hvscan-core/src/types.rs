use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hvscan_parser::{Measurement, CHANNEL_COUNT};

/// One lumisection-granularity sample from the external luminosity
/// source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub timestamp: DateTime<Utc>,
    pub delivered: f64,
    pub recorded: f64,
    pub avg_pileup: f64,
}

/// A measurement joined with the nearest-preceding reference point.
/// `rate_n[ch]` is the raw rate divided by the matched average pileup,
/// indexed by physical channel ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub measurement: Measurement,
    pub avg_pileup: f64,
    pub rate_n: [f64; CHANNEL_COUNT],
}

/// Robust statistics for one detected HV setpoint. Statistics are NaN
/// when the setpoint's filtered subset was empty or too small for a
/// sample standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanStep {
    pub hv: i64,
    pub median_rate: f64,
    pub stdev_rate: f64,
    pub median_rate_n: f64,
    pub stdev_rate_n: f64,
}

/// Per-channel depletion voltage result. `volts == 0` means no plateau
/// boundary was detected and is never a physical voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepletionVoltage {
    pub volts: i64,
    /// Spread of the median normalized rate over setpoints above the
    /// detected voltage; diagnostic only.
    pub plateau_rate_stdev: f64,
}

impl DepletionVoltage {
    pub const NOT_FOUND: i64 = 0;

    pub fn found(&self) -> bool {
        self.volts != Self::NOT_FOUND
    }
}

/// Complete analysis output for one (session, channel) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAnalysis {
    pub channel: usize,
    pub steps: Vec<ScanStep>,
    pub depletion: DepletionVoltage,
}
