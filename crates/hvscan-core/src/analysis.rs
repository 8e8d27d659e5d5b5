use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::stats::{median, sample_stdev};
use crate::types::{ChannelAnalysis, DepletionVoltage, MergedRecord, ScanStep};

/// Tunables for setpoint detection and plateau location. The defaults
/// are the analysis contract; they exist as parameters for reprocessing
/// studies, not for routine use.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzerConfig {
    /// A rounded-voltage group must have strictly more members than
    /// this to count as a genuine setpoint (rejects ramp transients).
    pub min_step_samples: usize,
    /// Half-width of the voltage window around each setpoint, volts.
    pub band_volts: f64,
    /// Relative deviation from the step's final normalized rate still
    /// considered settled.
    pub settle_tolerance: f64,
    /// One-step percent-change threshold for the plateau boundary.
    pub thr1: f64,
    /// Two-step percent-change threshold for the plateau boundary.
    pub thr2: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_step_samples: 4,
            band_volts: 2.0,
            settle_tolerance: 0.05,
            thr1: 0.01,
            thr2: 0.02,
        }
    }
}

/// Analyzes one channel of a session's merged records. Pure function of
/// its inputs; rerunning it on the same slice yields identical output.
pub fn analyze_channel(
    records: &[MergedRecord],
    channel: usize,
    cfg: &AnalyzerConfig,
) -> ChannelAnalysis {
    let steps = scan_steps(records, channel, cfg);
    if steps.is_empty() {
        info!(channel, "no qualifying setpoint groups");
    }
    let depletion = depletion_voltage(&steps, cfg);
    if !depletion.found() {
        info!(channel, "no plateau boundary found");
    }
    debug!(
        channel,
        steps = steps.len(),
        volts = depletion.volts,
        "channel analysis complete"
    );
    ChannelAnalysis {
        channel,
        steps,
        depletion,
    }
}

/// Detects the scan's HV setpoints for `channel` and summarizes each.
///
/// Records are grouped by integer-rounded voltage (ties at .5 round to
/// even); groups with more than `min_step_samples` members survive, in
/// ascending voltage order.
pub fn scan_steps(records: &[MergedRecord], channel: usize, cfg: &AnalyzerConfig) -> Vec<ScanStep> {
    let mut groups: BTreeMap<i64, usize> = BTreeMap::new();
    for record in records {
        let v = record.measurement.v_mon[channel];
        if !v.is_finite() {
            continue;
        }
        *groups.entry(v.round_ties_even() as i64).or_insert(0) += 1;
    }

    groups
        .into_iter()
        .filter(|&(_, count)| count > cfg.min_step_samples)
        .map(|(hv, _)| build_step(records, channel, hv, cfg))
        .collect()
}

/// Summarizes one setpoint: restrict to the ±band window around `hv`,
/// then to records whose normalized rate sits within the settle
/// tolerance of the window's final (time-ordered) sample, and take
/// median/stdev over what remains. An empty subset yields NaN
/// statistics; the step stays in the sequence.
fn build_step(records: &[MergedRecord], channel: usize, hv: i64, cfg: &AnalyzerConfig) -> ScanStep {
    let hv_f = hv as f64;
    let in_band: Vec<&MergedRecord> = records
        .iter()
        .filter(|r| {
            let v = r.measurement.v_mon[channel];
            v >= hv_f - cfg.band_volts && v <= hv_f + cfg.band_volts
        })
        .collect();

    let settled: Vec<&MergedRecord> = match in_band.last() {
        Some(last) => {
            let last_rate_n = last.rate_n[channel];
            in_band
                .iter()
                .copied()
                .filter(|r| (r.rate_n[channel] / last_rate_n - 1.0).abs() < cfg.settle_tolerance)
                .collect()
        }
        None => Vec::new(),
    };

    let rate: Vec<f64> = settled
        .iter()
        .map(|r| r.measurement.rate[channel])
        .collect();
    let rate_n: Vec<f64> = settled.iter().map(|r| r.rate_n[channel]).collect();

    ScanStep {
        hv,
        median_rate: median(&rate),
        stdev_rate: sample_stdev(&rate),
        median_rate_n: median(&rate_n),
        stdev_rate_n: sample_stdev(&rate_n),
    }
}

/// Locates the depletion voltage: scanning from the highest setpoint
/// downward, the first step whose median normalized rate differs by
/// more than `thr1` from the previous step and `thr2` from the step two
/// back. No match yields the sentinel 0.
///
/// Known limitation: noise above both thresholds at the very highest
/// setpoints triggers an early boundary. The first-match scan is kept
/// for compatibility with previously reported voltages.
pub fn depletion_voltage(steps: &[ScanStep], cfg: &AnalyzerConfig) -> DepletionVoltage {
    let descending: Vec<&ScanStep> = steps.iter().rev().collect();

    let mut volts = DepletionVoltage::NOT_FOUND;
    for i in 0..descending.len() {
        let pct_p1 = percent_change(&descending, i, 1);
        let pct_p2 = percent_change(&descending, i, 2);
        // NaN comparisons are false, so undefined changes never match
        if pct_p1 > cfg.thr1 && pct_p2 > cfg.thr2 {
            volts = descending[i].hv;
            break;
        }
    }

    let plateau: Vec<f64> = descending
        .iter()
        .filter(|s| s.hv > volts)
        .map(|s| s.median_rate_n)
        .collect();

    DepletionVoltage {
        volts,
        plateau_rate_stdev: sample_stdev(&plateau),
    }
}

fn percent_change(descending: &[&ScanStep], i: usize, period: usize) -> f64 {
    if i < period {
        return f64::NAN;
    }
    (descending[i].median_rate_n / descending[i - period].median_rate_n - 1.0).abs()
}
