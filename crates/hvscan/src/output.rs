//! File artifacts consumed downstream: per-channel step tables (the
//! data behind the rate-vs-HV plots) and the cumulative
//! depletion-voltage JSON keyed by log file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use hvscan_core::report::SessionReport;

/// Per-channel depletion voltages for the cumulative JSON; 0 stays in
/// the map as the "not found" sentinel for the trend consumer to drop.
pub fn channel_voltages(report: &SessionReport) -> BTreeMap<usize, i64> {
    report
        .channels
        .iter()
        .map(|ch| (ch.channel, ch.depletion_volts))
        .collect()
}

pub fn write_depletion_json(
    out: &Path,
    depletion: &BTreeMap<String, BTreeMap<usize, i64>>,
) -> Result<()> {
    fs::create_dir_all(out)
        .with_context(|| format!("failed to create {}", out.display()))?;
    let path = out.join("depletionVoltage.json");
    let json = serde_json::to_string_pretty(depletion)?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))
}

/// Writes one CSV per channel under `<out>/<date>/`, one row per
/// detected setpoint.
pub fn write_step_tables(out: &Path, report: &SessionReport) -> Result<()> {
    let session_dir = out.join(&report.session_date);
    fs::create_dir_all(&session_dir)
        .with_context(|| format!("failed to create {}", session_dir.display()))?;

    for channel in &report.channels {
        let path = session_dir.join(format!(
            "{}.ch{}.steps.csv",
            report.session_date, channel.channel
        ));
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        writer.write_record(["hv", "medianRate", "stdevRate", "medianRateN", "stdevRateN"])?;
        for step in &channel.steps {
            writer.write_record([
                step.hv.to_string(),
                step.median_rate.to_string(),
                step.stdev_rate.to_string(),
                step.median_rate_n.to_string(),
                step.stdev_rate_n.to_string(),
            ])?;
        }
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use hvscan_core::report::ChannelReport;
    use hvscan_core::types::ScanStep;

    fn report() -> SessionReport {
        let step = ScanStep {
            hv: 300,
            median_rate: 640.0,
            stdev_rate: 1.5,
            median_rate_n: 20.0,
            stdev_rate_n: 0.05,
        };
        SessionReport {
            session_date: "2021-06-01".to_string(),
            log_file: "Scan_2021_06_01.txt".to_string(),
            channels: (0..16)
                .map(|channel| ChannelReport {
                    channel,
                    depletion_volts: if channel == 3 { 0 } else { 300 },
                    plateau_rate_stdev: 0.01,
                    steps: vec![step],
                })
                .collect(),
        }
    }

    #[test]
    fn depletion_json_keeps_sentinel_zero() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let mut depletion = BTreeMap::new();
        depletion.insert("Scan_2021_06_01.txt".to_string(), channel_voltages(&report()));
        write_depletion_json(dir.path(), &depletion).expect("write failed");

        let json = fs::read_to_string(dir.path().join("depletionVoltage.json"))
            .expect("read failed");
        let parsed: BTreeMap<String, BTreeMap<usize, i64>> =
            serde_json::from_str(&json).expect("parse failed");
        let channels = &parsed["Scan_2021_06_01.txt"];
        assert_eq!(channels[&3], 0);
        assert_eq!(channels[&7], 300);
        assert_eq!(channels.len(), 16);
    }

    #[test]
    fn step_tables_land_under_the_session_date() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        write_step_tables(dir.path(), &report()).expect("write failed");

        let ch0 = fs::read_to_string(
            dir.path().join("2021-06-01").join("2021-06-01.ch0.steps.csv"),
        )
        .expect("read failed");
        assert!(ch0.starts_with("hv,medianRate,stdevRate,medianRateN,stdevRateN"));
        assert!(ch0.contains("300,640,1.5,20,0.05"));

        let ch15 = dir.path().join("2021-06-01").join("2021-06-01.ch15.steps.csv");
        assert!(ch15.exists());
    }
}
