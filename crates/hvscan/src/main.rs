use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hvscan_core::analysis::AnalyzerConfig;
use hvscan_core::reference::{BrilcalcSource, ReferenceSource};
use hvscan_core::report::{run_session, SessionReport};
use hvscan_core::types::DepletionVoltage;

mod output;

/// Depletion-voltage extraction from auto-HV-scan logs.
#[derive(Parser, Debug)]
#[command(author, version, about = "Depletion-voltage extraction from HV scan logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze every scan log in a directory, one session per file
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Directory containing scan log files (*.txt)
    #[arg(long, default_value = "scanLogs")]
    dir: PathBuf,

    /// Output directory for step tables and the depletion-voltage JSON
    #[arg(long, default_value = "output")]
    out: PathBuf,

    /// IANA time zone the logger writes timestamps in
    #[arg(long, default_value = "Europe/Amsterdam")]
    timezone: String,

    /// One-step percent-change threshold for the plateau boundary
    #[arg(long, default_value_t = 0.01)]
    thr1: f64,

    /// Two-step percent-change threshold for the plateau boundary
    #[arg(long, default_value_t = 0.02)]
    thr2: f64,

    /// Samples a rounded-voltage group must exceed to count as a setpoint
    #[arg(long, default_value_t = 4)]
    min_step_samples: usize,

    /// Wall-clock timeout for each brilcalc invocation, seconds
    #[arg(long, default_value_t = 120)]
    fetch_timeout_secs: u64,

    /// brilcalc executable to invoke for reference data
    #[arg(long, default_value = "brilcalc")]
    brilcalc: String,

    /// Skip printing per-session summary tables
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => analyze(args),
    }
}

fn analyze(args: AnalyzeArgs) -> Result<()> {
    let zone: Tz = args
        .timezone
        .parse()
        .map_err(|err| anyhow!("invalid time zone '{}': {err}", args.timezone))?;
    let cfg = AnalyzerConfig {
        min_step_samples: args.min_step_samples,
        thr1: args.thr1,
        thr2: args.thr2,
        ..AnalyzerConfig::default()
    };
    let source = BrilcalcSource::new(
        args.brilcalc.clone(),
        Duration::from_secs(args.fetch_timeout_secs),
    );

    let pattern = args.dir.join("*.txt");
    let pattern = pattern
        .to_str()
        .context("log directory path is not valid UTF-8")?;
    let mut paths: Vec<PathBuf> = glob::glob(pattern)?.filter_map(Result::ok).collect();
    paths.sort();
    if paths.is_empty() {
        bail!("no scan logs matched {pattern}");
    }

    let mut depletion: BTreeMap<String, BTreeMap<usize, i64>> = BTreeMap::new();
    let mut failures = 0usize;
    for path in &paths {
        info!(path = %path.display(), "processing scan log");
        match analyze_log(path, zone, &source, &cfg, &args) {
            Ok(report) => {
                depletion.insert(report.log_file.clone(), output::channel_voltages(&report));
            }
            Err(err) => {
                // sessions are independent; keep going and report at the end
                error!(path = %path.display(), "session failed: {err:#}");
                failures += 1;
            }
        }
    }

    output::write_depletion_json(&args.out, &depletion)?;
    if failures > 0 {
        bail!("{failures} of {} sessions failed", paths.len());
    }
    Ok(())
}

fn analyze_log(
    path: &Path,
    zone: Tz,
    source: &dyn ReferenceSource,
    cfg: &AnalyzerConfig,
    args: &AnalyzeArgs,
) -> Result<SessionReport> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let report = run_session(name, &content, zone, source, cfg)?;
    if !args.quiet {
        print_summary(&report);
    }
    output::write_step_tables(&args.out, &report)?;
    Ok(report)
}

fn print_summary(report: &SessionReport) {
    let mut table = Table::new();
    table.set_header(vec![
        "ch",
        "depletion (V)",
        "plateau stdev",
        "setpoints (V)",
    ]);
    for channel in &report.channels {
        let volts = if channel.depletion_volts == DepletionVoltage::NOT_FOUND {
            "not found".to_string()
        } else {
            channel.depletion_volts.to_string()
        };
        table.add_row(vec![
            channel.channel.to_string(),
            volts,
            format!("{:.5}", channel.plateau_rate_stdev),
            channel
                .steps
                .iter()
                .map(|s| s.hv.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        ]);
    }
    println!("{} ({})", report.log_file, report.session_date);
    println!("{table}");
}
