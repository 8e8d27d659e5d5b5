use std::fmt;
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, LocalResult, TimeZone, Utc};
use thiserror::Error;
use tracing::debug;

use crate::types::ReferencePoint;

/// Luminometer types recognized by the reference source. `Hfet` is the
/// primary; `Bcm1f` is queried only as fallback when the primary
/// returns no points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorType {
    Hfet,
    Bcm1f,
}

impl DetectorType {
    pub const PRIMARY: DetectorType = DetectorType::Hfet;
    pub const FALLBACK: DetectorType = DetectorType::Bcm1f;

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorType::Hfet => "hfet",
            DetectorType::Bcm1f => "bcm1f",
        }
    }
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("failed to run '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}: {stderr}")]
    Command {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("'{command}' did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("malformed reference data: {0}")]
    Malformed(String),
}

/// Source of luminosity/pileup reference data for a closed time
/// interval. The production implementation shells out to `brilcalc`;
/// tests inject canned implementations.
pub trait ReferenceSource {
    fn fetch(
        &self,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
        detector: DetectorType,
    ) -> Result<Vec<ReferencePoint>, ReferenceError>;
}

/// Timestamp format `brilcalc --begin/--end` accepts.
const BRILCALC_TIMESTAMP_FORMAT: &str = "%m/%d/%y %H:%M:%S";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// [`ReferenceSource`] backed by the `brilcalc` command-line client,
/// queried per-lumisection with epoch-second timestamps.
pub struct BrilcalcSource {
    binary: String,
    timeout: Duration,
}

impl Default for BrilcalcSource {
    fn default() -> Self {
        Self::new("brilcalc", DEFAULT_TIMEOUT)
    }
}

impl BrilcalcSource {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Runs the child to completion under a wall-clock deadline. On
    /// expiry the child is killed and the fetch reports a timeout.
    fn run(&self, args: &[String]) -> Result<String, ReferenceError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!(%command, "invoking reference fetch");

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ReferenceError::Io {
                command: command.clone(),
                source,
            })?;

        let stdout_rx = drain_pipe(child.stdout.take());
        let stderr_rx = drain_pipe(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    return Err(ReferenceError::Io {
                        command: command.clone(),
                        source,
                    })
                }
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ReferenceError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
            thread::sleep(Duration::from_millis(50));
        };

        let stdout = stdout_rx.recv().unwrap_or_default();
        let stderr = stderr_rx.recv().unwrap_or_default();

        if !status.success() {
            return Err(ReferenceError::Command {
                command,
                status,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut reader) = pipe {
        thread::spawn(move || {
            let mut buffer = String::new();
            let _ = reader.read_to_string(&mut buffer);
            let _ = tx.send(buffer);
        });
    }
    rx
}

impl ReferenceSource for BrilcalcSource {
    fn fetch(
        &self,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
        detector: DetectorType,
    ) -> Result<Vec<ReferencePoint>, ReferenceError> {
        let args = vec![
            "lumi".to_string(),
            "--begin".to_string(),
            begin.format(BRILCALC_TIMESTAMP_FORMAT).to_string(),
            "--end".to_string(),
            end.format(BRILCALC_TIMESTAMP_FORMAT).to_string(),
            "--byls".to_string(),
            "--tssec".to_string(),
            "--type".to_string(),
            detector.as_str().to_string(),
            "--output-style".to_string(),
            "csv".to_string(),
        ];
        let stdout = self.run(&args)?;
        parse_brilcalc_csv(&stdout)
    }
}

/// Parses `brilcalc lumi --output-style csv` output: line 0 is the
/// norm-tag banner, line 1 the column headers, the last 4 lines a
/// summary block. Column positions are resolved from the header row.
pub fn parse_brilcalc_csv(output: &str) -> Result<Vec<ReferencePoint>, ReferenceError> {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() < 2 {
        return Ok(Vec::new());
    }

    let header: Vec<&str> = lines[1].split(',').map(str::trim).collect();
    let time_idx = column_index(&header, "time")?;
    let delivered_idx = column_index(&header, "delivered(/ub)")?;
    let recorded_idx = column_index(&header, "recorded(/ub)")?;
    let avgpu_idx = column_index(&header, "avgpu")?;

    let data_rows = if lines.len() > 6 {
        &lines[2..lines.len() - 4]
    } else {
        &[][..]
    };

    let joined = data_rows.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(joined.as_bytes());

    let mut points = Vec::with_capacity(data_rows.len());
    for record in reader.records() {
        let record =
            record.map_err(|err| ReferenceError::Malformed(format!("bad CSV row: {err}")))?;
        let seconds = field(&record, time_idx, "time")?
            .parse::<i64>()
            .map_err(|err| ReferenceError::Malformed(format!("bad epoch seconds: {err}")))?;
        let timestamp = match Utc.timestamp_opt(seconds, 0) {
            LocalResult::Single(ts) => ts,
            _ => {
                return Err(ReferenceError::Malformed(format!(
                    "epoch seconds {seconds} out of range"
                )))
            }
        };
        points.push(ReferencePoint {
            timestamp,
            delivered: parse_field_f64(&record, delivered_idx, "delivered(/ub)")?,
            recorded: parse_field_f64(&record, recorded_idx, "recorded(/ub)")?,
            avg_pileup: parse_field_f64(&record, avgpu_idx, "avgpu")?,
        });
    }
    Ok(points)
}

fn column_index(header: &[&str], name: &str) -> Result<usize, ReferenceError> {
    header
        .iter()
        .position(|col| *col == name)
        .ok_or_else(|| ReferenceError::Malformed(format!("missing column '{name}' in header")))
}

fn field<'a>(
    record: &'a csv::StringRecord,
    idx: usize,
    name: &str,
) -> Result<&'a str, ReferenceError> {
    record
        .get(idx)
        .ok_or_else(|| ReferenceError::Malformed(format!("row too short for column '{name}'")))
}

fn parse_field_f64(
    record: &csv::StringRecord,
    idx: usize,
    name: &str,
) -> Result<f64, ReferenceError> {
    field(record, idx, name)?
        .trim()
        .parse::<f64>()
        .map_err(|err| ReferenceError::Malformed(format!("bad float in column '{name}': {err}")))
}
