//! Single-sensor diagnostics.
//!
//! Watches the advertisements of one MAC address, prints each decode attempt
//! as it happens and summarises the capture when the run ends. Meant for
//! finding out why a sensor never shows up in the exposition.

use crate::app::RunError;
use crate::bthome::decode;
use crate::mac_address::MacAddress;
use crate::measurement::Measurements;
use crate::scanner::{Advertisement, Scanner};
use chrono::{DateTime, Local};
use clap::Args;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Length of each scan while diagnosing, so captures are printed promptly.
pub const DIAGNOSE_WINDOW: Duration = Duration::from_secs(1);

const RULE: &str = "============================================================";

/// Options of the `diagnose` subcommand.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct DiagnoseOptions {
    /// Sensor to watch, e.g. A4:C1:38:B6:36:7A
    #[arg(long, value_name = "MAC")]
    pub mac: MacAddress,

    /// Stop after this many seconds instead of running until interrupted
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub duration: Option<u64>,

    /// Save the capture as JSON, to PATH or to a generated file name
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    pub json: Option<Option<PathBuf>>,

    /// Only print where the JSON report was saved
    #[arg(short, long)]
    pub quiet: bool,
}

/// Result of decoding one captured payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParseOutcome {
    Success { measurements: Measurements },
    Failed { error: String },
}

impl ParseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ParseOutcome::Success { .. })
    }
}

/// One advertisement heard from the watched sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capture {
    pub timestamp: DateTime<Local>,
    pub rssi: Option<i16>,
    /// Service data payload as lower-case hex
    pub payload: String,
    pub result: ParseOutcome,
}

impl fmt::Display for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f"))?;
        match self.rssi {
            Some(rssi) => writeln!(f, " RSSI: {rssi} dBm")?,
            None => writeln!(f, " RSSI: unknown")?,
        }
        writeln!(f, "  Payload (hex): {}", self.payload)?;
        match &self.result {
            ParseOutcome::Success { measurements } => {
                write!(f, "  BTHome parse: SUCCESS")?;
                for (quantity, value) in measurements.iter() {
                    write!(f, "\n    - {quantity}: {value}{}", quantity.unit())?;
                }
                Ok(())
            }
            ParseOutcome::Failed { error } => write!(f, "  BTHome parse: FAILED - {error}"),
        }
    }
}

/// Summary over all captures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_advertisements: usize,
    pub successful_parses: usize,
    pub failed_parses: usize,
    /// Fraction of captures that decoded, rounded to two decimals
    pub parse_success_rate: f64,
    /// Mean RSSI in dBm over captures that carry one, rounded to one decimal
    pub average_rssi: Option<f64>,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{RULE}\nSTATISTICS\n{RULE}")?;
        writeln!(f, "Total advertisements: {}", self.total_advertisements)?;
        writeln!(f, "Successful parses: {}", self.successful_parses)?;
        writeln!(f, "Failed parses: {}", self.failed_parses)?;
        writeln!(
            f,
            "Parse success rate: {:.1}%",
            self.parse_success_rate * 100.0
        )?;
        match self.average_rssi {
            Some(rssi) => write!(f, "Average RSSI: {rssi:.1} dBm"),
            None => write!(f, "Average RSSI: unknown"),
        }
    }
}

/// JSON document written by `--json`.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub mac_address: String,
    pub scan_start: Option<DateTime<Local>>,
    pub scan_end: Option<DateTime<Local>>,
    pub advertisements: &'a [Capture],
    pub statistics: Statistics,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Captures of a single sensor.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    mac: MacAddress,
    id: String,
    captures: Vec<Capture>,
}

impl Diagnostics {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            id: mac.device_id(),
            captures: Vec::new(),
        }
    }

    /// Decode and keep `adv` if it came from the watched sensor.
    pub fn record(&mut self, adv: &Advertisement, at: DateTime<Local>) -> Option<&Capture> {
        if adv.id != self.id {
            return None;
        }

        let result = match decode(&adv.payload) {
            Ok(measurements) => ParseOutcome::Success { measurements },
            Err(e) => ParseOutcome::Failed {
                error: e.to_string(),
            },
        };
        self.captures.push(Capture {
            timestamp: at,
            rssi: adv.rssi,
            payload: hex::encode(&adv.payload),
            result,
        });
        self.captures.last()
    }

    pub fn captures(&self) -> &[Capture] {
        &self.captures
    }

    pub fn statistics(&self) -> Statistics {
        let total = self.captures.len();
        let successful = self
            .captures
            .iter()
            .filter(|c| c.result.is_success())
            .count();
        let rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64
        };

        let rssi: Vec<f64> = self
            .captures
            .iter()
            .filter_map(|c| c.rssi)
            .map(f64::from)
            .collect();
        let average_rssi =
            (!rssi.is_empty()).then(|| round_to(rssi.iter().sum::<f64>() / rssi.len() as f64, 1));

        Statistics {
            total_advertisements: total,
            successful_parses: successful,
            failed_parses: total - successful,
            parse_success_rate: round_to(rate, 2),
            average_rssi,
        }
    }

    pub fn report(&self) -> Report<'_> {
        Report {
            mac_address: self.id.clone(),
            scan_start: self.captures.first().map(|c| c.timestamp),
            scan_end: self.captures.last().map(|c| c.timestamp),
            advertisements: &self.captures,
            statistics: self.statistics(),
        }
    }

    /// Write the JSON report to `path`, or to [`default_json_path`] when `None`.
    pub fn save_json(&self, path: Option<PathBuf>) -> io::Result<PathBuf> {
        let path = path.unwrap_or_else(|| default_json_path(self.mac, Local::now()));
        let json = serde_json::to_string_pretty(&self.report()).map_err(io::Error::from)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

/// `ble_diagnostics_<MAC without colons>_<YYYYMMDD_HHMMSS>.json`
pub fn default_json_path(mac: MacAddress, now: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!(
        "ble_diagnostics_{}_{}.json",
        mac.device_id().replace(':', ""),
        now.format("%Y%m%d_%H%M%S")
    ))
}

/// Watch one sensor until the duration elapses or `cancel` fires.
///
/// Scans run in [`DIAGNOSE_WINDOW`] slices. A window interrupted by `cancel` is
/// discarded. Scan failures end the run.
pub async fn run_diagnostics(
    options: &DiagnoseOptions,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    cancel: CancellationToken,
) -> Result<Diagnostics, RunError> {
    let mut diagnostics = Diagnostics::new(options.mac);

    if !options.quiet {
        writeln!(out, "Monitoring MAC: {}", options.mac)?;
        match options.duration {
            Some(secs) => writeln!(out, "Duration: {secs} seconds")?,
            None => writeln!(out, "Duration: Continuous (Ctrl+C to stop)")?,
        }
        writeln!(out, "{RULE}")?;
        out.flush()?;
    }

    let deadline = options
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    info!(mac = %options.mac, "starting diagnostics");

    loop {
        let window = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                left.min(DIAGNOSE_WINDOW)
            }
            None => DIAGNOSE_WINDOW,
        };

        let advertisements = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = scanner.scan(window) => result?,
        };

        let now = Local::now();
        for adv in &advertisements {
            if let Some(capture) = diagnostics.record(adv, now)
                && !options.quiet
            {
                writeln!(out, "\n{capture}")?;
            }
        }
        out.flush()?;
        debug!(
            heard = advertisements.len(),
            captured = diagnostics.captures().len(),
            "diagnostics window complete"
        );
    }

    if !options.quiet {
        writeln!(out, "\n{}", diagnostics.statistics())?;
    }

    if let Some(path) = &options.json {
        let saved = diagnostics.save_json(path.clone())?;
        writeln!(out, "\nResults saved to: {}", saved.display())?;
    }
    out.flush()?;

    Ok(diagnostics)
}
