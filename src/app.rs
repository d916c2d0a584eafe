//! Core application runner for `ble-sensor-exporter`.
//!
//! Kept apart from process setup (logging, signals, exit codes) so the whole
//! scan → aggregate → export pipeline can be driven by a fixture scanner in tests.

use crate::diagnose::{DiagnoseOptions, run_diagnostics};
use crate::metrics::GaugeRegistry;
use crate::output::OutputFormatter;
use crate::output::prometheus::ExpositionFormatter;
use crate::registry::{Device, DeviceRegistry};
use crate::scanner::{self, Advertisement, Backend, ScanError, Scanner};
use crate::scheduler::{Schedule, Scheduler};
use crate::status::{ScanStatus, StatusTracker};
use clap::{Parser, Subcommand};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Command line configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Seconds from the start of one scan to the start of the next
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    pub interval: u64,

    /// Length of each scan window in seconds
    #[arg(long, default_value_t = 5, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub duration: u64,

    /// Sensor to export, with the name used as its `device` label.
    /// Format: --device A4:C1:38:11:22:33=living_room
    #[arg(long = "device", value_parser = crate::registry::parse_device, value_name = "MAC=NAME")]
    pub devices: Vec<Device>,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Advertisement replayed every window by the fixture backend.
    /// Format: --fixture A4:C1:38:11:22:33=40020a08
    #[arg(long = "fixture", value_parser = crate::scanner::parse_fixture, value_name = "MAC=HEX")]
    pub fixtures: Vec<Advertisement>,

    /// Write the exposition to this file (atomically) instead of stdout
    #[arg(long, value_name = "PATH")]
    pub textfile: Option<PathBuf>,

    /// Verbose output, log per-device updates
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Modes other than exporting.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Watch one sensor and show every decode attempt
    Diagnose(DiagnoseOptions),
}

impl Options {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            interval: self.interval,
            duration: self.duration,
        }
    }

    /// Build the scanner selected by `--backend`.
    pub fn scanner(&self) -> Result<Box<dyn Scanner>, ScanError> {
        match self.backend {
            Backend::Fixture if self.fixtures.is_empty() => Err(ScanError::InvalidFixture(
                "the fixture backend needs at least one --fixture entry".to_string(),
            )),
            Backend::Fixture => Ok(scanner::for_backend(self.backend, self.fixtures.clone())),
            backend => {
                if !self.fixtures.is_empty() {
                    warn!(%backend, "--fixture entries are ignored by this backend");
                }
                Ok(scanner::for_backend(backend, Vec::new()))
            }
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Replace `path` with `contents` so readers never see a partial file.
fn write_textfile(path: &Path, contents: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

fn publish(contents: &str, textfile: Option<&Path>, out: &mut dyn Write) -> io::Result<()> {
    match textfile {
        Some(path) => write_textfile(path, contents),
        None => {
            out.write_all(contents.as_bytes())?;
            out.flush()
        }
    }
}

/// Run the exporter, or the selected subcommand, until `cancel` fires.
pub async fn run(options: Options, cancel: CancellationToken) -> Result<(), RunError> {
    let scanner = options.scanner()?;
    info!(backend = %options.backend, "using scanner backend");
    match &options.command {
        Some(Command::Diagnose(diagnose)) => {
            run_diagnostics(diagnose, scanner.as_ref(), &mut io::stdout(), cancel).await?;
            Ok(())
        }
        None => run_with_io(options, scanner.as_ref(), &mut io::stdout(), cancel).await,
    }
}

/// Run the scan loop and render the exposition after every completed window.
///
/// Output goes to `out` unless `options.textfile` is set. A textfile that cannot
/// be written is logged and written again after the next window. A failure
/// writing to `out` stops the scan loop and is returned; cancellation returns
/// `Ok(())`.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    cancel: CancellationToken,
) -> Result<(), RunError> {
    let registry = DeviceRegistry::new(&options.devices);
    if registry.is_empty() {
        warn!("no devices configured with --device, all advertisements will be ignored");
    }
    for (id, name) in registry.iter() {
        debug!(%id, device = name, "registered device");
    }

    let gauges = GaugeRegistry::new();
    let status = StatusTracker::new(ScanStatus::new(options.interval, options.duration));
    let scheduler = Scheduler::new(options.schedule(), scanner, &registry, &gauges, &status);
    let formatter = ExpositionFormatter::new();
    let textfile = options.textfile.as_deref();

    // stopped by the exporter when `out` fails, and by the caller's token
    let scan_cancel = cancel.child_token();
    let mut updates = status.subscribe();

    let exporter = async {
        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                changed = updates.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
            }

            let snapshot = *updates.borrow_and_update();
            let exposition = formatter.format(&gauges, &snapshot);
            match (publish(&exposition, textfile, out), textfile) {
                (Ok(()), _) => {}
                (Err(e), Some(path)) => {
                    error!(path = %path.display(), "failed to write textfile: {e}");
                    continue;
                }
                (Err(e), None) => break Err(RunError::Io(e)),
            }
            debug!(devices_seen = snapshot.devices_seen, "exposition written");
        };
        scan_cancel.cancel();
        result
    };

    info!(
        interval = options.interval,
        duration = options.duration,
        devices = registry.len(),
        "starting exporter"
    );
    let ((), result) = tokio::join!(scheduler.run(scan_cancel.clone()), exporter);
    result
}
