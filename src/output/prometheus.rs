//! Prometheus text exposition formatter.

use crate::metrics::{Gauge, GaugeRegistry};
use crate::output::OutputFormatter;
use crate::status::ScanStatus;
use std::collections::BTreeMap;
use std::fmt;

/// Sample value, rendered with Prometheus' spelling of the special floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleValue(pub f64);

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let v = self.0;
        if v.is_nan() {
            write!(f, "NaN")
        } else if v.is_infinite() {
            write!(f, "{}Inf", if v > 0.0 { "+" } else { "-" })
        } else {
            write!(f, "{v}")
        }
    }
}

/// One sample line: label set and value
#[derive(Debug)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    pub value: SampleValue,
}

/// A gauge family with its samples
#[derive(Debug)]
pub struct MetricFamily {
    pub name: &'static str,
    pub help: &'static str,
    pub samples: Vec<Sample>,
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn fmt_labels(sample: &Sample, fmt: &mut fmt::Formatter) -> fmt::Result {
    if sample.labels.is_empty() {
        return Ok(());
    }
    write!(fmt, "{{")?;
    let mut first = true;
    for (key, value) in sample.labels.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}=\"{}\"", key, escape_label_value(value))?;
    }
    write!(fmt, "}}")
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(fmt, "# HELP {} {}", self.name, self.help)?;
        writeln!(fmt, "# TYPE {} gauge", self.name)?;
        for sample in &self.samples {
            write!(fmt, "{}", self.name)?;
            fmt_labels(sample, fmt)?;
            writeln!(fmt, " {}", sample.value)?;
        }
        Ok(())
    }
}

/// Renders device gauges labelled by `device`, followed by the exporter's
/// own scan status gauges.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpositionFormatter;

impl ExpositionFormatter {
    pub fn new() -> Self {
        Self
    }

    fn device_families(&self, gauges: &GaugeRegistry) -> Vec<MetricFamily> {
        let snapshot = gauges.snapshot();
        Gauge::ALL
            .iter()
            .filter_map(|gauge| {
                let values = snapshot.get(gauge).filter(|v| !v.is_empty())?;
                Some(MetricFamily {
                    name: gauge.name(),
                    help: gauge.help(),
                    samples: values
                        .iter()
                        .map(|(device, value)| Sample {
                            labels: BTreeMap::from([("device".to_string(), device.clone())]),
                            value: SampleValue(*value),
                        })
                        .collect(),
                })
            })
            .collect()
    }

    fn status_families(&self, status: &ScanStatus) -> Vec<MetricFamily> {
        let unlabelled = |name, help, value: f64| MetricFamily {
            name,
            help,
            samples: vec![Sample {
                labels: BTreeMap::new(),
                value: SampleValue(value),
            }],
        };

        vec![
            unlabelled(
                "ble_exporter_scan_interval_seconds",
                "Configured time between scan starts",
                status.interval as f64,
            ),
            unlabelled(
                "ble_exporter_scan_duration_seconds",
                "Configured length of each scan window",
                status.duration as f64,
            ),
            unlabelled(
                "ble_exporter_last_scan_timestamp_seconds",
                "Unix timestamp of the last completed scan, 0 before the first",
                status.last_scan_timestamp as f64,
            ),
            unlabelled(
                "ble_exporter_devices_seen",
                "Known devices reported in the last completed scan",
                status.devices_seen as f64,
            ),
        ]
    }
}

impl OutputFormatter for ExpositionFormatter {
    fn format(&self, gauges: &GaugeRegistry, status: &ScanStatus) -> String {
        self.device_families(gauges)
            .into_iter()
            .chain(self.status_families(status))
            .map(|family| family.to_string())
            .collect()
    }
}
