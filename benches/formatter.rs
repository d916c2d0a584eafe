//! Benchmark suite for the Prometheus exposition formatter.
//!
//! Isolates rendering from the scan loop so the cost of producing one
//! exposition can be measured against the number of exported devices.

use ble_sensor_exporter::{
    ExpositionFormatter, GaugeRegistry, Measurements, MetricsSink, OutputFormatter, Quantity,
    ScanStatus,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

fn status() -> ScanStatus {
    ScanStatus {
        interval: 30,
        duration: 5,
        last_scan_timestamp: 1_716_480_000,
        devices_seen: 0,
    }
}

fn readings(i: usize) -> Measurements {
    [
        (Quantity::Temperature, 20.0 + i as f64 / 100.0),
        (Quantity::Humidity, 50.0 + i as f64 / 10.0),
        (Quantity::Battery, 85.0),
    ]
    .into_iter()
    .collect()
}

fn populated(devices: usize) -> GaugeRegistry {
    let gauges = GaugeRegistry::new();
    for i in 0..devices {
        gauges.record(&format!("sensor_{i}"), &readings(i));
    }
    gauges
}

/// Benchmark rendering against registry size
fn bench_format_devices(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_devices");
    let formatter = ExpositionFormatter::new();

    for devices in [0usize, 1, 10, 100] {
        let gauges = populated(devices);
        let status = ScanStatus {
            devices_seen: devices,
            ..status()
        };

        group.throughput(Throughput::Elements(devices.max(1) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(devices), &gauges, |b, gauges| {
            b.iter(|| {
                let output = formatter.format(black_box(gauges), black_box(&status));
                black_box(output)
            })
        });
    }

    group.finish();
}

/// Device names that need label escaping
fn bench_format_escaped_labels(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_escaped_labels");
    let formatter = ExpositionFormatter::new();

    let gauges = GaugeRegistry::new();
    for i in 0..10 {
        gauges.record(&format!("shed \"{i}\"\\north"), &readings(i));
    }
    let status = status();

    group.throughput(Throughput::Elements(10));
    group.bench_function("10_quoted", |b| {
        b.iter(|| {
            let output = formatter.format(black_box(&gauges), black_box(&status));
            black_box(output)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_format_devices, bench_format_escaped_labels);
criterion_main!(benches);
