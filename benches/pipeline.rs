//! Benchmarks for the decode → aggregate → record pipeline.
//!
//! The scan cycle benchmark drives the real scheduler with a scanner that
//! returns immediately, so only the processing of one window is measured.

use ble_sensor_exporter::scanner::ScanFuture;
use ble_sensor_exporter::{
    Advertisement, DeviceRegistry, GaugeRegistry, MacAddress, ScanStatus, Schedule, Scanner,
    Scheduler, StatusTracker, aggregate, decode, parse_device,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::collections::HashSet;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Temperature 21.50 °C, humidity 65.40 %, battery 85 %
fn full_payload() -> Vec<u8> {
    vec![
        0x40, // device info: BTHome v2, unencrypted
        0x02, 0x66, 0x08, // temperature: 2150 × 0.01
        0x03, 0x8C, 0x19, // humidity: 6540 × 0.01
        0x0A, 0x55, // battery: 85
    ]
}

/// Voltage-only payload behind a few skipped objects
fn voltage_payload() -> Vec<u8> {
    vec![
        0x44, // device info: trigger based
        0x00, 0x2A, // packet id
        0x10, 0x01, 0x00, 0x00, // 3-byte object
        0x0C, 0xBE, 0x0A, // voltage: 2750 mV
    ]
}

fn device_mac(i: u8) -> MacAddress {
    MacAddress([0xA4, 0xC1, 0x38, 0x00, 0x00, i])
}

/// `devices` sensors, each heard `per_device` times
fn window(devices: u8, per_device: usize) -> Vec<Advertisement> {
    (0..per_device)
        .flat_map(|_| {
            (0..devices).map(|i| Advertisement::new(device_mac(i).device_id(), full_payload()))
        })
        .collect()
}

fn registry(devices: u8) -> DeviceRegistry {
    let devices: Vec<_> = (0..devices)
        .map(|i| parse_device(&format!("{}=sensor_{i}", device_mac(i))).unwrap())
        .collect();
    DeviceRegistry::new(&devices)
}

/// Returns the same window without waiting.
struct InstantScanner {
    advertisements: Vec<Advertisement>,
}

impl Scanner for InstantScanner {
    fn scan(&self, _duration: Duration) -> ScanFuture<'_> {
        Box::pin(async move { Ok(self.advertisements.clone()) })
    }
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let full = full_payload();
    group.bench_function("full", |b| b.iter(|| black_box(decode(black_box(&full)))));

    let voltage = voltage_payload();
    group.bench_function("voltage_with_skips", |b| {
        b.iter(|| black_box(decode(black_box(&voltage))))
    });

    let truncated = &full[..3];
    group.bench_function("truncated", |b| {
        b.iter(|| black_box(decode(black_box(truncated))))
    });

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for devices in [1u8, 10, 50] {
        let advertisements = window(devices, 10);
        let known: HashSet<String> = (0..devices).map(|i| device_mac(i).device_id()).collect();

        group.throughput(Throughput::Elements(advertisements.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(devices),
            &advertisements,
            |b, advertisements| {
                b.iter(|| black_box(aggregate(black_box(advertisements), &known, |_| {})))
            },
        );
    }

    // Mostly traffic from devices nobody asked for
    let advertisements = window(50, 10);
    let known: HashSet<String> = HashSet::from([device_mac(0).device_id()]);
    group.bench_function("1_known_in_50", |b| {
        b.iter(|| black_box(aggregate(black_box(&advertisements), &known, |_| {})))
    });

    group.finish();
}

fn bench_scan_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_cycle");
    let rt = Runtime::new().unwrap();

    for devices in [1u8, 10, 50] {
        let scanner = InstantScanner {
            advertisements: window(devices, 10),
        };
        let registry = registry(devices);
        let gauges = GaugeRegistry::new();
        let status = StatusTracker::new(ScanStatus::new(30, 5));
        let scheduler = Scheduler::new(
            Schedule {
                interval: 30,
                duration: 5,
            },
            &scanner,
            &registry,
            &gauges,
            &status,
        );

        group.throughput(Throughput::Elements(u64::from(devices)));
        group.bench_function(BenchmarkId::from_parameter(devices), |b| {
            b.iter(|| {
                let seen = rt.block_on(scheduler.run_cycle()).unwrap();
                debug_assert_eq!(seen, usize::from(devices));
                black_box(seen)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_aggregate, bench_scan_cycle);
criterion_main!(benches);
