//! Benchmarks for the layout resolver and the full engine path
//!
//! Compares raw layout interpretation against a complete decode
//! (registry lookup, resolver, normalizer) for the built-in families.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mioty_payload::layout::{families, resolve};
use mioty_payload::{DecodeContext, DecoderRegistry, Engine, EngineConfig};
use std::sync::Arc;
use std::time::Duration;

/// Febris v1.3, all feature bits set, one FIFO entry
const FEBRIS_FULL: &[u8] = &[
    0x11, 0x37, 0x05, 0x0C, 0x1C, 0x04, 0xBF, 0x2D, 0x03, 0xF5, 0x01, 0xF4, 0x00, 0x01, 0x00,
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x04, 0x4C, 0x04, 0xBF, 0x04, 0xBF, 0x32,
];

/// Energy meter v2, export register and electrical values
const ENERGY_V2: &[u8] = &[
    0x32, 0x03, 0x10, 0x27, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x4E, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0xE8, 0x03, 0x00, 0x00, 0xFC, 0x08, 0xA0, 0x0F, 0x88, 0x13,
];

fn bench_resolver(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_resolve");
    group.measurement_time(Duration::from_secs(5));

    let cases = [
        ("febris_th", FEBRIS_FULL),
        ("energy_meter", ENERGY_V2),
    ];

    for (name, payload) in cases {
        let layout = families::family(name).expect("built-in family");
        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), payload, |b, payload| {
            b.iter(|| resolve(black_box(layout), black_box(payload), 1))
        });
    }

    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let registry = Arc::new(DecoderRegistry::with_builtin_families().expect("built-in families"));
    registry.assign("FEBRIS", "febris_th").expect("assign");
    let engine = Engine::new(registry, EngineConfig::default());
    let context = DecodeContext::new(1, "FEBRIS");
    let unknown = DecodeContext::new(1, "UNKNOWN");

    let mut group = c.benchmark_group("engine_decode");
    group.bench_function("febris_th", |b| {
        b.iter(|| engine.decode(black_box(FEBRIS_FULL), &context))
    });
    group.bench_function("passthrough", |b| {
        b.iter(|| engine.decode(black_box(FEBRIS_FULL), &unknown))
    });
    group.finish();
}

criterion_group!(benches, bench_resolver, bench_engine);
criterion_main!(benches);
