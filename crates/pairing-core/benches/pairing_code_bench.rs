//! Criterion benchmarks for pairing code handling.
//!
//! The formatter runs on every captured code and every QR refresh, so it is
//! measured for both short pairing codes and long QR payloads.
//!
//! Run with:
//! ```bash
//! cargo bench --package pairing-core --bench pairing_code_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pairing_core::{format_pairing_code, CodeSource, PairingCodeSlot};

fn bench_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_pairing_code");

    // 8 chars = typical pairing code; 240 chars ≈ one QR payload.
    for len in [8usize, 64, 240] {
        let code = "A1B2".repeat(len / 4);
        group.bench_with_input(BenchmarkId::from_parameter(len), &code, |b, code| {
            b.iter(|| format_pairing_code(black_box(code)));
        });
    }

    group.finish();
}

fn bench_slot_capture(c: &mut Criterion) {
    c.bench_function("slot_capture_then_reject", |b| {
        b.iter(|| {
            let mut slot = PairingCodeSlot::new();
            slot.capture(CodeSource::Requested, black_box("ABCD1234"));
            slot.capture(CodeSource::Qr, black_box("2@ignored"))
        });
    });
}

criterion_group!(benches, bench_format, bench_slot_capture);
criterion_main!(benches);
