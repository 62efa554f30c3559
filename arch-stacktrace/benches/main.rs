// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use arch_stacktrace::{
    capture_frames, capture_frames_into, symbolize_frames, DefaultSymbolizer, StackUnwinder,
    UnwinderKind, MAX_STACK_DEPTH,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

#[inline(never)]
fn recurse(depth: usize, f: &mut dyn FnMut()) {
    if depth == 0 {
        f()
    } else {
        recurse(black_box(depth - 1), f)
    }
}

fn capture_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture");
    for depth in [8, 64, 256] {
        let id = BenchmarkId::new("capture_frames", depth);
        group.bench_with_input(id, &depth, |b, &depth| {
            recurse(depth, &mut || {
                b.iter(|| black_box(capture_frames(MAX_STACK_DEPTH, 0)));
            })
        });
        for kind in [UnwinderKind::UnwindTables, UnwinderKind::Execinfo] {
            let id = BenchmarkId::new(format!("{kind:?}"), depth);
            group.bench_with_input(id, &depth, |b, &depth| {
                let mut frames = [0usize; 512];
                recurse(depth, &mut || {
                    b.iter(|| black_box(kind.unwinder().capture_into(&mut frames, 0)));
                })
            });
        }
    }
    group.bench_function("capture_frames_into/fixed", |b| {
        let mut frames = [0usize; 64];
        b.iter(|| black_box(capture_frames_into(&mut frames, 0)))
    });
    group.finish();
}

fn symbolize_benches(c: &mut Criterion) {
    let frames = capture_frames(64, 0);
    c.bench_function("symbolize/default", |b| {
        b.iter(|| black_box(symbolize_frames(&DefaultSymbolizer, black_box(&frames), false)));
    });
}

criterion_group!(benches, capture_benches, symbolize_benches);
criterion_main!(benches);
