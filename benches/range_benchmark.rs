//! Range read benchmarks

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use filegate::range::{parse_range, RangeResponder};
use filegate::storage::{MemoryBackend, StorageBackend};
use std::sync::Arc;

fn benchmark_parse_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_range");
    let size = 10 * 1024 * 1024 * 1024u64;

    for header in ["bytes=0-1023", "bytes=1048576-", "bytes=-500", "bytes=abc"].iter() {
        group.bench_with_input(*header, header, |b, header| {
            b.iter(|| black_box(parse_range(black_box(header), size)));
        });
    }

    group.finish();
}

fn benchmark_ranged_reads(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let storage = Arc::new(MemoryBackend::default());
    runtime
        .block_on(storage.put_object("blob", Bytes::from(vec![7u8; 8 * 1024 * 1024]), None))
        .unwrap();
    let responder = RangeResponder::new(storage);

    let mut group = c.benchmark_group("ranged_reads");
    for window in [1024u64, 64 * 1024, 1024 * 1024].iter() {
        let header = format!("bytes=4096-{}", 4096 + window - 1);
        group.throughput(Throughput::Bytes(*window));
        group.bench_with_input(format!("{}_bytes", window), &header, |b, header| {
            b.to_async(&runtime)
                .iter(|| async { black_box(responder.read("blob", Some(header)).await.unwrap()) });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_parse_range, benchmark_ranged_reads);
criterion_main!(benches);
