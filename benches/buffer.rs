use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use weir_io::Buffer;

fn bench_append_retrieve(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_retrieve");

    for size in [64usize, 512, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let chunk = vec![0xa5u8; size];
            let mut buf = Buffer::new();
            b.iter(|| {
                buf.append(black_box(&chunk));
                buf.retrieve(size);
            });
        });
    }
    group.finish();
}

fn bench_compaction_cycle(c: &mut Criterion) {
    // partial retrieves leave leading slack; every append past the
    // writable region exercises the compact-in-place path
    c.bench_function("compaction_cycle", |b| {
        let chunk = vec![0x5au8; 768];
        b.iter(|| {
            let mut buf = Buffer::new();
            for _ in 0..16 {
                buf.append(black_box(&chunk));
                buf.retrieve(chunk.len() - 8);
            }
            black_box(buf.readable_bytes());
        });
    });
}

fn bench_growth(c: &mut Criterion) {
    c.bench_function("growth_from_initial", |b| {
        let chunk = vec![0xffu8; 16 * 1024];
        b.iter(|| {
            let mut buf = Buffer::new();
            buf.append(black_box(&chunk));
            black_box(buf.capacity());
        });
    });
}

criterion_group!(
    benches,
    bench_append_retrieve,
    bench_compaction_cycle,
    bench_growth
);
criterion_main!(benches);
