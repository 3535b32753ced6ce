use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rust_frontier::{CandidateUri, SpilloverByteQueue};
use tempfile::TempDir;

fn bench_append_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("spill_append_pop");

    for size in [64usize, 512, 4096] {
        let record = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &record, |b, record| {
            let dir = TempDir::new().unwrap();
            let mut queue = SpilloverByteQueue::new(dir.path(), "bench");
            b.iter(|| {
                queue.append(record).unwrap();
                black_box(queue.pop_front().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_candidate_codec(c: &mut Criterion) {
    let seed = CandidateUri::seed("http://example.com/");
    let curi = CandidateUri::prerequisite("dns:example.com", &seed);
    let bytes = curi.encode().unwrap();

    c.bench_function("candidate_encode", |b| b.iter(|| black_box(curi.encode().unwrap())));
    c.bench_function("candidate_decode", |b| {
        b.iter(|| black_box(CandidateUri::decode(&bytes).unwrap()))
    });
}

criterion_group!(benches, bench_append_pop, bench_candidate_codec);
criterion_main!(benches);
