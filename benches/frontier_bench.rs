use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rust_frontier::config::PolitenessConfig;
use rust_frontier::{CandidateUri, Frontier, FrontierConfig, SeenStore};
use tempfile::TempDir;

fn open(dir: &TempDir, seen_store: SeenStore) -> Frontier {
    let mut config = FrontierConfig::new(dir.path());
    config.politeness = PolitenessConfig::none();
    config.seen_store = seen_store;
    config.journal.enabled = false;
    Frontier::open(config).unwrap()
}

// Schedule then drain N URIs spread over a fixed set of hosts.
fn bench_schedule_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_drain");
    group.sample_size(10);

    for count in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("memory_seen", count), &count, |b, &count| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let frontier = open(&dir, SeenStore::Memory);
                for i in 0..count {
                    frontier
                        .schedule(CandidateUri::seed(format!("http://host{}.example.com/page/{}", i % 50, i)))
                        .unwrap();
                }
                while let Some(curi) = frontier.next().unwrap() {
                    frontier.succeeded(&curi).unwrap();
                }
                black_box(frontier.stats().succeeded)
            });
        });
    }

    group.finish();
}

fn bench_duplicate_checks(c: &mut Criterion) {
    let mut group = c.benchmark_group("duplicate_schedule");

    for store in [SeenStore::Memory, SeenStore::Redb] {
        let dir = TempDir::new().unwrap();
        let frontier = open(&dir, store);
        for i in 0..1_000 {
            frontier
                .schedule(CandidateUri::seed(format!("http://example.com/page/{}", i)))
                .unwrap();
        }

        group.bench_function(format!("{:?}", store), |b| {
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % 1_000;
                black_box(
                    frontier
                        .schedule(CandidateUri::seed(format!("http://example.com/page/{}", i)))
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_schedule_and_drain, bench_duplicate_checks);
criterion_main!(benches);
