use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use numlog_core::{
    DedupStore, LogAppender, SyncPolicy,
    types::{Token, is_valid},
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};
use tokio::runtime::Builder;

// Tokens observed per benchmark iteration (per-thread for multi-threaded).
const TOTAL_TOKENS: u32 = 4096;

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");
    group.throughput(Throughput::Elements(1));

    group.bench_function("valid", |b| b.iter(|| is_valid(black_box("900987658"))));
    group.bench_function("too_long", |b| {
        b.iter(|| is_valid(black_box("000987658999")))
    });
    group.bench_function("non_digit", |b| b.iter(|| is_valid(black_box("00098765L"))));
    group.finish();
}

/// Single-threaded hot path: every token is new.
fn bench_store_unique(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/unique");
    group.throughput(Throughput::Elements(u64::from(TOTAL_TOKENS)));

    group.bench_function(format!("elems/{TOTAL_TOKENS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let store = DedupStore::with_capacity(TOTAL_TOKENS as usize);
                for value in 0..TOTAL_TOKENS {
                    let token = Token::from_value(value).unwrap();
                    black_box(store.observe(token));
                }
            }
            start.elapsed()
        });
    });
    group.finish();
}

/// Every thread observes the same token range, so most calls are duplicates
/// contending on the same set.
fn bench_store_contended(c: &mut Criterion) {
    for threads in [2, 5, 8] {
        let mut group = c.benchmark_group(format!("store/contended/threads/{threads}"));
        group.throughput(Throughput::Elements(u64::from(TOTAL_TOKENS) * threads as u64));

        group.bench_function(format!("elems/{TOTAL_TOKENS}"), |b| {
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    let store = Arc::new(DedupStore::new());
                    let barrier = Arc::new(Barrier::new(threads));
                    scope(|s| {
                        for _ in 0..threads {
                            let store = Arc::clone(&store);
                            let barrier = Arc::clone(&barrier);
                            s.spawn(move || {
                                barrier.wait();
                                for value in 0..TOTAL_TOKENS {
                                    let token = Token::from_value(value).unwrap();
                                    black_box(store.observe(token));
                                }
                            });
                        }
                    });
                }
                start.elapsed()
            });
        });
        group.finish();
    }
}

fn bench_appender(c: &mut Criterion) {
    const RECORDS: u32 = 256;

    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let dir = tempfile::tempdir().unwrap();

    for (name, sync) in [
        ("os_managed", SyncPolicy::OsManaged),
        ("every_record", SyncPolicy::EveryRecord),
    ] {
        let mut group = c.benchmark_group(format!("appender/{name}"));
        group.throughput(Throughput::Elements(u64::from(RECORDS)));
        group.sample_size(10);

        let path = dir.path().join(format!("{name}.log"));
        group.bench_function(format!("records/{RECORDS}"), |b| {
            b.to_async(&rt).iter_custom(|iters| {
                let path = path.clone();
                async move {
                    let appender = LogAppender::create(&path, sync).await.unwrap();
                    let start = Instant::now();
                    for _ in 0..iters {
                        for value in 0..RECORDS {
                            let token = Token::from_value(value).unwrap();
                            appender.append(token).await.unwrap();
                        }
                    }
                    start.elapsed()
                }
            });
        });
        group.finish();
    }
}

criterion_group!(
    benches,
    bench_validate,
    bench_store_unique,
    bench_store_contended,
    bench_appender
);
criterion_main!(benches);
