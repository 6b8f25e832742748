//! Benchmarks for the gidstore identity store
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use gidstore::index::{CacheSizing, NameIndex};
use gidstore::store::codec;
use gidstore::store::{
    IdentityLog, LogOptions, MetricIdentity, MetricStore, StoreConfig, SyncMode,
};
use tempfile::tempdir;

fn bench_config(dir: &std::path::Path) -> StoreConfig {
    StoreConfig {
        sync_mode: SyncMode::None, // No fsync for benchmarking raw performance
        ..StoreConfig::new(dir)
    }
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let identity = MetricIdentity::new(42, Some("host01.cpu.load.avg1"), Some(&[0xAB; 16]));
    let encoded = codec::encode(&identity).unwrap();

    group.bench_function("encode", |b| {
        b.iter(|| codec::encode(black_box(&identity)).unwrap())
    });

    group.bench_function("decode", |b| {
        b.iter(|| codec::decode(black_box(&encoded)).unwrap())
    });

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    let names: Vec<String> = (0..10_000).map(|i| format!("metric.{}", i)).collect();
    group.throughput(Throughput::Elements(names.len() as u64));

    group.bench_function("put_10000", |b| {
        b.iter_batched(
            || NameIndex::new(CacheSizing::default()).unwrap(),
            |index| {
                for (i, name) in names.iter().enumerate() {
                    index.put(name, i as i64).unwrap();
                }
                index
            },
            BatchSize::SmallInput,
        )
    });

    let index = NameIndex::new(CacheSizing::default()).unwrap();
    for (i, name) in names.iter().enumerate() {
        index.put(name, i as i64).unwrap();
    }

    group.bench_function("get_10000", |b| {
        b.iter(|| {
            for name in &names {
                black_box(index.get(name));
            }
        })
    });

    group.finish();
}

fn bench_log(c: &mut Criterion) {
    let mut group = c.benchmark_group("log");

    let identity = MetricIdentity::new(1, Some("bench.metric"), Some(&[0x01, 0x02]));
    let record = codec::encode(&identity).unwrap();

    group.bench_function("append", |b| {
        let dir = tempdir().unwrap();
        let options = LogOptions {
            sync_mode: SyncMode::None,
            ..LogOptions::default()
        };
        let mut log = IdentityLog::create(dir.path(), options).unwrap();

        b.iter(|| log.append(black_box(&record)).unwrap())
    });

    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");

    group.bench_function("resolve_new", |b| {
        let dir = tempdir().unwrap();
        let store = MetricStore::open(bench_config(dir.path())).unwrap();
        let mut next = 0u64;

        b.iter(|| {
            next += 1;
            let name = format!("metric.{}", next);
            store.resolve(Some(black_box(&name)), None).unwrap()
        })
    });

    group.bench_function("resolve_existing", |b| {
        let dir = tempdir().unwrap();
        let store = MetricStore::open(bench_config(dir.path())).unwrap();
        store.resolve(Some("cpu.load"), Some(&[0xAA, 0xBB])).unwrap();

        b.iter(|| {
            store
                .resolve(Some(black_box("cpu.load")), Some(&[0xAA, 0xBB]))
                .unwrap()
        })
    });

    group.bench_function("lookup_by_name", |b| {
        let dir = tempdir().unwrap();
        let store = MetricStore::open(bench_config(dir.path())).unwrap();
        for i in 0..1000 {
            store.resolve(Some(&format!("metric.{}", i)), None).unwrap();
        }

        b.iter(|| store.lookup_by_name(black_box("metric.500")))
    });

    group.bench_function("defragment_10000_half_dead", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;

            for _ in 0..iters {
                let dir = tempdir().unwrap();
                let store = MetricStore::open(bench_config(dir.path())).unwrap();
                for i in 0..10_000 {
                    let id = store.resolve(Some(&format!("metric.{}", i)), None).unwrap();
                    if i % 2 == 0 {
                        store.delete(id).unwrap();
                    }
                }

                let start = std::time::Instant::now();
                store.defragment().unwrap();
                total += start.elapsed();
            }

            total
        })
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_cache, bench_log, bench_store);
criterion_main!(benches);
