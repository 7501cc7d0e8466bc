use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use snowdrift::{
    AtomicStoreResolver, Deadline, FileLockResolver, Generator, InProcessResolver, MemoryStore,
    MonotonicClock, SequenceResolver, SequenceStatus, TimeSource,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};
use tempfile::tempdir;

// Number of IDs generated per benchmark iteration (split across threads for
// the contended benchmarks). Fits one 12-bit bucket exactly.
const TOTAL_IDS: usize = 4096;
const MAX_SEQUENCE: u64 = 4095;

/// Benchmarks a resolver in isolation: every iteration fills one fresh bucket,
/// so no call ever has to wait.
fn bench_resolver<R>(c: &mut Criterion, group_name: &str, resolver: R)
where
    R: SequenceResolver,
{
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    let mut bucket = 0;
    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                bucket += 1;
                for _ in 0..TOTAL_IDS {
                    match resolver.try_next(bucket, MAX_SEQUENCE, Deadline::NONE) {
                        Ok(SequenceStatus::Ready { sequence, .. }) => {
                            black_box(sequence);
                        }
                        other => unreachable!("{other:?}"),
                    }
                }
            }

            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmarks one shared resolver across threads, each thread drawing from the
/// same fresh bucket.
fn bench_resolver_contended<R>(c: &mut Criterion, group_name: &str, resolver: R)
where
    R: SequenceResolver + Sync,
{
    let mut group = c.benchmark_group(group_name);
    let mut bucket = 0;

    for thread_count in [1, 2, 4, 8] {
        let per_thread = TOTAL_IDS / thread_count;

        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(format!("elems/{TOTAL_IDS}/threads/{thread_count}"), |b| {
            b.iter_custom(|iters| {
                let start = Instant::now();

                for _ in 0..iters {
                    bucket += 1;
                    let current = bucket;
                    let barrier = Barrier::new(thread_count + 1);
                    scope(|s| {
                        for _ in 0..thread_count {
                            s.spawn(|| {
                                barrier.wait();
                                for _ in 0..per_thread {
                                    let status = resolver
                                        .try_next(current, MAX_SEQUENCE, Deadline::NONE)
                                        .unwrap();
                                    black_box(status);
                                }
                            });
                        }
                        barrier.wait();
                    });
                }

                start.elapsed()
            });
        });
    }

    group.finish();
}

/// Benchmarks a generator on a real clock, shared across all available cores.
/// Buckets fill up, so this includes waiting for the clock to roll over.
fn bench_generator_threaded<R, C>(
    c: &mut Criterion,
    group_name: &str,
    generator_fn: impl Fn() -> Generator<R, C>,
) where
    R: SequenceResolver + Send + Sync,
    C: TimeSource + Send + Sync,
{
    let mut group = c.benchmark_group(group_name);
    let thread_count = num_cpus::get();
    let per_thread = TOTAL_IDS / thread_count.max(1);

    group.throughput(Throughput::Elements((per_thread * thread_count) as u64));
    group.bench_function(format!("elems/{TOTAL_IDS}/threads/{thread_count}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                let generator = Arc::new(generator_fn());
                let barrier = Arc::new(Barrier::new(thread_count + 1));
                scope(|s| {
                    for _ in 0..thread_count {
                        let generator = Arc::clone(&generator);
                        let barrier = Arc::clone(&barrier);
                        s.spawn(move || {
                            barrier.wait();
                            for _ in 0..per_thread {
                                black_box(generator.next_id().unwrap());
                            }
                        });
                    }
                    barrier.wait();
                });
            }

            start.elapsed()
        });
    });

    group.finish();
}

fn benchmark_resolver_in_process(c: &mut Criterion) {
    bench_resolver(c, "resolver/sequential/in_process", InProcessResolver::new());
}

fn benchmark_resolver_atomic_store(c: &mut Criterion) {
    bench_resolver(
        c,
        "resolver/sequential/atomic_store",
        AtomicStoreResolver::new(MemoryStore::new()),
    );
}

fn benchmark_resolver_file_lock(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let resolver = FileLockResolver::new(dir.path()).unwrap();
    bench_resolver(c, "resolver/sequential/file_lock", resolver);
}

fn benchmark_resolver_contended_in_process(c: &mut Criterion) {
    bench_resolver_contended(c, "resolver/contended/in_process", InProcessResolver::new());
}

fn benchmark_resolver_contended_atomic_store(c: &mut Criterion) {
    bench_resolver_contended(
        c,
        "resolver/contended/atomic_store",
        AtomicStoreResolver::new(MemoryStore::new()),
    );
}

fn benchmark_resolver_contended_file_lock(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let resolver = FileLockResolver::new(dir.path()).unwrap();
    bench_resolver_contended(c, "resolver/contended/file_lock", resolver);
}

fn benchmark_mono_threaded_in_process(c: &mut Criterion) {
    bench_generator_threaded(c, "mono/threaded/in_process", || {
        Generator::builder()
            .clock(MonotonicClock::default())
            .build()
            .unwrap()
    });
}

fn benchmark_mono_threaded_atomic_store(c: &mut Criterion) {
    let store = Arc::new(MemoryStore::new());
    bench_generator_threaded(c, "mono/threaded/atomic_store", || {
        Generator::builder()
            .sequence_resolver(AtomicStoreResolver::new(Arc::clone(&store)))
            .clock(MonotonicClock::default())
            .build()
            .unwrap()
    });
}

criterion_group!(
    benches,
    // Resolvers, one fresh bucket per iteration
    benchmark_resolver_in_process,
    benchmark_resolver_atomic_store,
    benchmark_resolver_file_lock,
    benchmark_resolver_contended_in_process,
    benchmark_resolver_contended_atomic_store,
    benchmark_resolver_contended_file_lock,
    // Generators on a monotonic clock (yielding)
    benchmark_mono_threaded_in_process,
    benchmark_mono_threaded_atomic_store,
);
criterion_main!(benches);
