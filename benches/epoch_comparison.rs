use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tri_epoch::{Collector, EpochCell};

// Benchmark 1: Single-threaded enter/exit overhead
fn bench_single_thread_pin_unpin(c: &mut Criterion) {
    c.bench_function("tri_epoch_single_thread_pin_unpin", |b| {
        let collector = Collector::new();
        collector.register().unwrap();

        b.iter(|| {
            let _guard = collector.pin().unwrap();
            black_box(());
        });
    });

    c.bench_function("tri_epoch_single_thread_enter_exit", |b| {
        let collector = Collector::new();
        collector.register().unwrap();

        b.iter(|| {
            collector.enter().unwrap();
            black_box(());
            collector.exit();
        });
    });

    c.bench_function("crossbeam_epoch_single_thread_pin_unpin", |b| {
        b.iter(|| {
            let _guard = crossbeam_epoch::pin();
            black_box(());
        });
    });
}

// Benchmark 2: Thread registration on first critical section
fn bench_reader_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("reader_registration");

    for num_readers in [2, 4, 8, 16].iter() {
        group.bench_with_input(
            BenchmarkId::new("tri_epoch", num_readers),
            num_readers,
            |b, &num_readers| {
                b.iter(|| {
                    let collector = Collector::new();

                    let handles: Vec<_> = (0..num_readers)
                        .map(|_| {
                            let collector = collector.clone();
                            thread::spawn(move || {
                                let _guard = collector.pin().unwrap();
                            })
                        })
                        .collect();

                    for handle in handles {
                        let _ = handle.join();
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("crossbeam_epoch", num_readers),
            num_readers,
            |b, &num_readers| {
                b.iter(|| {
                    let handles: Vec<_> = (0..num_readers)
                        .map(|_| {
                            thread::spawn(|| {
                                let _guard = crossbeam_epoch::pin();
                            })
                        })
                        .collect();

                    for handle in handles {
                        let _ = handle.join();
                    }
                });
            },
        );
    }

    group.finish();
}

// Benchmark 3: Deferring a small allocation
fn bench_defer(c: &mut Criterion) {
    let mut group = c.benchmark_group("defer");

    group.bench_function("tri_epoch_defer_drop", |b| {
        let collector = Collector::new();
        collector.register().unwrap();

        b.iter(|| {
            collector.defer_drop(Box::new(black_box(42u64))).unwrap();
        });
        collector.synchronize();
    });

    group.bench_function("crossbeam_epoch_defer", |b| {
        b.iter(|| {
            let guard = crossbeam_epoch::pin();
            let value = Box::new(black_box(42u64));
            guard.defer(move || drop(value));
        });
    });

    group.finish();
}

// Benchmark 4: Protected pointer loads
fn bench_atomic_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("atomic_operations");

    group.bench_function("tri_epoch_load", |b| {
        let collector = Collector::new();
        let cell = EpochCell::new(42u64, &collector);

        b.iter(|| {
            let guard = collector.pin().unwrap();
            let val = cell.load(&guard);
            black_box(val);
        });
    });

    group.bench_function("crossbeam_epoch_load", |b| {
        let atomic = crossbeam_epoch::Atomic::new(42u64);

        b.iter(|| {
            let guard = crossbeam_epoch::pin();
            let val = atomic.load(Ordering::Acquire, &guard);
            black_box(val);
        });
    });

    group.finish();
}

// Benchmark 5: Concurrent read-heavy workload
fn bench_concurrent_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_reads");
    group.sample_size(10);

    for num_threads in [2, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::new("tri_epoch", num_threads),
            num_threads,
            |b, &num_threads| {
                b.iter(|| {
                    let collector = Collector::new();
                    let cell = Arc::new(EpochCell::new(0u64, &collector));
                    let counter = Arc::new(AtomicUsize::new(0));

                    let handles: Vec<_> = (0..num_threads)
                        .map(|_| {
                            let collector = collector.clone();
                            let cell = cell.clone();
                            let c = counter.clone();

                            thread::spawn(move || {
                                for _ in 0..1000 {
                                    let guard = collector.pin().unwrap();
                                    let _val = cell.load(&guard);
                                    c.fetch_add(1, Ordering::Relaxed);
                                }
                            })
                        })
                        .collect();

                    for handle in handles {
                        let _ = handle.join();
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("crossbeam_epoch", num_threads),
            num_threads,
            |b, &num_threads| {
                b.iter(|| {
                    let atomic = Arc::new(crossbeam_epoch::Atomic::new(0u64));
                    let counter = Arc::new(AtomicUsize::new(0));

                    let handles: Vec<_> = (0..num_threads)
                        .map(|_| {
                            let a = atomic.clone();
                            let c = counter.clone();

                            thread::spawn(move || {
                                for _ in 0..1000 {
                                    let guard = crossbeam_epoch::pin();
                                    let _val = a.load(Ordering::Acquire, &guard);
                                    c.fetch_add(1, Ordering::Relaxed);
                                }
                            })
                        })
                        .collect();

                    for handle in handles {
                        let _ = handle.join();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_thread_pin_unpin,
    bench_reader_registration,
    bench_defer,
    bench_atomic_operations,
    bench_concurrent_reads
);
criterion_main!(benches);
