//! Benchmarks for the sandbox orchestrator.
//!
//! Run with: cargo bench
//!
//! The Python benchmarks need the guest image (see `EXECR_RUNTIME_IMAGE`);
//! they are skipped when it is missing. The WAT benchmarks always run.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use execr::prelude::*;
use execr::{global_cache, image_bytes};
use tokio::runtime::Runtime;

const HELLO_WAT: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 64) "hello\n")
  (func (export "_start")
    (i32.store (i32.const 0) (i32.const 64))
    (i32.store (i32.const 4) (i32.const 6))
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))
"#;

fn options() -> ExecuteOptions {
    ExecuteOptions::new().package_mount(None)
}

/// Check whether the Python image can be loaded.
fn python_available() -> bool {
    image_bytes().is_ok()
}

/// Benchmark session overhead with a trivial guest.
fn bench_session_overhead(c: &mut Criterion) {
    let executor = Executor::with_image(GuestImage::from_bytes(HELLO_WAT.as_bytes()));

    let mut group = c.benchmark_group("session_overhead");

    group.bench_function("cached_module", |b| {
        b.iter(|| black_box(executor.execute("", &options()).unwrap()));
    });

    let uncached = executor.clone().without_cache();
    group.bench_function("compile_every_session", |b| {
        b.iter(|| black_box(uncached.execute("", &options()).unwrap()));
    });

    group.finish();
}

/// Benchmark cold start (first compilation of the Python image).
fn bench_cold_start(c: &mut Criterion) {
    if !python_available() {
        eprintln!("Skipping cold_start benchmark: guest image not found");
        return;
    }

    let mut group = c.benchmark_group("cold_start");
    group.sample_size(10); // Reduced sample size due to compilation time

    group.bench_function("python_no_module_cache", |b| {
        b.iter(|| {
            global_cache().clear();
            black_box(execute("pass", &options()).unwrap())
        });
    });

    group.finish();
}

/// Benchmark Python code execution with a warm cache.
fn bench_execution(c: &mut Criterion) {
    if !python_available() {
        eprintln!("Skipping execution benchmark: guest image not found");
        return;
    }

    let executor = Executor::new();
    let _ = executor.execute("pass", &options()).unwrap();

    let mut group = c.benchmark_group("execution");

    group.bench_function("simple_print", |b| {
        b.iter(|| black_box(executor.execute("print(1 + 1)", &options()).unwrap()));
    });

    group.bench_function("loop_100", |b| {
        b.iter(|| {
            black_box(
                executor
                    .execute("total = 0\nfor i in range(100): total += i\nprint(total)", &options())
                    .unwrap(),
            )
        });
    });

    group.bench_function("loop_100_metered", |b| {
        let metered = options().fuel(400_000_000);
        b.iter(|| {
            black_box(
                executor
                    .execute("total = 0\nfor i in range(100): total += i\nprint(total)", &metered)
                    .unwrap(),
            )
        });
    });

    group.finish();
}

/// Benchmark concurrent execution throughput.
fn bench_concurrent_execution(c: &mut Criterion) {
    if !python_available() {
        eprintln!("Skipping concurrent benchmark: guest image not found");
        return;
    }

    let rt = Runtime::new().unwrap();
    let executor = Executor::new();

    let mut group = c.benchmark_group("concurrent");
    group.sample_size(10);

    for concurrency in [1, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("executions", concurrency),
            concurrency,
            |b, &concurrency| {
                b.iter(|| {
                    rt.block_on(async {
                        let mut handles = Vec::new();

                        for _ in 0..concurrency {
                            let executor = executor.clone();
                            handles.push(tokio::spawn(async move {
                                executor.execute_async("print(1 + 1)", options()).await.unwrap()
                            }));
                        }

                        for handle in handles {
                            black_box(handle.await.unwrap());
                        }
                    });
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_session_overhead,
    bench_cold_start,
    bench_execution,
    bench_concurrent_execution,
);

criterion_main!(benches);
