use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use txn_guard::idempotency::{
    GuardDependencies, IdempotencyGuard, IdempotencyKeyGenerator, InMemoryRequestLedger, Outcome,
    TransactionIds,
};
use txn_guard::observability::{mask_sensitive, LatencyTimer};

fn benchmark_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_derivation");
    let generator = IdempotencyKeyGenerator::new();

    for path_len in [16, 256, 4096].iter() {
        let path = format!("/{}", "a".repeat(*path_len));
        group.bench_with_input(BenchmarkId::new("derive", path_len), &path, |b, path| {
            b.iter(|| black_box(generator.derive(path, "TXN-0001", "BUS-0001")))
        });
    }

    group.finish();
}

fn benchmark_header_extraction(c: &mut Criterion) {
    let mut headers = HeaderMap::new();
    headers.insert("s-txn-id", "TXN-0001".parse().unwrap());
    headers.insert("s-bus-txn-id", "BUS-0001".parse().unwrap());
    headers.insert("content-type", "application/json".parse().unwrap());

    c.bench_function("transaction_ids_from_headers", |b| {
        b.iter(|| black_box(TransactionIds::from_headers(&headers)))
    });
}

fn benchmark_guard_lifecycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let guard = Arc::new(IdempotencyGuard::new(GuardDependencies::new(Arc::new(
        InMemoryRequestLedger::new(),
    ))));

    let mut group = c.benchmark_group("guard");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("admit_and_finish", |b| {
        b.to_async(&rt).iter(|| {
            let guard = Arc::clone(&guard);
            async move {
                let ids = TransactionIds::new(Uuid::new_v4().to_string(), "BUS-0001");
                if let Ok(token) = guard.admit("/orders", &ids).await {
                    guard.finish(token, Outcome::Success).await;
                }
            }
        })
    });

    let duplicate = TransactionIds::new("TXN-DUP", "BUS-0001");
    rt.block_on(async {
        let _ = guard.admit("/orders", &duplicate).await;
    });

    group.bench_function("reject_duplicate", |b| {
        b.to_async(&rt).iter(|| {
            let guard = Arc::clone(&guard);
            let ids = duplicate.clone();
            async move { black_box(guard.admit("/orders", &ids).await.is_err()) }
        })
    });

    group.finish();
}

fn benchmark_mask_sensitive(c: &mut Criterion) {
    c.bench_function("mask_sensitive", |b| {
        b.iter(|| black_box(mask_sensitive("TXN-2024-01-01-000042", 2)))
    });
}

fn benchmark_latency_timer(c: &mut Criterion) {
    c.bench_function("latency_timer", |b| {
        b.iter(|| {
            let timer = LatencyTimer::new();
            black_box(timer.elapsed_ms())
        })
    });
}

criterion_group!(
    benches,
    benchmark_key_derivation,
    benchmark_header_extraction,
    benchmark_guard_lifecycle,
    benchmark_mask_sensitive,
    benchmark_latency_timer,
);
criterion_main!(benches);
