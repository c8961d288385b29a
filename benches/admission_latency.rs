use std::time::Duration;

use chat_admission_hub::bench_support::{unlimited_window, AdmissionBenchFixture};
use chat_admission_hub::chat_admission::{ActionClass, WindowLimiter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode};
use tokio::runtime::Runtime;

fn bench_window_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_limiter");
    group
        .sample_size(1000)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1))
        .sampling_mode(SamplingMode::Auto);

    let rule = unlimited_window();

    group.bench_function(BenchmarkId::new("admit", "hot_key"), |b| {
        let limiter = WindowLimiter::new();
        b.iter(|| black_box(limiter.admit_action(ActionClass::ChatMessage, "hot", rule)));
    });

    group.bench_function(BenchmarkId::new("admit", "spread_keys"), |b| {
        let limiter = WindowLimiter::new();
        let identities: Vec<String> = (0..1024)
            .map(|i| format!("10.0.{}.{}", i / 256, i % 256))
            .collect();
        let mut next = 0usize;
        b.iter(|| {
            let identity = &identities[next % identities.len()];
            next += 1;
            black_box(limiter.admit_action(ActionClass::Login, identity, rule))
        });
    });

    group.finish();
}

fn bench_quota_gate(c: &mut Criterion) {
    let mut group = c.benchmark_group("quota_gate");
    group
        .sample_size(200)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(2))
        .sampling_mode(SamplingMode::Flat);

    let runtime = Runtime::new().expect("tokio runtime");
    let fixture = AdmissionBenchFixture::new(&runtime, 16).expect("bench fixture");
    let account = fixture.account_ids[0].clone();

    group.bench_function("check_and_reserve", |b| {
        let gate = fixture.gate.clone();
        b.to_async(&runtime).iter(|| async {
            let decision = gate.check_and_reserve(&account).await.expect("quota check");
            black_box(decision)
        });
    });

    group.bench_function("try_reserve", |b| {
        let gate = fixture.gate.clone();
        b.to_async(&runtime).iter(|| async {
            let decision = gate.try_reserve(&account).await.expect("quota reserve");
            black_box(decision)
        });
    });

    group.bench_function("pipeline_run", |b| {
        let pipeline = fixture.pipeline.clone();
        b.to_async(&runtime).iter(|| async {
            let reply = pipeline
                .run(ActionClass::ChatMessage, &account, || async { Ok(42u32) })
                .await
                .expect("admission");
            black_box(reply)
        });
    });

    group.bench_function("concurrent_accounts", |b| {
        let accounts = fixture.account_ids.clone();
        let pipeline = fixture.pipeline.clone();
        b.to_async(&runtime).iter(|| async {
            let tasks = accounts.iter().cloned().map(|account| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    pipeline
                        .run(ActionClass::ChatMessage, &account, || async { Ok(()) })
                        .await
                        .expect("admission concurrent")
                })
            });
            for task in tasks {
                task.await.expect("join handle");
            }
        });
    });

    group.finish();
}

criterion_group!(admission_latency, bench_window_limiter, bench_quota_gate);
criterion_main!(admission_latency);
