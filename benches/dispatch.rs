//! Benchmarks for action dispatch.
//!
//! Measures the overhead of:
//! - Building actions from operator lines
//! - Fanning a group action out to scripted hosts

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::sync::Arc;
use tokio::runtime::Runtime;
use xsh::testing::{MockTransport, directory, group};
use xsh::{ActionBuilder, DispatchConfig, Dispatcher, SessionContext};

fn addresses(size: usize) -> Vec<String> {
    (0..size)
        .map(|i| format!("10.{}.{}.{}", i >> 16, (i >> 8) & 255, i & 255))
        .collect()
}

fn bench_build_line(c: &mut Criterion) {
    let builder = ActionBuilder::new(directory([group("web", &["10.0.0.1"])]));
    let ctx = SessionContext::new().with_group("web");

    c.bench_function("build_line", |b| {
        b.iter(|| {
            builder
                .build_line(&ctx, "uptime; df -h; free -m; cat /etc/os-release")
                .unwrap()
        })
    });
}

fn bench_group_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut bench_group = c.benchmark_group("group_dispatch");

    for size in [10, 100, 500].iter() {
        bench_group.bench_with_input(BenchmarkId::new("mock", size), size, |b, &size| {
            let addresses = addresses(size);
            let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
            let fleet = directory([group("fleet", &refs)]);
            let dispatcher = Dispatcher::new(
                fleet.clone(),
                Arc::new(MockTransport::new()),
                DispatchConfig::default().with_max_concurrency(64),
            );
            let ctx = SessionContext::new().with_group("fleet");
            let action = ActionBuilder::new(fleet)
                .build_line(&ctx, "echo a; echo b")
                .unwrap();

            b.iter(|| {
                rt.block_on(async { dispatcher.dispatch(&action).await.unwrap() })
            });
        });
    }

    bench_group.finish();
}

criterion_group!(benches, bench_build_line, bench_group_dispatch);
criterion_main!(benches);
