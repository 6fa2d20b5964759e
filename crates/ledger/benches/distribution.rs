//! Benchmarks for reward distribution and claiming

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use unitvault_ledger::{Engine, EngineConfig, InMemoryTokenLedger, RewardLedger};
use unitvault_types::{tokens, Address, ManualClock, TokenId};

fn bench_accumulator_distribute(c: &mut Criterion) {
    let usdt = TokenId::new("USDT");
    let mut ledger = RewardLedger::new(TokenId::new("UVT"), 5_000, 8_000);
    for _ in 0..1_000 {
        ledger.register_unit();
    }

    c.bench_function("accumulator_distribute", |b| {
        b.iter(|| ledger.distribute(black_box(&usdt), black_box(1_234_567), black_box(0)))
    });
}

fn bench_accumulator_claim(c: &mut Criterion) {
    let usdt = TokenId::new("USDT");
    let mut ledger = RewardLedger::new(TokenId::new("UVT"), 5_000, 8_000);
    let mut position = ledger.register_unit();

    c.bench_function("accumulator_distribute_and_claim", |b| {
        b.iter(|| {
            ledger
                .distribute(&usdt, black_box(tokens(10)), 0)
                .map(|_| ledger.claim(&mut position, &usdt))
        })
    });
}

fn bench_engine_distribute(c: &mut Criterion) {
    let admin = Address::derive("admin");
    let config = EngineConfig::new(admin, Address::derive("treasury"), Address::derive("multisig"));
    let engine = Engine::new(
        config,
        Arc::new(InMemoryTokenLedger::new()),
        Arc::new(ManualClock::new(1_700_000_000)),
    )
    .expect("engine");
    let uvt = engine.native_token();

    engine.add_to_whitelist(admin, &[admin]).expect("whitelist");
    engine.create_batch(admin, 100, 0).expect("batch");
    for _ in 0..100 {
        engine.issue(admin).expect("issue");
    }

    c.bench_function("engine_distribute_native", |b| {
        b.iter(|| engine.distribute(admin, black_box(&uvt), black_box(50_000)))
    });
}

criterion_group!(
    benches,
    bench_accumulator_distribute,
    bench_accumulator_claim,
    bench_engine_distribute
);
criterion_main!(benches);
