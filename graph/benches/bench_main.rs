use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::Rng;

use graph_rs::mvcc::commit_log::CommitLog;
use graph_rs::mvcc::engine::{Engine, SingleNodeEngine};
use graph_rs::storage::version::VersionList;

fn commit_log_benchmark(c: &mut Criterion) {
    let log = CommitLog::new();
    let mut id = 0u64;
    c.bench_function("commit log set_committed", |b| {
        b.iter(|| {
            id += 1;
            log.set_committed(black_box(id));
        })
    });

    let mut rng = rand::thread_rng();
    c.bench_function("commit log fetch_info", |b| {
        b.iter(|| log.fetch_info(black_box(rng.gen_range(0..100_000))))
    });
}

fn version_chain_benchmark(c: &mut Criterion) {
    let engine = SingleNodeEngine::new();

    c.bench_function("versioned record write and read", |b| {
        let tx = engine.begin().expect("begin");
        let list = VersionList::new(1, &tx, 0u64);
        engine.commit(tx.id).expect("commit");

        b.iter(|| {
            let tx = engine.begin().expect("begin");
            list.write(&tx, |data| *data += 1).expect("write");
            let value = *list.read(&tx).expect("visible");
            engine.commit(tx.id).expect("commit");
            black_box(value)
        })
    });

    c.bench_function("transaction begin and commit", |b| {
        b.iter(|| {
            let tx = engine.begin().expect("begin");
            engine.commit(tx.id).expect("commit");
        })
    });
}

criterion_group!(benches, commit_log_benchmark, version_chain_benchmark);
criterion_main!(benches);
