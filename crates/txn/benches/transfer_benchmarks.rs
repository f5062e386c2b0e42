use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use coffer_core::{Account, Currency, NewAccount};
use coffer_store::{LedgerStore, LedgerTx, MemLedgerStore};
use coffer_txn::{TransferParams, TxCoordinator};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

async fn seed_account(store: &MemLedgerStore, owner: &str, balance: i64) -> Account {
    let mut tx = store.begin().await.unwrap();
    let account = tx
        .create_account(NewAccount {
            owner: owner.to_string(),
            balance,
            currency: Currency::Usd,
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();
    account
}

fn bench_transfer_latency(c: &mut Criterion) {
    let rt = runtime();
    let store = MemLedgerStore::new();
    let (a, b) = rt.block_on(async {
        (
            seed_account(&store, "alice", i64::MAX / 2).await,
            seed_account(&store, "bob", i64::MAX / 2).await,
        )
    });
    let coordinator = TxCoordinator::new(store);

    let mut group = c.benchmark_group("transfer_money");
    group.throughput(Throughput::Elements(1));
    group.bench_function("single_pair", |bencher| {
        bencher.iter(|| {
            rt.block_on(async {
                let outcome = coordinator
                    .transfer_money(TransferParams {
                        from_account_id: a.id,
                        to_account_id: b.id,
                        amount: 1,
                    })
                    .await
                    .unwrap();
                black_box(outcome);
            })
        })
    });
    group.finish();
}

fn bench_cascade_delete(c: &mut Criterion) {
    let rt = runtime();

    let mut group = c.benchmark_group("delete_account_cascade");
    group.bench_function("account_with_ledger_history", |bencher| {
        bencher.iter_batched(
            || {
                let store = MemLedgerStore::new();
                let coordinator = TxCoordinator::new(store.clone());
                let doomed = rt.block_on(async {
                    let doomed = seed_account(&store, "alice", 1_000_000).await;
                    let other = seed_account(&store, "bob", 1_000_000).await;
                    for _ in 0..10 {
                        coordinator
                            .transfer_money(TransferParams {
                                from_account_id: doomed.id,
                                to_account_id: other.id,
                                amount: 1,
                            })
                            .await
                            .unwrap();
                    }
                    doomed
                });
                (coordinator, doomed.id)
            },
            |(coordinator, account_id)| {
                rt.block_on(async {
                    coordinator.delete_account_cascade(account_id).await.unwrap();
                })
            },
            criterion::BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_transfer_latency, bench_cascade_delete);
criterion_main!(benches);
