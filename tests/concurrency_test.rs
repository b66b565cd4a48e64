mod common;

use cashier::domain::cash::{CashOut, CashOutCommit};
use cashier::error::CashierError;
use cashier::infrastructure::sqlite::SqliteStore;
use cashier::infrastructure::sqlite::registry::CurrencyRegistry;
use common::{InstrumentedAuthority, cashier_with, deposit};
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::time::Duration;

const URL_A: &str = "http://a";
const URL_B: &str = "http://b";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deposits_on_one_currency_never_overlap() {
    let authority = Arc::new(InstrumentedAuthority::new(Duration::from_millis(2)));
    let cashier = Arc::new(cashier_with(SqliteStore::in_memory().unwrap(), &authority));

    let jitter: Vec<u64> = {
        let mut rng = rand::thread_rng();
        (0..16).map(|_| rng.gen_range(0..5)).collect()
    };
    let mut tasks = Vec::new();
    for (index, delay) in jitter.into_iter().enumerate() {
        let cashier = Arc::clone(&cashier);
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let user = (index % 4) as u32 + 1;
            cashier
                .cash_in(&deposit(user, URL_A, index as i64, 10))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(authority.max_in_flight(URL_A), 1);
    // One melt and one commit per deposit.
    assert_eq!(authority.calls(), 32);

    let safe = cashier.ledger().safe_notes(1).unwrap();
    assert_eq!(safe.len(), 1);
    assert_eq!(safe[0].value, 160);
    assert!(cashier.ledger().counter_entries(1).unwrap().is_empty());

    let balances = cashier.balances().unwrap();
    assert_eq!(balances.len(), 4);
    assert!(balances.iter().all(|balance| balance.amount == 40));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_traffic_keeps_safe_and_balances_in_step() {
    let authority = Arc::new(InstrumentedAuthority::new(Duration::from_millis(1)));
    let cashier = Arc::new(cashier_with(SqliteStore::in_memory().unwrap(), &authority));
    cashier.cash_in(&deposit(1, URL_A, 0, 1_000)).await.unwrap();

    let mut tasks = Vec::new();
    for index in 1..=10 {
        let cashier = Arc::clone(&cashier);
        tasks.push(tokio::spawn(async move {
            if index % 2 == 0 {
                cashier
                    .cash_in(&deposit(1, URL_A, index, 50))
                    .await
                    .map(|()| None)
            } else {
                let note = cashier
                    .cash_out(&CashOut {
                        user_serial: 1,
                        url: URL_A.to_string(),
                        value: 30,
                        application_data: format!("withdraw-{index}"),
                    })
                    .await?;
                cashier.cash_out_commit(&CashOutCommit {
                    reference: note.name.clone(),
                })?;
                Ok::<_, CashierError>(Some(note))
            }
        }));
    }
    // A note handed out before its acknowledgement may reach several callers.
    let mut collected = HashSet::new();
    for task in tasks {
        if let Some(note) = task.await.unwrap().unwrap() {
            assert_eq!(note.value, 30);
            collected.insert(note.name);
        }
    }
    let withdrawn = 30 * collected.len() as i64;

    assert!(!collected.is_empty());
    assert_eq!(authority.max_in_flight(URL_A), 1);
    let safe = cashier.ledger().safe_notes(1).unwrap();
    assert_eq!(safe.len(), 1);
    assert_eq!(safe[0].value, 1_000 + 250 - withdrawn);
    assert_eq!(
        cashier.ledger().balance(1, 1).unwrap(),
        Some(1_250 - withdrawn)
    );
    assert!(cashier.ledger().counter_entries(1).unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_currencies_lock_independently() {
    let authority = Arc::new(InstrumentedAuthority::new(Duration::from_millis(2)));
    let cashier = Arc::new(cashier_with(SqliteStore::in_memory().unwrap(), &authority));

    let mut tasks = Vec::new();
    for index in 0..8 {
        let cashier = Arc::clone(&cashier);
        let url = if index % 2 == 0 { URL_A } else { URL_B };
        tasks.push(tokio::spawn(async move {
            cashier.cash_in(&deposit(1, url, index, 5)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(authority.max_in_flight(URL_A), 1);
    assert_eq!(authority.max_in_flight(URL_B), 1);
    let serial_a = cashier.registry().lookup(URL_A).unwrap().unwrap();
    let serial_b = cashier.registry().lookup(URL_B).unwrap().unwrap();
    assert_ne!(serial_a, serial_b);
    assert_eq!(cashier.ledger().safe_notes(serial_a).unwrap()[0].value, 20);
    assert_eq!(cashier.ledger().safe_notes(serial_b).unwrap()[0].value, 20);
}

#[test]
fn test_concurrent_registration_agrees_on_serial() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cashier.db");
    // Create the schema up front so the racers only contend on the insert.
    drop(SqliteStore::open(&path).unwrap());

    let racers = 6;
    let barrier = Arc::new(Barrier::new(racers));
    let handles: Vec<_> = (0..racers)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let registry = CurrencyRegistry::new(SqliteStore::open(&path).unwrap(), true);
                barrier.wait();
                registry.get_currency_serial("http://race").unwrap()
            })
        })
        .collect();

    let serials: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    assert!(serials.iter().all(|serial| *serial == serials[0]));

    let registry = CurrencyRegistry::new(SqliteStore::open(&path).unwrap(), false);
    assert_eq!(registry.lookup("http://race").unwrap(), Some(serials[0]));
}
