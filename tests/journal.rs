use std::{fs::OpenOptions, io::Write as _, sync::Arc};

use cash_ledger::{
    Ledger,
    command::{Deposit, SendMoney},
    config::Config,
    directory::MemoryDirectory,
    model::{Privacy, TransferRef},
    notify::LogNotifier,
    store::{MemoryStore, StorageError, TransactionStore},
};

fn open(path: &std::path::Path) -> Ledger<MemoryStore> {
    let directory = Arc::new(MemoryDirectory::new());
    directory.open_wallet(1).unwrap();
    directory.open_wallet(2).unwrap();
    let store = MemoryStore::with_journal(path).unwrap();
    Ledger::new(
        Arc::new(store),
        directory,
        Arc::new(LogNotifier),
        Config::default(),
    )
}

fn seed(ledger: &Ledger<MemoryStore>) {
    ledger
        .deposit(Deposit {
            user: 1,
            amount: 500,
            description: String::new(),
            reference: Some(TransferRef::new("d1")),
        })
        .unwrap();
    ledger
        .send_money(SendMoney {
            from: 1,
            to: 2,
            amount: 120,
            description: "books".to_string(),
            privacy: Privacy::Public,
            reference: Some(TransferRef::new("t1")),
        })
        .unwrap();
}

#[test]
fn reopened_store_replays_committed_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.journal");
    seed(&open(&path));

    let ledger = open(&path);
    assert_eq!(ledger.balance_of(1).unwrap().balance, 380);
    assert_eq!(ledger.balance_of(2).unwrap().balance, 120);
    assert_eq!(
        ledger
            .store()
            .transactions_by_ref(&TransferRef::new("t1"))
            .unwrap()
            .len(),
        2
    );
    assert!(ledger.audit().unwrap().is_clean());
}

#[test]
fn torn_tail_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.journal");
    seed(&open(&path));

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(br#"{"writes":[{"AppendEv"#).unwrap();
    drop(file);

    let ledger = open(&path);
    assert_eq!(ledger.balance_of(1).unwrap().balance, 380);
    // the journal stays usable after the torn record was cut off
    ledger
        .send_money(SendMoney {
            from: 2,
            to: 1,
            amount: 20,
            description: String::new(),
            privacy: Privacy::Private,
            reference: None,
        })
        .unwrap();
    drop(ledger);
    assert_eq!(open(&path).balance_of(2).unwrap().balance, 100);
}

#[test]
fn corrupt_interior_line_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.journal");
    std::fs::write(&path, "not json\n{\"writes\":[]}\n").unwrap();

    let result = MemoryStore::with_journal(&path);
    assert!(matches!(result, Err(StorageError::Corrupt { line: 1, .. })));
}
