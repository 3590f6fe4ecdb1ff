//! Repair pass over records left in non-terminal states, and a consistency audit of the
//! raw event log.
//!
//! Both are re-entrant and safe to run next to live traffic: every repair is a
//! compare-and-set write, so anything settled concurrently is left alone.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use crate::{
    error::LedgerError,
    model::{
        Direction, EventKind, Purpose, RequestStatus, TransactionEvent, TransactionId,
        TransactionStatus, TransferRef, WalletId,
    },
    processor::TransferProcessor,
    store::{StorageError, Store, Write},
    wallet::WalletState,
};

pub const INTERRUPTED: &str = "settlement interrupted";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub expired_intents: usize,
    pub repaired_requests: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub wallets_checked: usize,
    pub transactions_checked: usize,
    pub violations: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

pub struct Reconciler<S> {
    store: Arc<S>,
    processor: Arc<TransferProcessor<S>>,
    stale_after: TimeDelta,
}

impl<S: Store> Reconciler<S> {
    pub fn new(
        store: Arc<S>,
        processor: Arc<TransferProcessor<S>>,
        stale_after: std::time::Duration,
    ) -> Self {
        Self {
            store,
            processor,
            stale_after: TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn run(&self, now: DateTime<Utc>) -> Result<ReconcileReport, LedgerError> {
        let mut report = ReconcileReport::default();

        for intent in self.store.pending_transactions()? {
            if now.signed_duration_since(intent.created_at) < self.stale_after {
                continue;
            }
            if self.processor.expire_intent(&intent, INTERRUPTED)? {
                report.expired_intents += 1;
            }
        }

        for request in self.store.pending_requests()? {
            let settled = self
                .store
                .transactions_for_request(request.id)?
                .into_iter()
                .find(|tx| {
                    tx.direction == Direction::Outgoing && tx.status == TransactionStatus::Success
                });
            let Some(settled) = settled else {
                continue;
            };
            let paid = request.resolved(RequestStatus::Paid, Some(settled.reference.clone()));
            match self.store.commit(
                Write::UpdateRequest {
                    expected_revision: request.revision,
                    request: paid,
                }
                .into(),
            ) {
                Ok(()) => {
                    warn!(request = %request.id, reference = %settled.reference, "Marked settled request as paid");
                    report.repaired_requests += 1;
                }
                Err(StorageError::StaleWrite(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }

        info!(
            expired_intents = report.expired_intents,
            repaired_requests = report.repaired_requests,
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Checks the stored transactions against the raw event log.
    pub fn audit(&self) -> Result<AuditReport, LedgerError> {
        let transactions = self.store.all_transactions()?;
        let events = self.store.all_events()?;
        let mut violations = Vec::new();

        let mut wallets: BTreeMap<WalletId, WalletState> = BTreeMap::new();
        let mut postings: HashMap<TransactionId, Vec<&TransactionEvent>> = HashMap::new();
        for event in &events {
            let wallet = wallets
                .entry(event.wallet_id)
                .or_insert_with(|| WalletState::new(event.wallet_id));
            if let Err(err) = wallet.apply(event) {
                violations.push(format!("event {}: {err}", event.id));
            }
            postings.entry(event.transaction_id).or_default().push(event);
        }
        for wallet in wallets.values() {
            if wallet.balance() < 0 {
                violations.push(format!(
                    "wallet {} has negative balance {}",
                    wallet.wallet_id(),
                    wallet.balance()
                ));
            }
        }

        let mut legs_by_ref: HashMap<&TransferRef, Vec<TransactionStatus>> = HashMap::new();
        for tx in &transactions {
            legs_by_ref.entry(&tx.reference).or_default().push(tx.status);
            let posted = postings.get(&tx.id).map(Vec::as_slice).unwrap_or_default();
            if tx.status != TransactionStatus::Success {
                if !posted.is_empty() {
                    violations.push(format!(
                        "{:?} transaction {} has {} postings",
                        tx.status,
                        tx.id,
                        posted.len()
                    ));
                }
                continue;
            }
            let expected_kind = match tx.direction {
                Direction::Outgoing => EventKind::Debit,
                Direction::Incoming => EventKind::Credit,
            };
            let matches = posted.len() == 1
                && posted[0].kind == expected_kind
                && posted[0].amount == tx.amount
                && Some(posted[0].wallet_id) == tx.wallet_id;
            if !matches {
                violations.push(format!(
                    "transaction {} ({}) does not have exactly one {:?} of {}",
                    tx.id, tx.reference, expected_kind, tx.amount
                ));
            }
        }

        for tx in &transactions {
            let Some(statuses) = legs_by_ref.get(&tx.reference) else {
                continue;
            };
            let terminal: Vec<_> = statuses.iter().filter(|s| s.is_terminal()).collect();
            if terminal.windows(2).any(|pair| pair[0] != pair[1]) {
                violations.push(format!(
                    "legs of {} ended in different statuses",
                    tx.reference
                ));
            }
            if tx.purpose == Purpose::Transfer
                && tx.status == TransactionStatus::Success
                && statuses.len() != 2
            {
                violations.push(format!(
                    "settled transfer {} has {} legs",
                    tx.reference,
                    statuses.len()
                ));
            }
        }
        violations.sort();
        violations.dedup();

        Ok(AuditReport {
            wallets_checked: wallets.len(),
            transactions_checked: transactions.len(),
            violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::{Deposit, SendMoney},
        directory::MemoryDirectory,
        model::{PaymentRequest, Privacy, Transaction},
        processor::Initiation,
        store::{MemoryStore, PaymentRequestStore, TransactionStore, WriteBatch},
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        processor: Arc<TransferProcessor<MemoryStore>>,
        reconciler: Reconciler<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        directory.open_wallet(1).unwrap();
        directory.open_wallet(2).unwrap();
        let processor = Arc::new(TransferProcessor::new(store.clone(), directory));
        let reconciler = Reconciler::new(
            store.clone(),
            processor.clone(),
            std::time::Duration::from_secs(60),
        );
        Fixture {
            store,
            processor,
            reconciler,
        }
    }

    fn intent(from: u64, to: u64, amount: i64) -> Transaction {
        SendMoney {
            from,
            to,
            amount,
            description: String::new(),
            privacy: Privacy::Public,
            reference: None,
        }
        .into_intent()
        .unwrap()
    }

    fn settle(f: &Fixture, tx: Transaction) {
        let Initiation::Fresh(tx) = f.processor.initiate(tx).unwrap() else {
            panic!("fresh intent expected");
        };
        f.processor.process(tx, vec![]).unwrap();
    }

    #[test]
    fn expires_only_stale_intents() {
        let f = fixture();
        let Initiation::Fresh(stuck) = f.processor.initiate(intent(1, 2, 10)).unwrap() else {
            panic!("fresh intent expected");
        };

        let early = f.reconciler.run(stuck.created_at).unwrap();
        assert_eq!(early.expired_intents, 0);

        let later = stuck.created_at + TimeDelta::seconds(61);
        assert_eq!(f.reconciler.run(later).unwrap().expired_intents, 1);
        assert_eq!(f.reconciler.run(later).unwrap().expired_intents, 0);

        let stored = f.store.transaction(stuck.id).unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some(INTERRUPTED));
    }

    #[test]
    fn expired_intent_cannot_settle_afterwards() {
        let f = fixture();
        settle(
            &f,
            Deposit {
                user: 1,
                amount: 100,
                description: String::new(),
                reference: None,
            }
            .into_intent()
            .unwrap(),
        );
        let Initiation::Fresh(stuck) = f.processor.initiate(intent(1, 2, 10)).unwrap() else {
            panic!("fresh intent expected");
        };
        f.reconciler
            .run(stuck.created_at + TimeDelta::seconds(120))
            .unwrap();

        assert!(f.processor.process(stuck, vec![]).is_err());
        assert_eq!(f.processor.balances().balance(1).unwrap(), 100);
        assert!(f.reconciler.audit().unwrap().is_clean());
    }

    #[test]
    fn marks_request_paid_when_its_transfer_settled() {
        let f = fixture();
        settle(
            &f,
            Deposit {
                user: 2,
                amount: 100,
                description: String::new(),
                reference: None,
            }
            .into_intent()
            .unwrap(),
        );
        let request = PaymentRequest::new(1, 2, 40, String::new());
        f.store
            .commit(Write::InsertRequest(request.clone()).into())
            .unwrap();
        // transfer settled but the request update never happened
        let mut tx = intent(2, 1, 40);
        tx.payment_request = Some(request.id);
        let reference = tx.reference.clone();
        settle(&f, tx);

        let report = f.reconciler.run(Utc::now()).unwrap();
        assert_eq!(report.repaired_requests, 1);
        let stored = f.store.request(request.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Paid);
        assert_eq!(stored.settled_by, Some(reference));
        assert_eq!(f.reconciler.run(Utc::now()).unwrap().repaired_requests, 0);
    }

    #[test]
    fn audit_is_clean_after_normal_traffic() {
        let f = fixture();
        settle(
            &f,
            Deposit {
                user: 1,
                amount: 1000,
                description: String::new(),
                reference: None,
            }
            .into_intent()
            .unwrap(),
        );
        settle(&f, intent(1, 2, 300));
        let Initiation::Fresh(overdraft) = f.processor.initiate(intent(1, 2, 5000)).unwrap() else {
            panic!("fresh intent expected");
        };
        f.processor.process(overdraft, vec![]).unwrap_err();

        let report = f.reconciler.audit().unwrap();
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.wallets_checked, 2);
    }

    #[test]
    fn audit_reports_postings_on_failed_transactions() {
        let f = fixture();
        let mut tx = intent(1, 2, 10);
        tx.fail("broken", Utc::now());
        let mut batch = WriteBatch::new();
        batch
            .push(Write::InsertTransaction(tx.clone()))
            .push(Write::AppendEvent(TransactionEvent::new(
                tx.id,
                1,
                EventKind::Debit,
                10,
            )));
        f.store.commit(batch).unwrap();

        let report = f.reconciler.audit().unwrap();
        assert!(!report.is_clean());
        assert!(report.violations.iter().any(|v| v.contains("negative balance")));
        assert!(report.violations.iter().any(|v| v.contains("postings")));
    }
}
