use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::{
    balance::BalanceCalculator,
    directory::WalletDirectory,
    error::LedgerError,
    model::{Purpose, Transaction, TransactionEvent, TransactionStatus, UserId, WalletId},
    store::{StorageError, Store, Write, WriteBatch},
    wallet::WalletState,
};

pub mod locks;

use locks::{WalletGuard, WalletLocks};

/// Result of recording a transfer intent.
#[derive(Debug)]
pub enum Initiation {
    /// The intent was stored and still has to be processed.
    Fresh(Transaction),
    /// The reference was already used; these are the legs recorded for it.
    Replay {
        primary: Transaction,
        mirror: Option<Transaction>,
    },
}

/// Terminal legs of a processed money movement.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub primary: Transaction,
    pub mirror: Option<Transaction>,
}

/// Legs and postings prepared for a single commit.
///
/// The locks of every wallet touched are held by this value, so the balances that were
/// checked cannot change until [`TransferProcessor::finalize`] has committed.
pub struct StagedTransfer {
    pub primary: Transaction,
    pub mirror: Option<Transaction>,
    postings: Result<Vec<TransactionEvent>, LedgerError>,
    _guards: Vec<WalletGuard>,
}

impl StagedTransfer {
    pub fn postings(&self) -> Result<&[TransactionEvent], &LedgerError> {
        self.postings.as_deref()
    }
}

/// The only writer of ledger events and of transaction status.
pub struct TransferProcessor<S> {
    store: Arc<S>,
    directory: Arc<dyn WalletDirectory>,
    balances: BalanceCalculator<S>,
    locks: WalletLocks,
}

impl<S: Store> TransferProcessor<S> {
    pub fn new(store: Arc<S>, directory: Arc<dyn WalletDirectory>) -> Self {
        Self {
            balances: BalanceCalculator::new(Arc::clone(&store)),
            store,
            directory,
            locks: WalletLocks::default(),
        }
    }

    /// Records a pending intent unless its reference was already used.
    pub fn initiate(&self, intent: Transaction) -> Result<Initiation, LedgerError> {
        let existing = self.store.transactions_by_ref(&intent.reference)?;
        if !existing.is_empty() {
            return self.replay(&intent, existing);
        }
        match self
            .store
            .commit(Write::InsertTransaction(intent.clone()).into())
        {
            Ok(()) => {
                debug!(reference = %intent.reference, purpose = ?intent.purpose, "Intent recorded");
                Ok(Initiation::Fresh(intent))
            }
            Err(StorageError::DuplicateRef(_)) => {
                // lost the race against a concurrent request with the same reference
                let existing = self.store.transactions_by_ref(&intent.reference)?;
                self.replay(&intent, existing)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn replay(
        &self,
        intent: &Transaction,
        existing: Vec<Transaction>,
    ) -> Result<Initiation, LedgerError> {
        let mut legs = existing.into_iter();
        let Some(primary) = legs.next() else {
            return Err(LedgerError::not_found(format!(
                "Transfer {}",
                intent.reference
            )));
        };
        if (primary.from, primary.to, primary.amount, primary.purpose)
            != (intent.from, intent.to, intent.amount, intent.purpose)
        {
            return Err(LedgerError::conflict(format!(
                "reference {} was already used for a different transfer",
                intent.reference
            )));
        }
        debug!(reference = %intent.reference, status = ?primary.status, "Replaying recorded transfer");
        Ok(Initiation::Replay {
            primary,
            mirror: legs.next(),
        })
    }

    /// Stages and finalizes a recorded intent according to its purpose.
    ///
    /// `follow_up` writes are committed together with a successful outcome only.
    pub fn process(
        &self,
        intent: Transaction,
        follow_up: Vec<Write>,
    ) -> Result<Settlement, LedgerError> {
        let staged = match intent.purpose {
            Purpose::Transfer => self.move_money(intent),
            Purpose::Deposit => self.stage_deposit(intent),
            Purpose::Withdrawal => self.stage_withdrawal(intent),
            Purpose::Reversal => StagedTransfer {
                primary: intent,
                mirror: None,
                postings: Err(LedgerError::validation("reversals are not supported")),
                _guards: Vec::new(),
            },
        };
        self.finalize(staged, follow_up)
    }

    /// Prepares both legs and both postings of a wallet-to-wallet transfer.
    ///
    /// The mirrored incoming leg exists even when staging fails, so both legs can be
    /// failed together.
    pub fn move_money(&self, mut outgoing: Transaction) -> StagedTransfer {
        let mut incoming = outgoing.mirror();
        let source = self.directory.primary_wallet(outgoing.from);
        let destination = self.directory.primary_wallet(outgoing.to);
        outgoing.wallet_id = source.as_ref().ok().copied();
        incoming.wallet_id = destination.as_ref().ok().copied();

        let (source, destination) = match (source, destination) {
            (Ok(source), Ok(destination)) => (source, destination),
            (Err(err), _) | (_, Err(err)) => {
                return StagedTransfer {
                    primary: outgoing,
                    mirror: Some(incoming),
                    postings: Err(err),
                    _guards: Vec::new(),
                };
            }
        };

        let guards = self.locks.lock_pair(source, destination);
        let postings = self.balances.wallet(source).and_then(|wallet| {
            let debit = wallet.debit(outgoing.id, outgoing.amount)?;
            let credit = self
                .balances
                .wallet(destination)?
                .credit(incoming.id, incoming.amount)?;
            Ok(vec![debit, credit])
        });
        StagedTransfer {
            primary: outgoing,
            mirror: Some(incoming),
            postings,
            _guards: guards,
        }
    }

    fn stage_deposit(&self, mut intent: Transaction) -> StagedTransfer {
        let wallet = match self.directory.primary_wallet(intent.to) {
            Ok(wallet) => wallet,
            Err(err) => {
                return StagedTransfer {
                    primary: intent,
                    mirror: None,
                    postings: Err(err),
                    _guards: Vec::new(),
                };
            }
        };
        intent.wallet_id = Some(wallet);
        let guard = self.locks.lock(wallet);
        let postings = self
            .balances
            .wallet(wallet)
            .and_then(|state| state.credit(intent.id, intent.amount))
            .map(|credit| vec![credit]);
        StagedTransfer {
            primary: intent,
            mirror: None,
            postings,
            _guards: vec![guard],
        }
    }

    fn stage_withdrawal(&self, mut intent: Transaction) -> StagedTransfer {
        let wallet = match self.directory.primary_wallet(intent.from) {
            Ok(wallet) => wallet,
            Err(err) => {
                return StagedTransfer {
                    primary: intent,
                    mirror: None,
                    postings: Err(err),
                    _guards: Vec::new(),
                };
            }
        };
        intent.wallet_id = Some(wallet);
        let guard = self.locks.lock(wallet);
        let postings = self
            .balances
            .wallet(wallet)
            .and_then(|state| state.debit(intent.id, intent.amount))
            .map(|debit| vec![debit]);
        StagedTransfer {
            primary: intent,
            mirror: None,
            postings,
            _guards: vec![guard],
        }
    }

    /// Commits the terminal state of a staged transfer in one batch.
    ///
    /// On success the batch holds both legs' success status, the mirror leg, the postings
    /// and `follow_up`. When staging failed, or the success batch is rejected, both legs
    /// are failed together instead and the error is returned.
    pub fn finalize(
        &self,
        staged: StagedTransfer,
        follow_up: Vec<Write>,
    ) -> Result<Settlement, LedgerError> {
        let StagedTransfer {
            primary,
            mirror,
            postings,
            _guards,
        } = staged;

        let events = match postings {
            Ok(events) => events,
            Err(err) => {
                warn!(reference = %primary.reference, error = %err, "Transfer rejected");
                self.record_failure(primary, mirror, &err);
                return Err(err);
            }
        };

        let now = Utc::now();
        let mut settled = primary.clone();
        settled.succeed(now);
        let settled_mirror = mirror.clone().map(|mut leg| {
            leg.succeed(now);
            leg
        });

        let mut batch = WriteBatch::new();
        batch.push(Write::UpdateTransaction {
            expected: TransactionStatus::Pending,
            transaction: settled.clone(),
        });
        if let Some(leg) = &settled_mirror {
            batch.push(Write::InsertTransaction(leg.clone()));
        }
        batch.extend(events.into_iter().map(Write::AppendEvent));
        batch.extend(follow_up);

        match self.store.commit(batch) {
            Ok(()) => {
                info!(
                    reference = %settled.reference,
                    purpose = ?settled.purpose,
                    from = settled.from,
                    to = settled.to,
                    amount = settled.amount,
                    "Transfer settled"
                );
                Ok(Settlement {
                    primary: settled,
                    mirror: settled_mirror,
                })
            }
            Err(err) => {
                error!(reference = %primary.reference, error = %err, "Failed to commit transfer");
                let err = LedgerError::from(err);
                self.record_failure(primary, mirror, &err);
                Err(err)
            }
        }
    }

    /// Fails the legs of a transfer together; no events are written.
    fn record_failure(
        &self,
        mut primary: Transaction,
        mirror: Option<Transaction>,
        reason: &LedgerError,
    ) {
        let now = Utc::now();
        let reason = reason.to_string();
        primary.fail(reason.clone(), now);
        let mut batch = WriteBatch::new();
        batch.push(Write::UpdateTransaction {
            expected: TransactionStatus::Pending,
            transaction: primary.clone(),
        });
        if let Some(mut leg) = mirror {
            leg.fail(reason, now);
            batch.push(Write::InsertTransaction(leg));
        }
        if let Err(err) = self.store.commit(batch) {
            // the intent stays pending and is failed later by reconciliation
            error!(reference = %primary.reference, error = %err, "Failed to record transfer failure");
        }
    }

    /// Fails an intent that was never settled. Only intents without postings qualify.
    pub fn expire_intent(&self, intent: &Transaction, reason: &str) -> Result<bool, LedgerError> {
        if intent.status != TransactionStatus::Pending {
            return Ok(false);
        }
        if !self.store.events_for_transaction(intent.id)?.is_empty() {
            error!(reference = %intent.reference, "Pending intent already has postings");
            return Ok(false);
        }
        let mut expired = intent.clone();
        expired.fail(reason, Utc::now());
        match self.store.commit(
            Write::UpdateTransaction {
                expected: TransactionStatus::Pending,
                transaction: expired,
            }
            .into(),
        ) {
            Ok(()) => {
                warn!(reference = %intent.reference, "Expired unsettled intent");
                Ok(true)
            }
            // settled concurrently
            Err(StorageError::StaleWrite(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn balances(&self) -> &BalanceCalculator<S> {
        &self.balances
    }

    pub fn primary_wallet(&self, user: UserId) -> Result<WalletId, LedgerError> {
        self.directory.primary_wallet(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::{Deposit, SendMoney, Withdraw},
        directory::MemoryDirectory,
        model::{Direction, EventKind, Privacy, TransferRef},
        store::{EventLedger, MemoryStore, TransactionStore},
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        processor: TransferProcessor<MemoryStore>,
    }

    fn fixture(users: &[u64]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        for user in users {
            directory.open_wallet(*user).unwrap();
        }
        Fixture {
            processor: TransferProcessor::new(store.clone(), directory),
            store,
        }
    }

    fn fresh(initiation: Initiation) -> Transaction {
        match initiation {
            Initiation::Fresh(tx) => tx,
            Initiation::Replay { .. } => panic!("expected a fresh intent"),
        }
    }

    fn fund(f: &Fixture, user: u64, amount: i64) {
        let intent = Deposit {
            user,
            amount,
            description: "seed".to_string(),
            reference: None,
        }
        .into_intent()
        .unwrap();
        let intent = fresh(f.processor.initiate(intent).unwrap());
        f.processor.process(intent, vec![]).unwrap();
    }

    fn transfer(from: u64, to: u64, amount: i64) -> Transaction {
        SendMoney {
            from,
            to,
            amount,
            description: "test".to_string(),
            privacy: Privacy::Public,
            reference: None,
        }
        .into_intent()
        .unwrap()
    }

    #[test]
    fn transfer_posts_debit_and_credit() {
        let f = fixture(&[1, 2]);
        fund(&f, 1, 1000);
        let intent = fresh(f.processor.initiate(transfer(1, 2, 400)).unwrap());
        let settlement = f.processor.process(intent, vec![]).unwrap();

        let incoming = settlement.mirror.unwrap();
        assert_eq!(settlement.primary.status, TransactionStatus::Success);
        assert_eq!(incoming.status, TransactionStatus::Success);
        assert_eq!(incoming.reference, settlement.primary.reference);
        assert_eq!(settlement.primary.wallet_id, Some(1));
        assert_eq!(incoming.wallet_id, Some(2));

        let debit = f
            .store
            .events_for_transaction(settlement.primary.id)
            .unwrap();
        assert_eq!(debit.len(), 1);
        assert_eq!((debit[0].kind, debit[0].amount), (EventKind::Debit, 400));
        let credit = f.store.events_for_transaction(incoming.id).unwrap();
        assert_eq!((credit[0].kind, credit[0].wallet_id), (EventKind::Credit, 2));

        assert_eq!(f.processor.balances().balance(1).unwrap(), 600);
        assert_eq!(f.processor.balances().balance(2).unwrap(), 400);
    }

    #[test]
    fn insufficient_balance_fails_both_legs_without_events() {
        let f = fixture(&[1, 2]);
        fund(&f, 1, 100);
        let intent = fresh(f.processor.initiate(transfer(1, 2, 101)).unwrap());
        let reference = intent.reference.clone();
        let err = f.processor.process(intent, vec![]).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        let legs = f.store.transactions_by_ref(&reference).unwrap();
        assert_eq!(legs.len(), 2);
        for leg in &legs {
            assert_eq!(leg.status, TransactionStatus::Failed);
            assert_eq!(leg.failure_reason.as_deref(), Some(err.to_string().as_str()));
            assert!(f.store.events_for_transaction(leg.id).unwrap().is_empty());
        }
        assert_eq!(f.processor.balances().balance(1).unwrap(), 100);
    }

    #[test]
    fn unknown_destination_fails_both_legs() {
        let f = fixture(&[1]);
        fund(&f, 1, 100);
        let intent = fresh(f.processor.initiate(transfer(1, 9, 10)).unwrap());
        let reference = intent.reference.clone();
        let err = f.processor.process(intent, vec![]).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        let legs = f.store.transactions_by_ref(&reference).unwrap();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[1].direction, Direction::Incoming);
        assert!(legs.iter().all(|leg| leg.status == TransactionStatus::Failed));
        assert_eq!(legs[1].wallet_id, None);
    }

    #[test]
    fn rejected_commit_fails_both_legs() {
        let f = fixture(&[1, 2]);
        fund(&f, 1, 100);
        let intent = fresh(f.processor.initiate(transfer(1, 2, 50)).unwrap());
        let reference = intent.reference.clone();
        f.store.fail_next_commits(1);
        let err = f.processor.process(intent, vec![]).unwrap_err();
        assert!(matches!(err, LedgerError::Persistence(StorageError::Unavailable)));

        let legs = f.store.transactions_by_ref(&reference).unwrap();
        assert!(legs.iter().all(|leg| leg.status == TransactionStatus::Failed));
        assert_eq!(f.processor.balances().balance(1).unwrap(), 100);
        assert_eq!(f.processor.balances().balance(2).unwrap(), 0);
    }

    #[test]
    fn duplicate_reference_is_replayed() {
        let f = fixture(&[1, 2]);
        fund(&f, 1, 100);
        let mut intent = transfer(1, 2, 30);
        intent.reference = TransferRef::new("same");
        let first = fresh(f.processor.initiate(intent.clone()).unwrap());
        f.processor.process(first, vec![]).unwrap();

        let mut retry = transfer(1, 2, 30);
        retry.reference = TransferRef::new("same");
        let Initiation::Replay { primary, mirror } = f.processor.initiate(retry).unwrap() else {
            panic!("expected a replay");
        };
        assert_eq!(primary.direction, Direction::Outgoing);
        assert_eq!(primary.status, TransactionStatus::Success);
        assert_eq!(mirror.map(|leg| leg.status), Some(TransactionStatus::Success));

        let mut different = transfer(1, 2, 31);
        different.reference = TransferRef::new("same");
        assert!(matches!(
            f.processor.initiate(different),
            Err(LedgerError::Conflict(_))
        ));
    }

    #[test]
    fn staged_postings_are_committed_by_finalize() {
        let f = fixture(&[1, 2]);
        fund(&f, 1, 100);
        let intent = fresh(f.processor.initiate(transfer(1, 2, 40)).unwrap());
        let staged = f.processor.move_money(intent);

        let postings = staged.postings().unwrap();
        assert_eq!(postings.len(), 2);
        assert_eq!(
            (postings[0].kind, postings[0].wallet_id, postings[0].amount),
            (EventKind::Debit, 1, 40)
        );
        assert_eq!(
            (postings[1].kind, postings[1].wallet_id, postings[1].amount),
            (EventKind::Credit, 2, 40)
        );
        assert_eq!(f.processor.balances().balance(2).unwrap(), 0);

        f.processor.finalize(staged, vec![]).unwrap();
        assert_eq!(f.processor.balances().balance(1).unwrap(), 60);
        assert_eq!(f.processor.balances().balance(2).unwrap(), 40);
    }

    #[test]
    fn deposit_into_full_wallet_is_rejected() {
        let f = fixture(&[1]);
        fund(&f, 1, i64::MAX);
        let intent = Deposit {
            user: 1,
            amount: 1,
            description: String::new(),
            reference: None,
        }
        .into_intent()
        .unwrap();
        let intent = fresh(f.processor.initiate(intent).unwrap());
        let err = f.processor.process(intent, vec![]).unwrap_err();

        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(f.processor.balances().balance(1).unwrap(), i64::MAX);
    }

    #[test]
    fn transfer_into_full_wallet_fails_both_legs() {
        let f = fixture(&[1, 2]);
        fund(&f, 1, 10);
        fund(&f, 2, i64::MAX);
        let intent = fresh(f.processor.initiate(transfer(1, 2, 5)).unwrap());
        let reference = intent.reference.clone();
        let staged = f.processor.move_money(intent);
        assert!(matches!(staged.postings(), Err(LedgerError::Validation(_))));

        assert!(f.processor.finalize(staged, vec![]).is_err());
        let legs = f.store.transactions_by_ref(&reference).unwrap();
        assert_eq!(legs.len(), 2);
        assert!(legs.iter().all(|leg| leg.status == TransactionStatus::Failed));
        assert_eq!(f.processor.balances().balance(1).unwrap(), 10);
        assert_eq!(f.processor.balances().balance(2).unwrap(), i64::MAX);
    }

    #[test]
    fn withdrawal_is_balance_guarded() {
        let f = fixture(&[1]);
        fund(&f, 1, 100);
        let withdraw = |amount| {
            Withdraw {
                user: 1,
                amount,
                description: "atm".to_string(),
                reference: None,
            }
            .into_intent()
            .unwrap()
        };
        let intent = fresh(f.processor.initiate(withdraw(150)).unwrap());
        assert!(matches!(
            f.processor.process(intent, vec![]),
            Err(LedgerError::InsufficientBalance { .. })
        ));
        let intent = fresh(f.processor.initiate(withdraw(60)).unwrap());
        let settlement = f.processor.process(intent, vec![]).unwrap();
        assert!(settlement.mirror.is_none());
        assert_eq!(f.processor.balances().balance(1).unwrap(), 40);
    }

    #[test]
    fn expire_intent_only_touches_pending() {
        let f = fixture(&[1, 2]);
        let intent = fresh(f.processor.initiate(transfer(1, 2, 5)).unwrap());
        assert!(f.processor.expire_intent(&intent, "interrupted").unwrap());
        // second pass sees the stored status moved on
        assert!(!f.processor.expire_intent(&intent, "interrupted").unwrap());
        let stored = f.store.transaction(intent.id).unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("interrupted"));
    }
}
