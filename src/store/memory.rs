use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::model::{
    Direction, EventId, PaymentRequest, Purpose, RequestId, RequestStatus, Transaction,
    TransactionEvent, TransactionId, TransactionStatus, TransferRef, UserId, WalletId,
};

use super::{
    EventLedger, PaymentRequestStore, StorageError, Store, TransactionStore, Write, WriteBatch,
    journal::Journal,
};

#[derive(Default)]
struct Tables {
    transactions: HashMap<TransactionId, Transaction>,
    refs: HashMap<(TransferRef, Direction), TransactionId>,
    by_request: HashMap<RequestId, Vec<TransactionId>>,
    events: Vec<TransactionEvent>,
    event_ids: HashSet<EventId>,
    events_by_wallet: HashMap<WalletId, Vec<usize>>,
    events_by_transaction: HashMap<TransactionId, Vec<usize>>,
    requests: HashMap<RequestId, PaymentRequest>,
    requests_by_payer: HashMap<UserId, Vec<RequestId>>,
}

impl Tables {
    fn check(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        let mut new_transactions = HashSet::new();
        let mut new_refs = HashSet::new();
        let mut new_events = HashSet::new();
        let mut new_requests = HashSet::new();

        for write in batch.writes() {
            match write {
                Write::InsertTransaction(tx) => {
                    if tx.amount <= 0 {
                        return Err(StorageError::InvalidRecord(format!(
                            "transaction {} has non-positive amount {}",
                            tx.id, tx.amount
                        )));
                    }
                    if self.transactions.contains_key(&tx.id) || !new_transactions.insert(tx.id) {
                        return Err(StorageError::StaleWrite(format!(
                            "transaction {} already exists",
                            tx.id
                        )));
                    }
                    let key = (tx.reference.clone(), tx.direction);
                    if self.refs.contains_key(&key) || !new_refs.insert(key) {
                        return Err(StorageError::DuplicateRef(tx.reference.clone()));
                    }
                }
                Write::UpdateTransaction {
                    expected,
                    transaction,
                } => {
                    let stored = self.transactions.get(&transaction.id).ok_or_else(|| {
                        StorageError::MissingRecord(format!("transaction {}", transaction.id))
                    })?;
                    if stored.status != *expected {
                        return Err(StorageError::StaleWrite(format!(
                            "transaction {} is {:?}, expected {:?}",
                            stored.id, stored.status, expected
                        )));
                    }
                    if stored.reference != transaction.reference
                        || stored.direction != transaction.direction
                        || stored.amount != transaction.amount
                    {
                        return Err(StorageError::InvalidRecord(format!(
                            "immutable fields of transaction {} changed",
                            stored.id
                        )));
                    }
                }
                Write::AppendEvent(evt) => {
                    if evt.amount <= 0 {
                        return Err(StorageError::InvalidRecord(format!(
                            "event {} has non-positive amount {}",
                            evt.id, evt.amount
                        )));
                    }
                    if !self.transactions.contains_key(&evt.transaction_id)
                        && !new_transactions.contains(&evt.transaction_id)
                    {
                        return Err(StorageError::MissingRecord(format!(
                            "transaction {} for event {}",
                            evt.transaction_id, evt.id
                        )));
                    }
                    if self.event_ids.contains(&evt.id) || !new_events.insert(evt.id) {
                        return Err(StorageError::StaleWrite(format!(
                            "event {} already exists",
                            evt.id
                        )));
                    }
                }
                Write::InsertRequest(req) => {
                    if self.requests.contains_key(&req.id) || !new_requests.insert(req.id) {
                        return Err(StorageError::StaleWrite(format!(
                            "payment request {} already exists",
                            req.id
                        )));
                    }
                }
                Write::UpdateRequest {
                    expected_revision,
                    request,
                } => {
                    let stored = self.requests.get(&request.id).ok_or_else(|| {
                        StorageError::MissingRecord(format!("payment request {}", request.id))
                    })?;
                    if stored.revision != *expected_revision {
                        return Err(StorageError::StaleWrite(format!(
                            "payment request {} is at revision {}, expected {}",
                            stored.id, stored.revision, expected_revision
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, batch: WriteBatch) {
        for write in batch.into_writes() {
            match write {
                Write::InsertTransaction(tx) => {
                    self.refs
                        .insert((tx.reference.clone(), tx.direction), tx.id);
                    if let Some(request) = tx.payment_request {
                        self.by_request.entry(request).or_default().push(tx.id);
                    }
                    self.transactions.insert(tx.id, tx);
                }
                Write::UpdateTransaction { transaction, .. } => {
                    self.transactions.insert(transaction.id, transaction);
                }
                Write::AppendEvent(evt) => {
                    let idx = self.events.len();
                    self.event_ids.insert(evt.id);
                    self.events_by_wallet
                        .entry(evt.wallet_id)
                        .or_default()
                        .push(idx);
                    self.events_by_transaction
                        .entry(evt.transaction_id)
                        .or_default()
                        .push(idx);
                    self.events.push(evt);
                }
                Write::InsertRequest(req) => {
                    self.requests_by_payer
                        .entry(req.payer)
                        .or_default()
                        .push(req.id);
                    self.requests.insert(req.id, req);
                }
                Write::UpdateRequest { request, .. } => {
                    self.requests.insert(request.id, request);
                }
            }
        }
    }

    fn events_at(&self, indexes: Option<&Vec<usize>>) -> Vec<TransactionEvent> {
        indexes
            .map(|idx| idx.iter().map(|i| self.events[*i].clone()).collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct State {
    tables: Tables,
    journal: Option<Journal<WriteBatch>>,
}

/// Store keeping all records in memory, optionally backed by an append-only journal.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    injected_failures: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store persisted to the journal at `path`, replaying what is already there.
    pub fn with_journal(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let (journal, batches) = Journal::open(path)?;
        let mut tables = Tables::default();
        let replayed = batches.len();
        for (line, batch) in batches {
            tables.check(&batch).map_err(|err| StorageError::Corrupt {
                line,
                reason: err.to_string(),
            })?;
            tables.apply(batch);
        }
        info!(path = %path.display(), batches = replayed, "Journal replayed");
        Ok(Self {
            state: RwLock::new(State {
                tables,
                journal: Some(journal),
            }),
            injected_failures: AtomicUsize::new(0),
        })
    }

    /// Makes the next `count` commits fail with [`StorageError::Unavailable`].
    pub fn fail_next_commits(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }
}

impl Store for MemoryStore {
    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StorageError::Unavailable);
        }
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        state.tables.check(&batch)?;
        if let Some(journal) = state.journal.as_mut() {
            journal.append(&batch)?;
        }
        debug!(writes = batch.len(), "Committing batch");
        state.tables.apply(batch);
        Ok(())
    }
}

impl TransactionStore for MemoryStore {
    fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StorageError> {
        Ok(self.state.read().tables.transactions.get(&id).cloned())
    }

    fn transactions_by_ref(
        &self,
        reference: &TransferRef,
    ) -> Result<Vec<Transaction>, StorageError> {
        let state = self.state.read();
        let tables = &state.tables;
        Ok([Direction::Outgoing, Direction::Incoming]
            .into_iter()
            .filter_map(|direction| tables.refs.get(&(reference.clone(), direction)))
            .filter_map(|id| tables.transactions.get(id).cloned())
            .collect())
    }

    fn transactions_for_request(
        &self,
        request: RequestId,
    ) -> Result<Vec<Transaction>, StorageError> {
        let state = self.state.read();
        let tables = &state.tables;
        Ok(tables
            .by_request
            .get(&request)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.transactions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn pending_transactions(&self) -> Result<Vec<Transaction>, StorageError> {
        Ok(self
            .state
            .read()
            .tables
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Pending)
            .cloned()
            .collect())
    }

    fn feed(&self, users: &[UserId], limit: usize) -> Result<Vec<Transaction>, StorageError> {
        let users: HashSet<UserId> = users.iter().copied().collect();
        let state = self.state.read();
        let mut items: Vec<Transaction> = state
            .tables
            .transactions
            .values()
            .filter(|tx| {
                tx.direction == Direction::Outgoing
                    && tx.purpose == Purpose::Transfer
                    && tx.status == TransactionStatus::Success
                    && tx.privacy != crate::model::Privacy::Private
                    && (users.contains(&tx.from) || users.contains(&tx.to))
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        items.truncate(limit);
        Ok(items)
    }

    fn all_transactions(&self) -> Result<Vec<Transaction>, StorageError> {
        Ok(self
            .state
            .read()
            .tables
            .transactions
            .values()
            .cloned()
            .collect())
    }
}

impl EventLedger for MemoryStore {
    fn events_for_wallet(&self, wallet: WalletId) -> Result<Vec<TransactionEvent>, StorageError> {
        let state = self.state.read();
        Ok(state
            .tables
            .events_at(state.tables.events_by_wallet.get(&wallet)))
    }

    fn events_for_transaction(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<TransactionEvent>, StorageError> {
        let state = self.state.read();
        Ok(state
            .tables
            .events_at(state.tables.events_by_transaction.get(&transaction)))
    }

    fn all_events(&self) -> Result<Vec<TransactionEvent>, StorageError> {
        Ok(self.state.read().tables.events.clone())
    }
}

impl PaymentRequestStore for MemoryStore {
    fn request(&self, id: RequestId) -> Result<Option<PaymentRequest>, StorageError> {
        Ok(self.state.read().tables.requests.get(&id).cloned())
    }

    fn requests_for_payer(&self, payer: UserId) -> Result<Vec<PaymentRequest>, StorageError> {
        let state = self.state.read();
        let tables = &state.tables;
        Ok(tables
            .requests_by_payer
            .get(&payer)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.requests.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn pending_requests(&self) -> Result<Vec<PaymentRequest>, StorageError> {
        Ok(self
            .state
            .read()
            .tables
            .requests
            .values()
            .filter(|req| req.status == RequestStatus::Pending)
            .cloned()
            .collect())
    }
}
