use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    PaymentRequest, RequestId, Transaction, TransactionEvent, TransactionId, TransactionStatus,
    TransferRef, UserId, WalletId,
};

pub(crate) mod journal;
pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode or decode a record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Journal is corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
    #[error("Reference {0} is already in use")]
    DuplicateRef(TransferRef),
    #[error("Stale write: {0}")]
    StaleWrite(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Missing record: {0}")]
    MissingRecord(String),
    #[error("Storage is unavailable")]
    Unavailable,
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Write {
    InsertTransaction(Transaction),
    /// Replaces a transaction whose stored status still equals `expected`.
    UpdateTransaction {
        expected: TransactionStatus,
        transaction: Transaction,
    },
    AppendEvent(TransactionEvent),
    InsertRequest(PaymentRequest),
    /// Replaces a request whose stored revision still equals `expected_revision`.
    UpdateRequest {
        expected_revision: u64,
        request: PaymentRequest,
    },
}

/// Writes that commit together or not at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) -> &mut Self {
        self.writes.push(write);
        self
    }

    pub fn extend(&mut self, writes: impl IntoIterator<Item = Write>) -> &mut Self {
        self.writes.extend(writes);
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

impl From<Write> for WriteBatch {
    fn from(write: Write) -> Self {
        Self {
            writes: vec![write],
        }
    }
}

pub trait TransactionStore: Send + Sync {
    fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StorageError>;

    /// All legs sharing `reference`, outgoing first.
    fn transactions_by_ref(&self, reference: &TransferRef)
    -> Result<Vec<Transaction>, StorageError>;

    fn transactions_for_request(
        &self,
        request: RequestId,
    ) -> Result<Vec<Transaction>, StorageError>;

    fn pending_transactions(&self) -> Result<Vec<Transaction>, StorageError>;

    /// Successful outgoing transfer legs touching any of `users` and not private,
    /// most recent first.
    fn feed(&self, users: &[UserId], limit: usize) -> Result<Vec<Transaction>, StorageError>;

    fn all_transactions(&self) -> Result<Vec<Transaction>, StorageError>;
}

pub trait EventLedger: Send + Sync {
    fn events_for_wallet(&self, wallet: WalletId) -> Result<Vec<TransactionEvent>, StorageError>;

    fn events_for_transaction(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<TransactionEvent>, StorageError>;

    fn all_events(&self) -> Result<Vec<TransactionEvent>, StorageError>;
}

pub trait PaymentRequestStore: Send + Sync {
    fn request(&self, id: RequestId) -> Result<Option<PaymentRequest>, StorageError>;

    fn requests_for_payer(&self, payer: UserId) -> Result<Vec<PaymentRequest>, StorageError>;

    fn pending_requests(&self) -> Result<Vec<PaymentRequest>, StorageError>;
}

/// Full persistence capability used by the ledger.
pub trait Store: TransactionStore + EventLedger + PaymentRequestStore {
    /// Validates every write against the current state (and the writes before it in the
    /// same batch) and applies all of them, or none.
    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError>;
}
