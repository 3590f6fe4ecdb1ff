use thiserror::Error;

use crate::{
    model::{MinorUnits, WalletId},
    store::StorageError,
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Insufficient balance in wallet {wallet}: available {available}, required {required}")]
    InsufficientBalance {
        wallet: WalletId,
        available: MinorUnits,
        required: MinorUnits,
    },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Persistence(StorageError),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateRef(_) | StorageError::StaleWrite(_) => {
                Self::Conflict(err.to_string())
            }
            other => Self::Persistence(other),
        }
    }
}
