use std::collections::HashSet;

use crate::{
    error::LedgerError,
    model::{
        Direction, MinorUnits, PaymentRequest, Privacy, Purpose, Transaction, TransactionId,
        TransferRef, UserId,
    },
};

/// Peer-to-peer transfer from one user's primary wallet to another's.
#[derive(Debug, Clone)]
pub struct SendMoney {
    pub from: UserId,
    pub to: UserId,
    pub amount: MinorUnits,
    pub description: String,
    pub privacy: Privacy,
    /// Caller-chosen idempotency token; generated when absent.
    pub reference: Option<TransferRef>,
}

/// Money entering a user's wallet from outside the ledger.
#[derive(Debug, Clone)]
pub struct Deposit {
    pub user: UserId,
    pub amount: MinorUnits,
    pub description: String,
    pub reference: Option<TransferRef>,
}

/// Money leaving a user's wallet to outside the ledger.
#[derive(Debug, Clone)]
pub struct Withdraw {
    pub user: UserId,
    pub amount: MinorUnits,
    pub description: String,
    pub reference: Option<TransferRef>,
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub requester: UserId,
    pub payer: UserId,
    pub amount: MinorUnits,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct SplitBill {
    pub original: TransactionId,
    pub requester: UserId,
    pub friends: Vec<UserId>,
}

fn positive(amount: MinorUnits) -> Result<MinorUnits, LedgerError> {
    if amount > 0 {
        Ok(amount)
    } else {
        Err(LedgerError::validation(format!(
            "amount must be positive, got {amount}"
        )))
    }
}

impl SendMoney {
    pub fn into_intent(self) -> Result<Transaction, LedgerError> {
        let amount = positive(self.amount)?;
        if self.from == self.to {
            return Err(LedgerError::validation(format!(
                "user {} cannot send money to themselves",
                self.from
            )));
        }
        Ok(Transaction::intent(
            self.reference.unwrap_or_else(TransferRef::generate),
            self.from,
            self.to,
            amount,
            self.description,
            Direction::Outgoing,
            Purpose::Transfer,
            self.privacy,
        ))
    }
}

impl Deposit {
    pub fn into_intent(self) -> Result<Transaction, LedgerError> {
        Ok(Transaction::intent(
            self.reference.unwrap_or_else(TransferRef::generate),
            self.user,
            self.user,
            positive(self.amount)?,
            self.description,
            Direction::Incoming,
            Purpose::Deposit,
            Privacy::Private,
        ))
    }
}

impl Withdraw {
    pub fn into_intent(self) -> Result<Transaction, LedgerError> {
        Ok(Transaction::intent(
            self.reference.unwrap_or_else(TransferRef::generate),
            self.user,
            self.user,
            positive(self.amount)?,
            self.description,
            Direction::Outgoing,
            Purpose::Withdrawal,
            Privacy::Private,
        ))
    }
}

impl CreateRequest {
    pub fn into_request(self) -> Result<PaymentRequest, LedgerError> {
        let amount = positive(self.amount)?;
        if self.requester == self.payer {
            return Err(LedgerError::validation(format!(
                "user {} cannot request money from themselves",
                self.requester
            )));
        }
        Ok(PaymentRequest::new(
            self.requester,
            self.payer,
            amount,
            self.description,
        ))
    }
}

impl SplitBill {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.friends.is_empty() {
            return Err(LedgerError::validation("at least one friend is required"));
        }
        let mut seen = HashSet::new();
        for friend in &self.friends {
            if *friend == self.requester {
                return Err(LedgerError::validation(format!(
                    "requester {friend} cannot split a bill with themselves"
                )));
            }
            if !seen.insert(*friend) {
                return Err(LedgerError::validation(format!(
                    "friend {friend} is listed more than once"
                )));
            }
        }
        Ok(())
    }

    /// Requester plus friends.
    pub fn participants(&self) -> i64 {
        self.friends.len() as i64 + 1
    }
}
