use std::sync::Arc;

use tracing::{error, info};

use crate::{
    command::{CreateRequest, SplitBill},
    error::LedgerError,
    model::{Direction, MinorUnits, PaymentRequest, Purpose, TransactionStatus},
    requests::PaymentRequestEngine,
    store::Store,
};

#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub split_amount: MinorUnits,
    /// Part of the bill that is not requested from anyone; the requester keeps it.
    pub remainder: MinorUnits,
    pub requests: Vec<PaymentRequest>,
    pub requests_failed: usize,
}

impl SplitOutcome {
    pub fn requests_created(&self) -> usize {
        self.requests.len()
    }
}

/// Turns a settled payment into one request per friend.
///
/// Requests are created one by one; a failure is logged and counted, and requests
/// created before it are kept.
pub struct BillSplitter<S> {
    store: Arc<S>,
    requests: Arc<PaymentRequestEngine<S>>,
}

impl<S: Store> BillSplitter<S> {
    pub fn new(store: Arc<S>, requests: Arc<PaymentRequestEngine<S>>) -> Self {
        Self { store, requests }
    }

    pub fn split_bill(&self, command: SplitBill) -> Result<SplitOutcome, LedgerError> {
        command.validate()?;
        let original = self
            .store
            .transaction(command.original)?
            .ok_or_else(|| LedgerError::not_found(format!("Transaction {}", command.original)))?;
        if original.from != command.requester {
            return Err(LedgerError::conflict(format!(
                "only user {} who paid transaction {} can split it",
                original.from, original.id
            )));
        }
        if original.purpose != Purpose::Transfer
            || original.direction != Direction::Outgoing
            || original.status != TransactionStatus::Success
        {
            return Err(LedgerError::conflict(format!(
                "transaction {} is not a settled outgoing transfer",
                original.id
            )));
        }

        let participants = command.participants();
        let split_amount = original.amount / participants;
        let remainder = original.amount % participants;
        if split_amount == 0 {
            return Err(LedgerError::validation(format!(
                "amount {} cannot be split between {participants} participants",
                original.amount
            )));
        }

        let mut requests = Vec::with_capacity(command.friends.len());
        let mut requests_failed = 0;
        for friend in &command.friends {
            let created = self.requests.create_request(CreateRequest {
                requester: command.requester,
                payer: *friend,
                amount: split_amount,
                description: format!("Split bill: {}", original.description),
            });
            match created {
                Ok(request) => requests.push(request),
                Err(err) => {
                    error!(friend, transaction = %original.id, error = %err, "Failed to create split request");
                    requests_failed += 1;
                }
            }
        }
        info!(
            transaction = %original.id,
            split_amount,
            remainder,
            created = requests.len(),
            failed = requests_failed,
            "Bill split"
        );
        Ok(SplitOutcome {
            split_amount,
            remainder,
            requests,
            requests_failed,
        })
    }
}
