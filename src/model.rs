use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = u64;
pub type WalletId = u64;
pub type TransactionId = Uuid;
pub type EventId = Uuid;
pub type RequestId = Uuid;

/// Amounts are always expressed in the smallest currency denomination.
pub type MinorUnits = i64;

/// Idempotency token shared by both legs of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferRef(String);

impl TransferRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Transfer,
    Deposit,
    Withdrawal,
    Reversal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    Friends,
    #[default]
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Paid,
    Declined,
}

/// One leg of a money movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub reference: TransferRef,
    pub from: UserId,
    pub to: UserId,
    pub wallet_id: Option<WalletId>,
    pub amount: MinorUnits,
    pub description: String,
    pub direction: Direction,
    pub purpose: Purpose,
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    pub privacy: Privacy,
    /// Set when the transfer settles a [`PaymentRequest`].
    pub payment_request: Option<RequestId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A pending leg as recorded at initiation.
    #[allow(clippy::too_many_arguments)]
    pub fn intent(
        reference: TransferRef,
        from: UserId,
        to: UserId,
        amount: MinorUnits,
        description: String,
        direction: Direction,
        purpose: Purpose,
        privacy: Privacy,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            reference,
            from,
            to,
            wallet_id: None,
            amount,
            description,
            direction,
            purpose,
            status: TransactionStatus::Pending,
            failure_reason: None,
            privacy,
            payment_request: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The incoming counterpart of an outgoing transfer leg.
    pub fn mirror(&self) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            wallet_id: None,
            direction: Direction::Incoming,
            purpose: Purpose::Transfer,
            status: TransactionStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn succeed(&mut self, at: DateTime<Utc>) {
        debug_assert!(!self.status.is_terminal());
        self.status = TransactionStatus::Success;
        self.failure_reason = None;
        self.updated_at = at;
    }

    pub fn fail(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        debug_assert!(!self.status.is_terminal());
        self.status = TransactionStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = at;
    }
}

/// Immutable ledger posting against a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub id: EventId,
    pub transaction_id: TransactionId,
    pub wallet_id: WalletId,
    pub kind: EventKind,
    pub amount: MinorUnits,
    pub created_at: DateTime<Utc>,
}

impl TransactionEvent {
    pub fn new(
        transaction_id: TransactionId,
        wallet_id: WalletId,
        kind: EventKind,
        amount: MinorUnits,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            transaction_id,
            wallet_id,
            kind,
            amount,
            created_at: Utc::now(),
        }
    }

    /// Contribution of this posting to the wallet balance.
    pub fn signed_amount(&self) -> MinorUnits {
        match self.kind {
            EventKind::Credit => self.amount,
            EventKind::Debit => -self.amount,
        }
    }
}

/// An IOU from `payer` to `requester`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: RequestId,
    pub requester: UserId,
    pub payer: UserId,
    pub amount: MinorUnits,
    pub description: String,
    pub status: RequestStatus,
    pub settled_by: Option<TransferRef>,
    /// Bumped on every update, used for compare-and-set at commit.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRequest {
    pub fn new(requester: UserId, payer: UserId, amount: MinorUnits, description: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            requester,
            payer,
            amount,
            description,
            status: RequestStatus::Pending,
            settled_by: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Next revision of this request in `status`.
    pub fn resolved(&self, status: RequestStatus, settled_by: Option<TransferRef>) -> Self {
        Self {
            status,
            settled_by,
            revision: self.revision + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing(amount: MinorUnits) -> Transaction {
        Transaction::intent(
            TransferRef::new("ref-1"),
            1,
            2,
            amount,
            "rent".to_string(),
            Direction::Outgoing,
            Purpose::Transfer,
            Privacy::Public,
        )
    }

    #[test]
    fn mirror_shares_ref_and_amount() {
        let out = outgoing(500);
        let inc = out.mirror();
        assert_ne!(out.id, inc.id);
        assert_eq!(inc.reference, out.reference);
        assert_eq!(inc.amount, 500);
        assert_eq!(inc.direction, Direction::Incoming);
        assert_eq!(inc.status, TransactionStatus::Pending);
        assert_eq!(inc.privacy, Privacy::Public);
    }

    #[test]
    fn settle_sets_reason_only_on_failure() {
        let mut ok = outgoing(10);
        ok.succeed(Utc::now());
        assert_eq!(ok.status, TransactionStatus::Success);
        assert!(ok.failure_reason.is_none());

        let mut failed = outgoing(10);
        failed.fail("insufficient balance", Utc::now());
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("insufficient balance"));
    }

    #[test]
    fn signed_amounts() {
        let id = Uuid::now_v7();
        assert_eq!(TransactionEvent::new(id, 1, EventKind::Credit, 7).signed_amount(), 7);
        assert_eq!(TransactionEvent::new(id, 1, EventKind::Debit, 7).signed_amount(), -7);
    }

    #[test]
    fn resolved_request_bumps_revision() {
        let req = PaymentRequest::new(1, 2, 300, "tickets".to_string());
        let paid = req.resolved(RequestStatus::Paid, Some(TransferRef::new("r")));
        assert_eq!(paid.revision, 1);
        assert_eq!(paid.status, RequestStatus::Paid);
        assert_eq!(paid.id, req.id);
    }
}
