use crate::{
    error::LedgerError,
    model::{EventKind, MinorUnits, TransactionEvent, TransactionId, WalletId},
};

/// Wallet state derived from its event history.
///
/// Events are the source of truth: [`WalletState::apply`] only guards the arithmetic, while
/// [`WalletState::debit`] and [`WalletState::credit`] decide whether a new posting is allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletState {
    wallet_id: WalletId,
    balance: MinorUnits,
    postings: usize,
}

impl WalletState {
    pub fn new(wallet_id: WalletId) -> Self {
        Self {
            wallet_id,
            balance: 0,
            postings: 0,
        }
    }

    pub fn replay<'a>(
        wallet_id: WalletId,
        events: impl IntoIterator<Item = &'a TransactionEvent>,
    ) -> Result<Self, LedgerError> {
        let mut state = Self::new(wallet_id);
        for event in events {
            state.apply(event)?;
        }
        Ok(state)
    }

    pub fn wallet_id(&self) -> WalletId {
        self.wallet_id
    }

    pub fn balance(&self) -> MinorUnits {
        self.balance
    }

    pub fn postings(&self) -> usize {
        self.postings
    }

    pub fn apply(&mut self, event: &TransactionEvent) -> Result<(), LedgerError> {
        debug_assert_eq!(event.wallet_id, self.wallet_id);
        self.balance = self
            .balance
            .checked_add(event.signed_amount())
            .ok_or_else(|| self.overflow(event.amount))?;
        self.postings += 1;
        Ok(())
    }

    fn overflow(&self, amount: MinorUnits) -> LedgerError {
        LedgerError::validation(format!(
            "balance {} of wallet {} cannot absorb {amount} more",
            self.balance, self.wallet_id
        ))
    }

    pub fn debit(
        &self,
        transaction_id: TransactionId,
        amount: MinorUnits,
    ) -> Result<TransactionEvent, LedgerError> {
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                wallet: self.wallet_id,
                available: self.balance,
                required: amount,
            });
        }
        Ok(TransactionEvent::new(
            transaction_id,
            self.wallet_id,
            EventKind::Debit,
            amount,
        ))
    }

    pub fn credit(
        &self,
        transaction_id: TransactionId,
        amount: MinorUnits,
    ) -> Result<TransactionEvent, LedgerError> {
        if self.balance.checked_add(amount).is_none() {
            return Err(self.overflow(amount));
        }
        Ok(TransactionEvent::new(
            transaction_id,
            self.wallet_id,
            EventKind::Credit,
            amount,
        ))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn apply_events() {
        let tx = Uuid::now_v7();
        let mut wallet = WalletState::new(1);
        wallet.apply(&TransactionEvent::new(tx, 1, EventKind::Credit, 1000)).unwrap();
        assert_eq!(wallet.balance(), 1000);
        wallet.apply(&TransactionEvent::new(tx, 1, EventKind::Debit, 300)).unwrap();
        assert_eq!(wallet.balance(), 700);
        // events are not validated against the balance when applied
        wallet.apply(&TransactionEvent::new(tx, 1, EventKind::Debit, 900)).unwrap();
        assert_eq!(wallet.balance(), -200);
        assert_eq!(wallet.postings(), 3);
    }

    #[test]
    fn debit_requires_funds() {
        let tx = Uuid::now_v7();
        let events = vec![TransactionEvent::new(tx, 5, EventKind::Credit, 1000)];
        let wallet = WalletState::replay(5, &events).unwrap();

        let evt = wallet.debit(tx, 1000).unwrap();
        assert_eq!(evt.kind, EventKind::Debit);
        assert_eq!(evt.wallet_id, 5);

        let err = wallet.debit(tx, 1001).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                wallet: 5,
                available: 1000,
                required: 1001
            }
        ));
    }

    #[test]
    fn credit_needs_no_funds() {
        let wallet = WalletState::new(2);
        let evt = wallet.credit(Uuid::now_v7(), 25).unwrap();
        assert_eq!(evt.kind, EventKind::Credit);
        assert_eq!(evt.signed_amount(), 25);
    }

    #[test]
    fn credit_past_max_balance_is_rejected() {
        let tx = Uuid::now_v7();
        let events = vec![TransactionEvent::new(tx, 3, EventKind::Credit, i64::MAX)];
        let wallet = WalletState::replay(3, &events).unwrap();
        assert!(matches!(
            wallet.credit(tx, 1),
            Err(LedgerError::Validation(_))
        ));
        assert!(wallet.credit(tx, 0).is_ok());
    }

    #[test]
    fn replay_reports_overflowing_history() {
        let tx = Uuid::now_v7();
        let events = vec![
            TransactionEvent::new(tx, 3, EventKind::Credit, i64::MAX),
            TransactionEvent::new(tx, 3, EventKind::Credit, 1),
        ];
        assert!(matches!(
            WalletState::replay(3, &events),
            Err(LedgerError::Validation(_))
        ));
    }
}
