use std::sync::Arc;

use crate::{
    error::LedgerError,
    model::{MinorUnits, WalletId},
    store::EventLedger,
    wallet::WalletState,
};

/// Derives balances by replaying the event log; nothing is cached.
pub struct BalanceCalculator<S> {
    store: Arc<S>,
}

impl<S> Clone for BalanceCalculator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: EventLedger> BalanceCalculator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn wallet(&self, wallet: WalletId) -> Result<WalletState, LedgerError> {
        let events = self.store.events_for_wallet(wallet)?;
        WalletState::replay(wallet, &events)
    }

    pub fn balance(&self, wallet: WalletId) -> Result<MinorUnits, LedgerError> {
        Ok(self.wallet(wallet)?.balance())
    }
}
