use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RawMutex, lock_api::ArcMutexGuard};

use crate::model::WalletId;

/// Held for the whole read-balance, decide, post sequence of a debiting wallet.
pub type WalletGuard = ArcMutexGuard<RawMutex, ()>;

/// One mutex per wallet, created on first use.
#[derive(Default)]
pub struct WalletLocks {
    locks: DashMap<WalletId, Arc<Mutex<()>>>,
}

impl WalletLocks {
    pub fn lock(&self, wallet: WalletId) -> WalletGuard {
        // the map shard must be released before blocking on the wallet mutex
        let lock = Arc::clone(&self.locks.entry(wallet).or_default());
        lock.lock_arc()
    }

    /// Locks both wallets in id order, so two transfers between the same pair cannot deadlock.
    pub fn lock_pair(&self, a: WalletId, b: WalletId) -> Vec<WalletGuard> {
        if a == b {
            return vec![self.lock(a)];
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first);
        vec![first, self.lock(second)]
    }
}
