use std::{collections::BTreeMap, path::Path};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::LedgerError,
    model::{UserId, WalletId},
    store::{StorageError, journal::Journal},
};

/// Boundary into the user domain: which wallet a user pays from and into.
pub trait WalletDirectory: Send + Sync {
    fn primary_wallet(&self, user: UserId) -> Result<WalletId, LedgerError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct WalletEntry {
    user: UserId,
    wallet: WalletId,
}

#[derive(Default)]
struct Entries {
    by_user: BTreeMap<UserId, WalletId>,
    next_wallet: WalletId,
    journal: Option<Journal<WalletEntry>>,
}

impl Entries {
    fn insert(&mut self, entry: WalletEntry) {
        self.by_user.insert(entry.user, entry.wallet);
        self.next_wallet = self.next_wallet.max(entry.wallet);
    }
}

/// Wallet assignments kept in memory, optionally recorded in a journal so a user keeps
/// the same wallet across restarts.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: RwLock<Entries>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a directory persisted at `path`, restoring the wallets already assigned there.
    pub fn with_journal(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let (journal, records) = Journal::<WalletEntry>::open(path)?;
        let mut entries = Entries::default();
        for (line, entry) in records {
            let wallet_taken = entries.by_user.values().any(|w| *w == entry.wallet);
            if entries.by_user.contains_key(&entry.user) || wallet_taken {
                return Err(StorageError::Corrupt {
                    line,
                    reason: format!(
                        "user {} or wallet {} is assigned twice",
                        entry.user, entry.wallet
                    ),
                });
            }
            entries.insert(entry);
        }
        info!(path = %path.display(), wallets = entries.by_user.len(), "Wallet directory restored");
        entries.journal = Some(journal);
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    /// Returns the user's primary wallet, opening one if the user has none yet.
    pub fn open_wallet(&self, user: UserId) -> Result<WalletId, LedgerError> {
        let mut entries = self.entries.write();
        if let Some(wallet) = entries.by_user.get(&user) {
            return Ok(*wallet);
        }
        let entry = WalletEntry {
            user,
            wallet: entries.next_wallet + 1,
        };
        if let Some(journal) = entries.journal.as_mut() {
            journal.append(&entry)?;
        }
        entries.insert(entry);
        info!(user, wallet = entry.wallet, "Opened primary wallet");
        Ok(entry.wallet)
    }

    /// `(user, wallet)` pairs ordered by user.
    pub fn entries(&self) -> Vec<(UserId, WalletId)> {
        self.entries
            .read()
            .by_user
            .iter()
            .map(|(user, wallet)| (*user, *wallet))
            .collect()
    }
}

impl WalletDirectory for MemoryDirectory {
    fn primary_wallet(&self, user: UserId) -> Result<WalletId, LedgerError> {
        self.entries
            .read()
            .by_user
            .get(&user)
            .copied()
            .ok_or_else(|| LedgerError::not_found(format!("Primary wallet for user {user}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_wallet_is_idempotent() {
        let dir = MemoryDirectory::new();
        let w1 = dir.open_wallet(10).unwrap();
        let w2 = dir.open_wallet(20).unwrap();
        assert_ne!(w1, w2);
        assert_eq!(dir.open_wallet(10).unwrap(), w1);
        assert_eq!(dir.primary_wallet(20).unwrap(), w2);
        assert_eq!(dir.entries(), vec![(10, w1), (20, w2)]);
    }

    #[test]
    fn unknown_user_is_not_found() {
        let dir = MemoryDirectory::new();
        let err = dir.primary_wallet(3).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert_eq!(err.to_string(), "Primary wallet for user 3 not found");
    }

    #[test]
    fn journaled_wallets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.journal");
        {
            let directory = MemoryDirectory::with_journal(&path).unwrap();
            assert_eq!(directory.open_wallet(7).unwrap(), 1);
            assert_eq!(directory.open_wallet(3).unwrap(), 2);
        }

        let directory = MemoryDirectory::with_journal(&path).unwrap();
        assert_eq!(directory.primary_wallet(7).unwrap(), 1);
        assert_eq!(directory.primary_wallet(3).unwrap(), 2);
        // new users continue after the restored ids
        assert_eq!(directory.open_wallet(5).unwrap(), 3);
    }

    #[test]
    fn duplicate_assignment_in_journal_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.journal");
        std::fs::write(
            &path,
            "{\"user\":1,\"wallet\":1}\n{\"user\":2,\"wallet\":1}\n",
        )
        .unwrap();
        let result = MemoryDirectory::with_journal(&path);
        assert!(matches!(result, Err(StorageError::Corrupt { line: 2, .. })));
    }
}
