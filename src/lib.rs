/// Records kept by the ledger: transactions (one per leg), their postings and payment
/// requests. Amounts are always minor units.
pub mod model;

/// Error taxonomy surfaced to callers.
pub mod error;

/// Conversion between major unit decimals and minor units, used at the edges only.
pub mod money;

/// Validated commands that produce transfer intents and payment requests.
pub mod command;

/// Persistence capabilities and the atomic write batch, plus an in memory store with an
/// optional journal.
pub mod store;

/// Resolves the primary wallet of a user.
pub mod directory;

/// Wallet state rebuilt from postings. Debits are checked against it.
pub mod wallet;

/// Derives balances from the event log, nothing is cached.
pub mod balance;

/// The single writer of postings: turns intents into settled or failed legs.
pub mod processor;

/// Payment requests between users, settled by transfers.
pub mod requests;

/// Splits a settled payment into payment requests.
pub mod split;

/// Best-effort delivery of user notifications.
pub mod notify;

/// Repairs interrupted work and audits the event log.
pub mod reconcile;

/// Runtime settings loaded from TOML or `LEDGER_*` environment variables.
pub mod config;

/// Facade over all components.
pub mod ledger;

/// Bootstraps [`ledger::Ledger`] from a CSV script. Used by the binary and integration
/// tests, which is why it lives here.
pub mod bin_utils;

pub use error::LedgerError;
pub use ledger::Ledger;
