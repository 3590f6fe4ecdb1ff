//! This module could be a separate crate on its own, to bootstrap [`crate::Ledger`] within
//! the binary, but it is also what the integration tests drive.

use std::{
    collections::HashMap,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use csv_parser::{CsvOperationParser, Operation, OperationKind};
use csv_printer::{WalletBalance, print_balances};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    Ledger, LedgerError,
    command::{CreateRequest, Deposit, SendMoney, SplitBill, Withdraw},
    config::Config,
    directory::MemoryDirectory,
    model::{MinorUnits, RequestId, TransactionId, TransferRef, UserId},
    money::{self, MoneyError},
    notify::LogNotifier,
    store::MemoryStore,
};

pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Malformed row: {0}")]
    Parse(#[from] csv::Error),
    #[error(transparent)]
    Money(#[from] MoneyError),
    #[error("`{field}` is required for `{kind:?}`")]
    MissingField {
        kind: OperationKind,
        field: &'static str,
    },
    #[error("Unknown name `{0}`")]
    UnknownName(String),
    #[error("Invalid friend list `{0}`")]
    InvalidFriends(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub config: Config,
    pub error_printer: Box<dyn FnMut(u64, ScriptError)>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let (store, directory) = match &self.config.journal_path {
            Some(path) => {
                let store = MemoryStore::with_journal(path)
                    .with_context(|| format!("Failed to open journal `{}`", path.display()))?;
                let wallets = directory_journal(path);
                let directory = MemoryDirectory::with_journal(&wallets).with_context(|| {
                    format!("Failed to open wallet directory `{}`", wallets.display())
                })?;
                (store, directory)
            }
            None => (MemoryStore::new(), MemoryDirectory::new()),
        };
        let directory = Arc::new(directory);
        let ledger = Ledger::new(
            Arc::new(store),
            directory.clone(),
            Arc::new(LogNotifier),
            self.config.clone(),
        );
        let mut script = Script {
            ledger: &ledger,
            directory: &directory,
            exponent: self.config.currency_exponent,
            transfers: HashMap::new(),
            requests: HashMap::new(),
        };

        for (line, row) in CsvOperationParser::new(self.input) {
            if let Err(err) = row.map_err(ScriptError::from).and_then(|op| script.execute(op)) {
                (self.error_printer)(line, err);
            }
        }

        let audit = ledger.audit().context("Failed to audit ledger")?;
        if audit.is_clean() {
            info!(
                wallets = audit.wallets_checked,
                transactions = audit.transactions_checked,
                "Audit passed"
            );
        } else {
            for violation in &audit.violations {
                warn!(violation, "Audit violation");
            }
        }

        let mut balances = Vec::new();
        for (user, wallet) in directory.entries() {
            let view = ledger
                .get_balance(wallet)
                .with_context(|| format!("Failed to read balance of wallet {wallet}"))?;
            balances.push(WalletBalance {
                user,
                wallet,
                balance: money::to_major_units(view.balance, self.config.currency_exponent),
            });
        }
        print_balances(self.output, balances.into_iter())
    }
}

/// Wallet assignments are kept next to the ledger journal, so users keep their wallets
/// across runs.
pub fn directory_journal(journal: &Path) -> PathBuf {
    journal.with_extension("wallets")
}

/// Executes operations and keeps track of the names rows give to transfers and requests.
struct Script<'a> {
    ledger: &'a Ledger<MemoryStore>,
    directory: &'a MemoryDirectory,
    exponent: u32,
    transfers: HashMap<String, TransactionId>,
    requests: HashMap<String, RequestId>,
}

impl Script<'_> {
    fn execute(&mut self, op: Operation) -> Result<(), ScriptError> {
        let description = op.description.clone().unwrap_or_default();
        let reference = op.label.as_deref().map(TransferRef::new);
        match op.kind {
            OperationKind::Open => {
                self.directory.open_wallet(op.user)?;
            }
            OperationKind::Deposit => {
                let receipt = self.ledger.deposit(Deposit {
                    user: op.user,
                    amount: self.amount(&op)?,
                    description,
                    reference,
                })?;
                self.name_transfer(&op, receipt.transaction_id);
            }
            OperationKind::Withdrawal => {
                let receipt = self.ledger.withdraw(Withdraw {
                    user: op.user,
                    amount: self.amount(&op)?,
                    description,
                    reference,
                })?;
                self.name_transfer(&op, receipt.transaction_id);
            }
            OperationKind::Send => {
                let receipt = self.ledger.send_money(SendMoney {
                    from: op.user,
                    to: peer(&op)?,
                    amount: self.amount(&op)?,
                    description,
                    privacy: op.privacy.unwrap_or_default(),
                    reference,
                })?;
                self.name_transfer(&op, receipt.transaction_id);
            }
            OperationKind::Request => {
                let receipt = self.ledger.create_request(CreateRequest {
                    requester: op.user,
                    payer: peer(&op)?,
                    amount: self.amount(&op)?,
                    description,
                })?;
                if let Some(label) = &op.label {
                    self.requests.insert(label.clone(), receipt.request_id);
                }
            }
            OperationKind::Pay => {
                let id = self.request(&op)?;
                self.ledger.pay_request(id)?;
            }
            OperationKind::Decline => {
                let id = self.request(&op)?;
                self.ledger.decline_request(id, op.user)?;
            }
            OperationKind::Split => {
                let original = self.transfer(&op)?;
                let outcome = self.ledger.split_bill(SplitBill {
                    original,
                    requester: op.user,
                    friends: friends(&op)?,
                })?;
                // split requests are named `<ref>.<n>`, counting from 1
                if let Some(label) = &op.label {
                    for (n, request) in outcome.requests.iter().enumerate() {
                        self.requests.insert(format!("{label}.{}", n + 1), request.id);
                    }
                }
            }
        }
        Ok(())
    }

    fn amount(&self, op: &Operation) -> Result<MinorUnits, ScriptError> {
        let amount = op.amount.ok_or(ScriptError::MissingField {
            kind: op.kind,
            field: "amount",
        })?;
        Ok(money::to_minor_units(amount, self.exponent)?)
    }

    fn name_transfer(&mut self, op: &Operation, id: TransactionId) {
        if let Some(label) = &op.label {
            self.transfers.insert(label.clone(), id);
        }
    }

    fn transfer(&self, op: &Operation) -> Result<TransactionId, ScriptError> {
        let name = target(op)?;
        self.transfers
            .get(name)
            .copied()
            .ok_or_else(|| ScriptError::UnknownName(name.to_string()))
    }

    fn request(&self, op: &Operation) -> Result<RequestId, ScriptError> {
        let name = target(op)?;
        self.requests
            .get(name)
            .copied()
            .ok_or_else(|| ScriptError::UnknownName(name.to_string()))
    }
}

fn peer(op: &Operation) -> Result<UserId, ScriptError> {
    op.peer.ok_or(ScriptError::MissingField {
        kind: op.kind,
        field: "peer",
    })
}

fn target(op: &Operation) -> Result<&str, ScriptError> {
    op.target.as_deref().ok_or(ScriptError::MissingField {
        kind: op.kind,
        field: "target",
    })
}

fn friends(op: &Operation) -> Result<Vec<UserId>, ScriptError> {
    let list = op.friends.as_deref().ok_or(ScriptError::MissingField {
        kind: op.kind,
        field: "friends",
    })?;
    list.split_whitespace()
        .map(|id| id.parse())
        .collect::<Result<_, _>>()
        .map_err(|_| ScriptError::InvalidFriends(list.to_string()))
}
