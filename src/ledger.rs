use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    command::{CreateRequest, Deposit, SendMoney, SplitBill, Withdraw},
    config::Config,
    directory::WalletDirectory,
    error::LedgerError,
    model::{
        MinorUnits, PaymentRequest, Privacy, RequestId, RequestStatus, Transaction,
        TransactionId, TransactionStatus, TransferRef, UserId, WalletId,
    },
    notify::{Dispatcher, Notifier},
    processor::{Initiation, TransferProcessor},
    reconcile::{AuditReport, ReconcileReport, Reconciler},
    requests::PaymentRequestEngine,
    split::{BillSplitter, SplitOutcome},
    store::Store,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub reference: TransferRef,
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    /// The reference had been used before and nothing new was recorded.
    pub replayed: bool,
}

impl TransferReceipt {
    fn new(primary: &Transaction, replayed: bool) -> Self {
        Self {
            reference: primary.reference.clone(),
            transaction_id: primary.id,
            status: primary.status,
            failure_reason: primary.failure_reason.clone(),
            replayed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceView {
    pub wallet: WalletId,
    pub balance: MinorUnits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestReceipt {
    pub request_id: RequestId,
    pub status: RequestStatus,
}

impl From<&PaymentRequest> for RequestReceipt {
    fn from(request: &PaymentRequest) -> Self {
        Self {
            request_id: request.id,
            status: request.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub transfer: TransferReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub id: TransactionId,
    pub from: UserId,
    pub to: UserId,
    pub amount: MinorUnits,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub privacy: Privacy,
}

impl From<Transaction> for FeedItem {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            from: tx.from,
            to: tx.to,
            amount: tx.amount,
            description: tx.description,
            timestamp: tx.created_at,
            privacy: tx.privacy,
        }
    }
}

/// Entry point wiring every component over one store.
pub struct Ledger<S> {
    store: Arc<S>,
    processor: Arc<TransferProcessor<S>>,
    requests: Arc<PaymentRequestEngine<S>>,
    splitter: BillSplitter<S>,
    reconciler: Reconciler<S>,
    config: Config,
}

impl<S: Store> Ledger<S> {
    pub fn new(
        store: Arc<S>,
        directory: Arc<dyn WalletDirectory>,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Self {
        let processor = Arc::new(TransferProcessor::new(Arc::clone(&store), directory));
        let requests = Arc::new(PaymentRequestEngine::new(
            Arc::clone(&store),
            Arc::clone(&processor),
            Dispatcher::spawn(notifier),
        ));
        Self {
            splitter: BillSplitter::new(Arc::clone(&store), Arc::clone(&requests)),
            reconciler: Reconciler::new(
                Arc::clone(&store),
                Arc::clone(&processor),
                config.stale_intent_after(),
            ),
            store,
            processor,
            requests,
            config,
        }
    }

    fn settle(&self, intent: Transaction) -> Result<TransferReceipt, LedgerError> {
        match self.processor.initiate(intent)? {
            Initiation::Fresh(intent) => {
                let settlement = self.processor.process(intent, Vec::new())?;
                Ok(TransferReceipt::new(&settlement.primary, false))
            }
            Initiation::Replay { primary, .. } => Ok(TransferReceipt::new(&primary, true)),
        }
    }

    pub fn send_money(&self, command: SendMoney) -> Result<TransferReceipt, LedgerError> {
        self.settle(command.into_intent()?)
    }

    pub fn deposit(&self, command: Deposit) -> Result<TransferReceipt, LedgerError> {
        self.settle(command.into_intent()?)
    }

    pub fn withdraw(&self, command: Withdraw) -> Result<TransferReceipt, LedgerError> {
        self.settle(command.into_intent()?)
    }

    pub fn get_balance(&self, wallet: WalletId) -> Result<BalanceView, LedgerError> {
        Ok(BalanceView {
            wallet,
            balance: self.processor.balances().balance(wallet)?,
        })
    }

    /// Balance of the user's primary wallet.
    pub fn balance_of(&self, user: UserId) -> Result<BalanceView, LedgerError> {
        self.get_balance(self.processor.primary_wallet(user)?)
    }

    pub fn create_request(&self, command: CreateRequest) -> Result<RequestReceipt, LedgerError> {
        let request = self.requests.create_request(command)?;
        Ok(RequestReceipt::from(&request))
    }

    pub fn pay_request(&self, id: RequestId) -> Result<PaymentOutcome, LedgerError> {
        let paid = self.requests.pay_request(id)?;
        Ok(PaymentOutcome {
            request_id: paid.request.id,
            status: paid.request.status,
            transfer: TransferReceipt::new(&paid.settlement.primary, false),
        })
    }

    pub fn decline_request(
        &self,
        id: RequestId,
        payer: UserId,
    ) -> Result<RequestReceipt, LedgerError> {
        let declined = self.requests.decline_request(id, payer)?;
        Ok(RequestReceipt::from(&declined))
    }

    /// Requests addressed to `payer`, newest first.
    pub fn requests_for_payer(&self, payer: UserId) -> Result<Vec<PaymentRequest>, LedgerError> {
        self.requests.requests_for_payer(payer)
    }

    pub fn split_bill(&self, command: SplitBill) -> Result<SplitOutcome, LedgerError> {
        self.splitter.split_bill(command)
    }

    /// Settled, non-private transfers involving any of `friends`, newest first.
    pub fn get_feed(&self, friends: &[UserId]) -> Result<Vec<FeedItem>, LedgerError> {
        let items = self.store.feed(friends, self.config.feed_page_size)?;
        Ok(items.into_iter().map(FeedItem::from).collect())
    }

    pub fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport, LedgerError> {
        self.reconciler.run(now)
    }

    pub fn audit(&self) -> Result<AuditReport, LedgerError> {
        self.reconciler.audit()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
