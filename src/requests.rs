use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    command::{CreateRequest, SendMoney},
    error::LedgerError,
    model::{PaymentRequest, Privacy, RequestId, RequestStatus, UserId},
    notify::Dispatcher,
    processor::{Initiation, Settlement, TransferProcessor},
    store::{StorageError, Store, Write},
};

/// A request that was settled by a transfer.
#[derive(Debug, Clone)]
pub struct PaidRequest {
    pub request: PaymentRequest,
    pub settlement: Settlement,
}

pub struct PaymentRequestEngine<S> {
    store: Arc<S>,
    processor: Arc<TransferProcessor<S>>,
    dispatcher: Dispatcher,
}

impl<S: Store> PaymentRequestEngine<S> {
    pub fn new(store: Arc<S>, processor: Arc<TransferProcessor<S>>, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            processor,
            dispatcher,
        }
    }

    pub fn create_request(&self, command: CreateRequest) -> Result<PaymentRequest, LedgerError> {
        let request = command.into_request()?;
        self.store
            .commit(Write::InsertRequest(request.clone()).into())?;
        info!(
            request = %request.id,
            requester = request.requester,
            payer = request.payer,
            amount = request.amount,
            "Payment request created"
        );
        self.dispatcher.notify(
            request.payer,
            format!(
                "User {} requested {} from you: {}",
                request.requester, request.amount, request.description
            ),
        );
        Ok(request)
    }

    fn load_pending(&self, id: RequestId) -> Result<PaymentRequest, LedgerError> {
        let request = self
            .store
            .request(id)?
            .ok_or_else(|| LedgerError::not_found(format!("Payment request {id}")))?;
        if request.status != RequestStatus::Pending {
            return Err(LedgerError::conflict(format!(
                "payment request {id} is already {:?}",
                request.status
            )));
        }
        Ok(request)
    }

    /// Pays a pending request with a transfer from the payer to the requester.
    ///
    /// The `paid` transition commits in the same batch as the transfer. When the transfer
    /// fails the request stays pending and the transfer error is returned.
    pub fn pay_request(&self, id: RequestId) -> Result<PaidRequest, LedgerError> {
        let request = self.load_pending(id)?;
        let mut intent = SendMoney {
            from: request.payer,
            to: request.requester,
            amount: request.amount,
            description: request.description.clone(),
            privacy: Privacy::default(),
            reference: None,
        }
        .into_intent()?;
        intent.payment_request = Some(request.id);
        let reference = intent.reference.clone();

        let intent = match self.processor.initiate(intent)? {
            Initiation::Fresh(intent) => intent,
            Initiation::Replay { .. } => {
                return Err(LedgerError::conflict(format!(
                    "reference {reference} is already in use"
                )));
            }
        };

        let paid = request.resolved(RequestStatus::Paid, Some(reference));
        let follow_up = vec![Write::UpdateRequest {
            expected_revision: request.revision,
            request: paid.clone(),
        }];
        match self.processor.process(intent, follow_up) {
            Ok(settlement) => {
                info!(request = %id, reference = %settlement.primary.reference, "Payment request paid");
                self.dispatcher.notify(
                    paid.requester,
                    format!("User {} paid your request: {}", paid.payer, paid.description),
                );
                Ok(PaidRequest {
                    request: paid,
                    settlement,
                })
            }
            Err(err) => {
                warn!(request = %id, error = %err, "Payment request stays pending");
                Err(err)
            }
        }
    }

    /// Declines a pending request; only its payer may do so.
    pub fn decline_request(
        &self,
        id: RequestId,
        payer: UserId,
    ) -> Result<PaymentRequest, LedgerError> {
        let request = self.load_pending(id)?;
        if request.payer != payer {
            return Err(LedgerError::conflict(format!(
                "user {payer} is not the payer of request {id}"
            )));
        }
        let declined = request.resolved(RequestStatus::Declined, None);
        self.store
            .commit(
                Write::UpdateRequest {
                    expected_revision: request.revision,
                    request: declined.clone(),
                }
                .into(),
            )
            .map_err(|err| match err {
                StorageError::StaleWrite(_) => {
                    LedgerError::conflict(format!("payment request {id} changed concurrently"))
                }
                other => other.into(),
            })?;
        info!(request = %id, payer, "Payment request declined");
        self.dispatcher.notify(
            declined.requester,
            format!("User {} declined your request: {}", payer, declined.description),
        );
        Ok(declined)
    }

    pub fn requests_for_payer(&self, payer: UserId) -> Result<Vec<PaymentRequest>, LedgerError> {
        let mut requests = self.store.requests_for_payer(payer)?;
        requests.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(requests)
    }
}
