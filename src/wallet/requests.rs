//! Payment requests: asking another user for money, and settling the ask.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{record, validate_amount, validate_reference, Wallet, WalletError};
use crate::cache::{CacheKey, Mutation};
use crate::db::{
    NewTransaction, PaymentRequest, PaymentRequestResponse, RequestLists, RequestStatus,
    Transaction, TransactionKind, User,
};
use crate::notifications::WalletEvent;

/// Who is being asked for money
#[derive(Debug, Clone)]
pub enum RequestTarget {
    Id(String),
    Email(String),
}

#[derive(Debug, Clone)]
pub struct SendRequestInput {
    pub target: RequestTarget,
    /// Minor units
    pub amount: i64,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestAction {
    Accept,
    Reject,
}

impl RequestAction {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "accept" | "accepted" => Some(RequestAction::Accept),
            "reject" | "rejected" => Some(RequestAction::Reject),
            _ => None,
        }
    }
}

/// A settled request plus the ledger row created when it was accepted
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub request: PaymentRequest,
    pub transaction: Option<Transaction>,
}

impl Wallet {
    pub async fn send_request(
        &self,
        sender_id: &str,
        input: SendRequestInput,
    ) -> Result<PaymentRequest, WalletError> {
        let result = self.send_request_inner(sender_id, input).await;
        record("send_request", &result);
        result
    }

    async fn send_request_inner(
        &self,
        sender_id: &str,
        input: SendRequestInput,
    ) -> Result<PaymentRequest, WalletError> {
        validate_amount(input.amount)?;
        let reference = validate_reference(&input.reference)?;
        let sender = self.load_user(sender_id).await?;

        let receiver = match &input.target {
            RequestTarget::Id(id) => User::find_by_id(&self.db, id).await?,
            RequestTarget::Email(email) => User::find_by_email(&self.db, email).await?,
        }
        .ok_or_else(|| WalletError::NotFound("Receiver not found".to_string()))?;

        if receiver.id == sender.id {
            return Err(WalletError::validation(
                "receiver",
                "Cannot request money from yourself",
            ));
        }

        let request =
            PaymentRequest::insert(&self.db, &sender.id, &receiver.id, input.amount, &reference)
                .await?;

        info!(
            request_id = %request.id,
            sender_id = %sender.id,
            receiver_id = %receiver.id,
            amount = request.amount,
            "Payment request created"
        );

        self.invalidate(Mutation::RequestCreated {
            sender_id: sender.id.clone(),
            receiver_id: receiver.id.clone(),
        })
        .await;
        self.notifier.notify(WalletEvent::RequestReceived {
            email: receiver.email,
            requester_name: sender.full_name(),
            amount: request.amount,
            reference: request.reference.clone(),
        });

        Ok(request)
    }

    /// Accept or reject a pending request. Only the payer may act on it.
    ///
    /// Accepting claims the request, moves the money and records the ledger
    /// row in one database transaction. If the payer cannot cover the amount
    /// the whole transaction rolls back and the request stays pending.
    pub async fn update_request_status(
        &self,
        actor_id: &str,
        request_id: &str,
        action: RequestAction,
        pin: Option<&str>,
    ) -> Result<RequestOutcome, WalletError> {
        let operation = match action {
            RequestAction::Accept => "accept_request",
            RequestAction::Reject => "reject_request",
        };
        let result = self
            .update_request_status_inner(actor_id, request_id, action, pin)
            .await;
        record(operation, &result);
        result
    }

    async fn update_request_status_inner(
        &self,
        actor_id: &str,
        request_id: &str,
        action: RequestAction,
        pin: Option<&str>,
    ) -> Result<RequestOutcome, WalletError> {
        let request = PaymentRequest::find_by_id(&self.db, request_id)
            .await?
            .ok_or_else(|| WalletError::NotFound("Request not found".to_string()))?;

        if request.receiver_id != actor_id {
            return Err(WalletError::Forbidden(
                "Only the requested user can respond to this request".to_string(),
            ));
        }
        if request.status_enum().is_terminal() {
            return Err(already_processed());
        }

        let transaction = match action {
            RequestAction::Reject => {
                if !PaymentRequest::transition(&self.db, request_id, RequestStatus::Rejected, None)
                    .await?
                {
                    return Err(already_processed());
                }
                info!(request_id = %request_id, "Payment request rejected");
                self.invalidate(Mutation::RequestRejected {
                    sender_id: request.sender_id.clone(),
                    receiver_id: request.receiver_id.clone(),
                })
                .await;
                None
            }
            RequestAction::Accept => {
                let pin = pin
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| WalletError::validation("pin", "PIN is required to accept"))?;
                self.verify_pin(actor_id, pin).await?;
                let row = self.settle_request(&request).await?;
                self.invalidate(Mutation::RequestAccepted {
                    sender_id: request.sender_id.clone(),
                    receiver_id: request.receiver_id.clone(),
                })
                .await;
                Some(row)
            }
        };

        let request = PaymentRequest::find_by_id(&self.db, request_id)
            .await?
            .ok_or_else(|| WalletError::NotFound("Request not found".to_string()))?;

        self.notify_settled(&request).await;

        Ok(RequestOutcome {
            request,
            transaction,
        })
    }

    async fn settle_request(&self, request: &PaymentRequest) -> Result<Transaction, WalletError> {
        let mut tx = self.db.begin().await?;

        if !PaymentRequest::transition(&mut *tx, &request.id, RequestStatus::Accepted, None).await? {
            tx.rollback().await?;
            return Err(already_processed());
        }

        if !User::debit(&mut *tx, &request.receiver_id, request.amount).await? {
            tx.rollback().await?;
            return Err(WalletError::InsufficientBalance);
        }

        if !User::credit(&mut *tx, &request.sender_id, request.amount).await? {
            tx.rollback().await?;
            return Err(WalletError::NotFound("Requester not found".to_string()));
        }

        let row = Transaction::insert(
            &mut *tx,
            &NewTransaction::wallet(
                &request.receiver_id,
                &request.sender_id,
                request.amount,
                TransactionKind::Request,
                &request.reference,
            ),
        )
        .await?;

        PaymentRequest::set_transaction_id(&mut *tx, &request.id, &row.id).await?;

        tx.commit().await?;

        info!(
            request_id = %request.id,
            transaction_id = %row.id,
            payer_id = %request.receiver_id,
            requester_id = %request.sender_id,
            amount = row.amount,
            "Payment request accepted"
        );

        Ok(row)
    }

    async fn notify_settled(&self, request: &PaymentRequest) {
        let requester = User::find_by_id(&self.db, &request.sender_id).await;
        let payer = User::find_by_id(&self.db, &request.receiver_id).await;
        match (requester, payer) {
            (Ok(Some(requester)), Ok(Some(payer))) => {
                self.notifier.notify(WalletEvent::RequestSettled {
                    email: requester.email,
                    payer_name: payer.full_name(),
                    amount: request.amount,
                    accepted: request.status_enum() == RequestStatus::Accepted,
                });
            }
            _ => warn!(request_id = %request.id, "Could not load parties for request notification"),
        }
    }

    /// Requests the user sent and received, newest first
    pub async fn list_requests(&self, user_id: &str) -> Result<RequestLists, WalletError> {
        let key = CacheKey::Requests(user_id.to_string());
        if let Some(cached) = self.cache.get_json::<RequestLists>(&key).await {
            return Ok(cached);
        }

        let sent = PaymentRequest::list_sent(&self.db, user_id).await?;
        let received = PaymentRequest::list_received(&self.db, user_id).await?;
        let lists = RequestLists {
            sent: sent.into_iter().map(PaymentRequestResponse::from).collect(),
            received: received
                .into_iter()
                .map(PaymentRequestResponse::from)
                .collect(),
        };

        self.cache.set_json(&key, &lists).await;
        Ok(lists)
    }
}

fn already_processed() -> WalletError {
    WalletError::AlreadyProcessed("Request has already been processed".to_string())
}
