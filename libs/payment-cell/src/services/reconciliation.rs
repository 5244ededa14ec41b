// libs/payment-cell/src/services/reconciliation.rs
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_models::auth::Identity;

use crate::models::{
    CreatePaymentRequest, Payment, PaymentChannel, PaymentError, ReconciliationWarning, Settlement,
    SettlementCallback, SettlementOutcome, WarningKind, GATEWAY_FAILURE_REFERENCE,
};
use crate::services::coordinator::SettlementCoordinator;
use crate::services::mobile_money::{MobileMoneyGateway, PushRequest};
use crate::services::payment::PaymentService;

const MAX_PARKED_CALLBACKS: usize = 1000;
const PARKED_CALLBACK_TTL: Duration = Duration::from_secs(600);

/// Drives payments to a terminal state through one of the two settlement channels.
pub struct PaymentReconciliationService {
    payments: Arc<PaymentService>,
    gateway: Option<Arc<dyn MobileMoneyGateway>>,
    coordinator: Arc<SettlementCoordinator>,
    /// Callbacks that beat their push to the store, keyed by checkout request id.
    parked: Mutex<HashMap<String, (Instant, SettlementCallback)>>,
}

impl PaymentReconciliationService {
    pub fn new(
        payments: Arc<PaymentService>,
        gateway: Option<Arc<dyn MobileMoneyGateway>>,
        coordinator: Arc<SettlementCoordinator>,
    ) -> Self {
        if gateway.is_none() {
            warn!("No mobile money gateway configured, push payments are disabled");
        }
        Self {
            payments,
            gateway,
            coordinator,
            parked: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the payment and, for mobile money, sends the push.
    ///
    /// A refused push is a business outcome: the payment comes back `Failed`
    /// rather than as an error. Once the push is accepted the payment is
    /// always returned, even if recording the checkout id fails.
    #[instrument(skip(self, caller, request), fields(caller_id = %caller.user_id))]
    pub async fn initiate(&self, caller: &Identity, request: CreatePaymentRequest) -> Result<Payment, PaymentError> {
        let gateway = match request.channel {
            PaymentChannel::MobileMoney => Some(self.gateway.clone().ok_or_else(|| {
                PaymentError::Validation("Mobile money payments are not available".to_string())
            })?),
            PaymentChannel::Card => None,
        };

        let payment = self.payments.create(caller, request).await?;

        let Some(gateway) = gateway else {
            // Card: the client charges, then reports back through `confirm_card`
            return Ok(payment);
        };

        let push = PushRequest {
            payment_id: payment.id,
            phone_number: payment.phone_number.clone().unwrap_or_default(),
            amount: payment.amount,
            account_reference: payment.appointment_id.simple().to_string(),
            description: "Consultation fee".to_string(),
        };

        match gateway.request_push(&push).await {
            Ok(acceptance) => {
                let checkout_id = acceptance.checkout_request_id;
                info!(payment_id = %payment.id, "Awaiting mobile money callback for {}", checkout_id);

                let payment = match self.payments.attach_transaction_id(payment.id, &checkout_id).await {
                    Ok(updated) => updated,
                    Err(e) => {
                        error!(payment_id = %payment.id, "Failed to record checkout id {}: {}", checkout_id, e);
                        self.payments.lookup(payment.id).await.unwrap_or(payment)
                    }
                };

                let Some(callback) = self.take_parked(&checkout_id).await else {
                    return Ok(payment);
                };
                info!(payment_id = %payment.id, "Applying callback that arrived before checkout id {}", checkout_id);
                match self.apply_callback(payment.clone(), &callback).await {
                    Ok(settlement) => Ok(settlement.payment),
                    Err(e) => {
                        warn!(payment_id = %payment.id, "Early callback could not be applied: {}", e);
                        Ok(self.payments.lookup(payment.id).await.unwrap_or(payment))
                    }
                }
            }
            Err(e) => {
                warn!(payment_id = %payment.id, "Mobile money push failed: {}", e);
                let settlement = self
                    .payments
                    .mark_settled(payment.id, SettlementOutcome::Failed, GATEWAY_FAILURE_REFERENCE)
                    .await?;
                Ok(settlement.payment)
            }
        }
    }

    /// The card channel: the caller reports the charge result synchronously.
    pub async fn confirm_card(
        &self,
        caller: &Identity,
        payment_id: Uuid,
        outcome: SettlementOutcome,
        settlement_reference: &str,
    ) -> Result<Settlement, PaymentError> {
        self.payments
            .settle_as(caller, payment_id, outcome, settlement_reference)
            .await
    }

    /// The mobile-money channel: the gateway's asynchronous answer.
    ///
    /// The transaction id is the idempotency key, so a repeated callback changes nothing.
    /// Only mobile money payments can be settled this way. A callback for a checkout id
    /// that is not recorded yet is held until `initiate` records it.
    #[instrument(skip(self, callback), fields(outcome = %callback.outcome))]
    pub async fn handle_callback(&self, callback: SettlementCallback) -> Result<Settlement, PaymentError> {
        let payment = match self.resolve_callback_target(&callback).await {
            Ok(payment) => payment,
            Err(PaymentError::NotFound(msg)) if callback.payment_id.is_none() => {
                return self.park(callback, msg).await;
            }
            Err(e) => return Err(e),
        };

        self.apply_callback(payment, &callback).await
    }

    async fn apply_callback(&self, payment: Payment, callback: &SettlementCallback) -> Result<Settlement, PaymentError> {
        if payment.channel != PaymentChannel::MobileMoney {
            warn!(payment_id = %payment.id, "Refusing mobile money callback for a {} payment", payment.channel);
            return Err(PaymentError::Validation(format!(
                "Payment {} is a {} payment and cannot be settled by a mobile money callback",
                payment.id, payment.channel
            )));
        }

        match self
            .payments
            .mark_settled(payment.id, callback.outcome, &callback.settlement_reference)
            .await
        {
            Ok(settlement) => Ok(settlement),
            Err(PaymentError::Conflict(msg)) => {
                self.coordinator
                    .raise(ReconciliationWarning::new(
                        &payment,
                        WarningKind::LateSettlement,
                        format!("Settlement callback ignored: {}", msg),
                    ))
                    .await;
                Err(PaymentError::Conflict(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Holds a callback whose checkout id is unknown, then looks once more in
    /// case the push was recorded meanwhile.
    async fn park(&self, callback: SettlementCallback, not_found: String) -> Result<Settlement, PaymentError> {
        let Some(reference) = callback.transaction_reference.clone() else {
            return Err(PaymentError::NotFound(not_found));
        };

        {
            let mut parked = self.parked.lock().await;
            let now = Instant::now();
            parked.retain(|_, (parked_at, _)| now.duration_since(*parked_at) < PARKED_CALLBACK_TTL);
            if parked.len() >= MAX_PARKED_CALLBACKS && !parked.contains_key(&reference) {
                warn!("Too many unmatched mobile money callbacks, dropping {}", reference);
                return Err(PaymentError::NotFound(not_found));
            }
            parked.insert(reference.clone(), (now, callback));
        }

        let Some(payment) = self.payments.find_by_transaction_id(&reference).await? else {
            info!("Holding callback for unknown checkout id {}", reference);
            return Err(PaymentError::NotFound(not_found));
        };

        match self.take_parked(&reference).await {
            Some(callback) => self.apply_callback(payment, &callback).await,
            None => {
                // initiate took it first
                debug!("Callback for {} was applied by the push", reference);
                Ok(Settlement {
                    payment: self.payments.lookup(payment.id).await?,
                    changed: false,
                })
            }
        }
    }

    async fn take_parked(&self, reference: &str) -> Option<SettlementCallback> {
        self.parked
            .lock()
            .await
            .remove(reference)
            .filter(|(parked_at, _)| parked_at.elapsed() < PARKED_CALLBACK_TTL)
            .map(|(_, callback)| callback)
    }

    async fn resolve_callback_target(&self, callback: &SettlementCallback) -> Result<Payment, PaymentError> {
        let by_reference = match callback.transaction_reference.as_deref() {
            Some(reference) => Some(self.payments.find_by_transaction_id(reference).await?.ok_or_else(|| {
                PaymentError::NotFound(format!("No payment with transaction reference {}", reference))
            })?),
            None => None,
        };

        match (callback.payment_id, by_reference) {
            (Some(id), Some(payment)) if payment.id != id => Err(PaymentError::Validation(format!(
                "Transaction reference {} does not belong to payment {}",
                payment.transaction_id, id
            ))),
            (_, Some(payment)) => Ok(payment),
            (Some(id), None) => self.payments.lookup(id).await,
            (None, None) => Err(PaymentError::Validation(
                "A callback must carry a payment id or a transaction reference".to_string(),
            )),
        }
    }
}
