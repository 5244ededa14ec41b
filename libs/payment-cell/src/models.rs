// libs/payment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use appointment_cell::AppointmentError;
use security_cell::{AccessDenied, AccessTarget};
use shared_database::{Record, StoreError};
use shared_models::error::AppError;

/// Prefix of the placeholder transaction id a payment carries until its channel answers.
pub const PROVISIONAL_TRANSACTION_PREFIX: &str = "PENDING-";

/// Settlement reference recorded when a push payment times out.
pub const EXPIRED_REFERENCE: &str = "EXPIRED";

/// Settlement reference recorded when the gateway refuses or cannot be reached.
pub const GATEWAY_FAILURE_REFERENCE: &str = "GATEWAY-REJECTED";

// ==============================================================================
// CORE PAYMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub appointment_id: Uuid,
    /// Owners copied from the appointment so reads can be scoped without a lookup.
    pub user_id: Uuid,
    pub doctor_id: Uuid,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub channel: PaymentChannel,
    pub transaction_id: String,
    pub settlement_reference: Option<String>,
    pub phone_number: Option<String>,
    pub payment_date: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
}

impl Payment {
    pub fn access_target(&self) -> AccessTarget {
        AccessTarget::new(self.user_id, self.doctor_id)
    }

    pub fn has_provisional_transaction_id(&self) -> bool {
        self.transaction_id.starts_with(PROVISIONAL_TRANSACTION_PREFIX)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending
            && self.expires_at.map(|deadline| deadline <= now).unwrap_or(false)
    }
}

impl Record for Payment {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    /// Client-side card charge, confirmed synchronously by the caller.
    Card,
    /// Push to the payer's phone, confirmed later by a gateway callback.
    MobileMoney,
}

impl fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentChannel::Card => write!(f, "card"),
            PaymentChannel::MobileMoney => write!(f, "mobile_money"),
        }
    }
}

/// Terminal result reported by a settlement channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    #[serde(alias = "success")]
    Paid,
    #[serde(alias = "failure")]
    Failed,
}

impl SettlementOutcome {
    pub fn status(&self) -> PaymentStatus {
        match self {
            SettlementOutcome::Paid => PaymentStatus::Paid,
            SettlementOutcome::Failed => PaymentStatus::Failed,
        }
    }
}

impl fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.status().fmt(f)
    }
}

/// Result of applying a settlement to a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub payment: Payment,
    /// False when the payment already carried this outcome.
    pub changed: bool,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub appointment_id: Uuid,
    pub amount: Decimal,
    pub channel: PaymentChannel,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlePaymentRequest {
    pub outcome: SettlementOutcome,
    pub settlement_reference: String,
}

/// Normalised inbound settlement event from the mobile-money gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementCallback {
    #[serde(default)]
    pub payment_id: Option<Uuid>,
    #[serde(default)]
    pub transaction_reference: Option<String>,
    pub outcome: SettlementOutcome,
    pub settlement_reference: String,
}

/// STK push callback exactly as the gateway posts it.
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    pub result_code: i64,
    #[serde(default)]
    pub result_desc: Option<String>,
    #[serde(default)]
    pub callback_metadata: Option<StkCallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallbackMetadata {
    #[serde(default)]
    pub item: Vec<StkCallbackItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallbackItem {
    pub name: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// Either callback shape is accepted on the callback route.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MobileMoneyCallback {
    Gateway(StkCallbackEnvelope),
    Normalised(SettlementCallback),
}

impl MobileMoneyCallback {
    pub fn into_settlement(self) -> SettlementCallback {
        match self {
            MobileMoneyCallback::Normalised(callback) => callback,
            MobileMoneyCallback::Gateway(envelope) => {
                let callback = envelope.body.stk_callback;
                let receipt = callback
                    .callback_metadata
                    .as_ref()
                    .and_then(|metadata| {
                        metadata.item.iter().find(|item| item.name == "MpesaReceiptNumber")
                    })
                    .and_then(|item| item.value.as_ref())
                    .and_then(|value| value.as_str().map(str::to_string));

                let outcome = if callback.result_code == 0 {
                    SettlementOutcome::Paid
                } else {
                    SettlementOutcome::Failed
                };

                let settlement_reference = match outcome {
                    SettlementOutcome::Paid => receipt.unwrap_or_else(|| callback.checkout_request_id.clone()),
                    SettlementOutcome::Failed => format!("RESULT-{}", callback.result_code),
                };

                SettlementCallback {
                    payment_id: None,
                    transaction_reference: Some(callback.checkout_request_id),
                    outcome,
                    settlement_reference,
                }
            }
        }
    }
}

// ==============================================================================
// EVENTS & WARNINGS
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    Created(Payment),
    Settled(Payment),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Paid for an appointment that had already been cancelled.
    AppointmentCancelled,
    /// The appointment vanished before the payment settled.
    AppointmentMissing,
    /// The appointment kept changing and could not be confirmed.
    AppointmentContended,
    /// A callback tried to overturn a payment that was already final.
    LateSettlement,
}

/// A non-fatal mismatch between a payment and its appointment, kept for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationWarning {
    pub payment_id: Uuid,
    pub appointment_id: Uuid,
    pub kind: WarningKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl ReconciliationWarning {
    pub fn new(payment: &Payment, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            payment_id: payment.id,
            appointment_id: payment.appointment_id,
            kind,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Forbidden(#[from] AccessDenied),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("Mobile money gateway error: {0}")]
    ExternalService(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    pub fn payment_not_found(payment_id: Uuid) -> Self {
        PaymentError::NotFound(format!("Payment {} not found", payment_id))
    }
}

impl From<StoreError> for PaymentError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { id, .. } => PaymentError::payment_not_found(id),
            StoreError::VersionConflict { id, .. } => {
                PaymentError::Conflict(format!("Payment {} was modified by another request", id))
            }
            other => PaymentError::Database(other.to_string()),
        }
    }
}

impl From<AppointmentError> for PaymentError {
    fn from(error: AppointmentError) -> Self {
        match error {
            AppointmentError::Validation(msg) => PaymentError::Validation(msg),
            AppointmentError::NotFound(_) => PaymentError::NotFound(error.to_string()),
            AppointmentError::Forbidden(denied) => PaymentError::Forbidden(denied),
            AppointmentError::InvalidTransition { .. } | AppointmentError::Conflict(_) => {
                PaymentError::Conflict(error.to_string())
            }
            AppointmentError::Database(msg) => PaymentError::Database(msg),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(error: PaymentError) -> Self {
        match error {
            PaymentError::Validation(msg) => AppError::ValidationError(msg),
            PaymentError::NotFound(msg) => AppError::NotFound(msg),
            PaymentError::Forbidden(denied) => denied.into(),
            PaymentError::Conflict(msg) => AppError::Conflict(msg),
            PaymentError::Unauthenticated(msg) => AppError::Unauthenticated(msg),
            PaymentError::ExternalService(msg) => AppError::ExternalService(msg),
            PaymentError::Database(msg) => AppError::Database(msg),
            PaymentError::Internal(msg) => AppError::Internal(msg),
        }
    }
}
