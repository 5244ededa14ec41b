// libs/payment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::Identity;
use shared_models::error::AppError;
use shared_utils::extractor::SharedIdentityProvider;

use crate::models::{
    CreatePaymentRequest, MobileMoneyCallback, Payment, PaymentError, PaymentStatus, SettlePaymentRequest,
};
use crate::services::{PaymentReconciliationService, PaymentService, SettlementCoordinator};

pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

#[derive(Clone)]
pub struct PaymentState {
    pub identity: SharedIdentityProvider,
    pub payments: Arc<PaymentService>,
    pub reconciliation: Arc<PaymentReconciliationService>,
    pub coordinator: Arc<SettlementCoordinator>,
    /// Shared secret the gateway sends with callbacks. Empty refuses every callback.
    pub callback_token: String,
}

#[derive(Debug, Deserialize)]
pub struct WarningsQuery {
    pub limit: Option<usize>,
}

fn listing(payments: Vec<Payment>) -> Json<Value> {
    Json(json!({
        "total": payments.len(),
        "payments": payments,
    }))
}

// ==============================================================================
// PAYMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_payment(
    State(state): State<Arc<PaymentState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let payment = state.reconciliation.initiate(&identity, request).await?;

    let message = match payment.status {
        PaymentStatus::Failed => "Mobile money request could not be sent, please try again",
        _ => "Payment created, awaiting confirmation",
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "payment": payment,
            "message": message,
        })),
    ))
}

#[axum::debug_handler]
pub async fn settle_payment(
    State(state): State<Arc<PaymentState>>,
    Extension(identity): Extension<Identity>,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<SettlePaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let settlement = state
        .reconciliation
        .confirm_card(&identity, payment_id, request.outcome, &request.settlement_reference)
        .await?;

    Ok(Json(json!({
        "success": true,
        "changed": settlement.changed,
        "payment": settlement.payment,
    })))
}

pub async fn get_payment(
    State(state): State<Arc<PaymentState>>,
    Extension(identity): Extension<Identity>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.payments.get_by_id(payment_id, &identity).await?))
}

pub async fn delete_payment(
    State(state): State<Arc<PaymentState>>,
    Extension(identity): Extension<Identity>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let deleted = state.payments.delete(payment_id, &identity).await?;

    Ok(Json(json!({
        "success": true,
        "deleted_id": deleted.id,
    })))
}

pub async fn list_my_payments(
    State(state): State<Arc<PaymentState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, AppError> {
    Ok(listing(state.payments.list_for(&identity).await?))
}

pub async fn list_all_payments(
    State(state): State<Arc<PaymentState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, AppError> {
    Ok(listing(state.payments.list_all(&identity).await?))
}

pub async fn list_appointment_payments(
    State(state): State<Arc<PaymentState>>,
    Extension(identity): Extension<Identity>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    Ok(listing(state.payments.list_by_appointment(&identity, appointment_id).await?))
}

/// Admin-only view of payment/appointment mismatches.
pub async fn list_warnings(
    State(state): State<Arc<PaymentState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<WarningsQuery>,
) -> Result<Json<Value>, AppError> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden("Only administrators may read reconciliation warnings".to_string()));
    }

    let limit = query.limit.unwrap_or(100).min(500);
    Ok(Json(json!({
        "warnings": state.coordinator.recent_warnings(limit).await,
    })))
}

// ==============================================================================
// GATEWAY CALLBACK
// ==============================================================================

/// Inbound settlement from the mobile-money gateway. Not behind user auth.
pub async fn mobile_money_callback(
    State(state): State<Arc<PaymentState>>,
    headers: HeaderMap,
    Json(callback): Json<MobileMoneyCallback>,
) -> Result<Json<Value>, AppError> {
    if state.callback_token.is_empty() {
        warn!("Rejected mobile money callback, no callback token is configured");
        return Err(PaymentError::Unauthenticated("Mobile money callbacks are not enabled".to_string()).into());
    }

    let presented = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if presented != state.callback_token {
        warn!("Rejected mobile money callback with a bad token");
        return Err(PaymentError::Unauthenticated("Invalid callback token".to_string()).into());
    }

    let callback = callback.into_settlement();
    debug!("Mobile money callback: {:?}", callback);

    let settlement = state.reconciliation.handle_callback(callback).await?;

    Ok(Json(json!({
        "ResultCode": 0,
        "ResultDesc": "Accepted",
        "changed": settlement.changed,
        "payment_status": settlement.payment.status,
    })))
}
