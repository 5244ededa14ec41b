// libs/payment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, PaymentState};

pub fn payment_routes(state: Arc<PaymentState>) -> Router {
    // The gateway authenticates with its callback token, not a user session
    let public_routes = Router::new()
        .route("/callbacks/mobile-money", post(handlers::mobile_money_callback));

    let protected_routes = Router::new()
        .route("/", get(handlers::list_my_payments).post(handlers::create_payment))
        .route("/all", get(handlers::list_all_payments)) // Admin only, empty otherwise
        .route("/warnings", get(handlers::list_warnings)) // Admin only
        .route("/appointments/{appointment_id}", get(handlers::list_appointment_payments))
        .route(
            "/{payment_id}",
            get(handlers::get_payment).delete(handlers::delete_payment),
        )
        .route("/{payment_id}/settle", post(handlers::settle_payment))
        .layer(middleware::from_fn_with_state(state.identity.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
