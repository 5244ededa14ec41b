use axum::{routing::get, Router};

use appointment_cell::appointment_routes;
use auth_cell::auth_routes;
use payment_cell::payment_routes;
use security_cell::create_security_router;

use crate::state::AppServices;

pub fn create_router(services: &AppServices) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic booking API is running!" }))
        .nest("/auth", auth_routes(services.auth_state()))
        .nest("/appointments", appointment_routes(services.appointment_state()))
        .nest("/payments", payment_routes(services.payment_state()))
        .nest("/security", create_security_router(services.security_state()))
}
