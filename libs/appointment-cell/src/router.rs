// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch},
    middleware,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AppointmentState};

pub fn appointment_routes(state: Arc<AppointmentState>) -> Router {
    let public_routes = Router::new()
        .route("/slots", get(handlers::list_time_slots));

    // Everything touching a booking requires an identity
    let protected_routes = Router::new()
        .route("/", get(handlers::list_my_appointments).post(handlers::create_appointment))
        .route("/all", get(handlers::list_all_appointments)) // Admin only, empty otherwise
        .route("/users/{user_id}", get(handlers::list_user_appointments))
        .route("/doctors/{doctor_id}", get(handlers::list_doctor_appointments))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment).delete(handlers::delete_appointment),
        )
        .route("/{appointment_id}/status", patch(handlers::transition_appointment))
        .layer(middleware::from_fn_with_state(state.identity.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
