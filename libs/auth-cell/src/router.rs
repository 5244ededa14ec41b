use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
    middleware,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AuthState};

pub fn auth_routes(state: Arc<AuthState>) -> Router {
    let public_routes = Router::new()
        .route("/validate", post(handlers::validate_token));

    let protected_routes = Router::new()
        .route("/me", get(handlers::current_identity))
        .route("/users/{user_id}/role", put(handlers::change_role))
        .layer(middleware::from_fn_with_state(state.provider(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
