// =====================================================================================
// SECURITY CELL ROUTER
// =====================================================================================

use std::sync::Arc;

use axum::{
    middleware,
    routing::get,
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{get_audit_log, SecurityState};

pub fn create_security_router(state: Arc<SecurityState>) -> Router {
    Router::new()
        .route("/audit", get(get_audit_log))
        .layer(middleware::from_fn_with_state(state.identity.clone(), auth_middleware))
        .with_state(state)
}
