// =====================================================================================
// SECURITY CELL HANDLERS - HTTP ENDPOINTS
// =====================================================================================

use std::sync::Arc;

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use serde_json::{json, Value};
use tracing::instrument;

use shared_models::auth::Identity;
use shared_models::error::AppError;
use shared_utils::extractor::SharedIdentityProvider;

use crate::models::AuditQuery;
use crate::services::AccessAuditLog;

#[derive(Clone)]
pub struct SecurityState {
    pub identity: SharedIdentityProvider,
    pub audit: Arc<AccessAuditLog>,
}

/// Admin-only view of the most recent access decisions.
#[instrument(skip(state, identity))]
pub async fn get_audit_log(
    State(state): State<Arc<SecurityState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, AppError> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden("Only administrators may read the audit log".to_string()));
    }

    let limit = query.limit.unwrap_or(100).min(1_000);
    let entries = state.audit.recent(limit).await;

    Ok(Json(json!({
        "entries": entries,
        "denials": state.audit.denial_count().await,
    })))
}
