use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{Identity, TokenResponse};
use shared_models::error::AppError;
use shared_utils::extractor::{extract_bearer_token, SharedIdentityProvider};

use crate::models::ChangeRoleRequest;
use crate::services::IdentityService;

#[derive(Clone)]
pub struct AuthState {
    pub identity: Arc<IdentityService>,
}

impl AuthState {
    pub fn provider(&self) -> SharedIdentityProvider {
        self.identity.clone()
    }
}

pub async fn validate_token(
    State(state): State<Arc<AuthState>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AppError> {
    debug!("Validating token");

    let token = extract_bearer_token(&headers)?;
    let identity = state.identity.resolve(&token).await?;

    Ok(Json(TokenResponse {
        valid: true,
        user_id: identity.user_id,
        role: identity.role,
        doctor_id: identity.doctor_id,
    }))
}

pub async fn current_identity(
    Extension(identity): Extension<Identity>,
) -> Json<Identity> {
    Json(identity)
}

pub async fn change_role(
    State(state): State<Arc<AuthState>>,
    Extension(identity): Extension<Identity>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<ChangeRoleRequest>,
) -> Result<Json<Value>, AppError> {
    let account = state
        .identity
        .directory()
        .change_role(&identity, user_id, request.role, request.doctor_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "account": account,
        "message": format!("Role changed to {}", account.role)
    })))
}
