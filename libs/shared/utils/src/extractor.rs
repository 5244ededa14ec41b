use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
    body::Body,
};

use shared_models::auth::Identity;
use shared_models::error::AppError;

/// Resolves an authenticated caller from a bearer token.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve_identity(&self, token: &str) -> Result<Identity, AppError>;
}

pub type SharedIdentityProvider = Arc<dyn IdentityProvider>;

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::Unauthenticated("Missing authorization header".to_string()))?;

    let auth_value = auth_header
        .to_str()
        .map_err(|_| AppError::Unauthenticated("Invalid authorization header format".to_string()))?;

    match auth_value.strip_prefix("Bearer ") {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(AppError::Unauthenticated("Invalid authorization header format".to_string())),
    }
}

pub async fn auth_middleware(
    State(provider): State<SharedIdentityProvider>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;

    let identity = provider.resolve_identity(&token).await?;

    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

pub fn extract_identity<B>(request: &Request<B>) -> Result<Identity, AppError> {
    request
        .extensions()
        .get::<Identity>()
        .cloned()
        .ok_or_else(|| AppError::Unauthenticated("Identity not found in request extensions".to_string()))
}
