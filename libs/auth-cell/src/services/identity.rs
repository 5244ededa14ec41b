use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Identity, Role};
use shared_models::error::AppError;
use shared_utils::extractor::IdentityProvider;
use shared_utils::jwt::validate_token;

use crate::models::IdentityError;
use crate::services::directory::UserDirectory;

/// Identity Context: turns a bearer token into the caller's identity.
pub struct IdentityService {
    config: Arc<AppConfig>,
    directory: Arc<UserDirectory>,
}

impl IdentityService {
    pub fn new(config: Arc<AppConfig>, directory: Arc<UserDirectory>) -> Self {
        Self { config, directory }
    }

    pub fn directory(&self) -> Arc<UserDirectory> {
        Arc::clone(&self.directory)
    }

    pub async fn resolve(&self, token: &str) -> Result<Identity, IdentityError> {
        let user = validate_token(token, &self.config.jwt_secret)
            .map_err(IdentityError::Unauthenticated)?;

        let user_id = Uuid::parse_str(&user.id)
            .map_err(|_| IdentityError::Unauthenticated("Token subject is not a valid user id".to_string()))?;

        if let Some(account) = self.directory.get(user_id).await {
            debug!("Using directory role {} for user {}", account.role, user_id);
            return Ok(Identity {
                user_id,
                role: account.role,
                doctor_id: account.doctor_id,
            });
        }

        let role = user
            .role
            .as_deref()
            .ok_or_else(|| IdentityError::Unauthenticated("Token carries no role".to_string()))?
            .parse::<Role>()
            .map_err(|e| {
                warn!("Rejecting token for {}: {}", user_id, e);
                IdentityError::Unauthenticated(e)
            })?;

        let doctor_id = match role {
            Role::Doctor => {
                let raw = user.doctor_id.as_deref().ok_or_else(|| {
                    IdentityError::Unauthenticated("Doctor token carries no doctor id".to_string())
                })?;
                Some(Uuid::parse_str(raw).map_err(|_| {
                    IdentityError::Unauthenticated("Doctor id is not a valid id".to_string())
                })?)
            }
            Role::User | Role::Admin => None,
        };

        Ok(Identity { user_id, role, doctor_id })
    }
}

#[async_trait]
impl IdentityProvider for IdentityService {
    async fn resolve_identity(&self, token: &str) -> Result<Identity, AppError> {
        self.resolve(token).await.map_err(AppError::from)
    }
}
