use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use security_cell::AccessDenied;
use shared_models::auth::Role;
use shared_models::error::AppError;

/// A directory entry. When present it is authoritative over the role in a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: Uuid,
    pub role: Role,
    pub doctor_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error(transparent)]
    Forbidden(#[from] AccessDenied),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<IdentityError> for AppError {
    fn from(error: IdentityError) -> Self {
        match error {
            IdentityError::Unauthenticated(msg) => AppError::Unauthenticated(msg),
            IdentityError::Forbidden(denied) => denied.into(),
            IdentityError::Validation(msg) => AppError::ValidationError(msg),
        }
    }
}
