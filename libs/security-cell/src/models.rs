// =====================================================================================
// SECURITY CELL MODELS
// =====================================================================================

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::auth::Role;
use shared_models::error::AppError;

// =====================================================================================
// AUTHORIZATION MODELS
// =====================================================================================

/// Everything a caller can ask the core to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    View,
    Create,
    Confirm,
    Complete,
    Cancel,
    Delete,
    InitiatePayment,
    SettlePayment,
    ChangeRole,
}

impl Operation {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Operation::View)
    }

    /// Operations that are recorded in the audit trail even when allowed.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Operation::Delete | Operation::ChangeRole)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::View => "view",
            Operation::Create => "create",
            Operation::Confirm => "confirm",
            Operation::Complete => "complete",
            Operation::Cancel => "cancel",
            Operation::Delete => "delete",
            Operation::InitiatePayment => "initiate payment for",
            Operation::SettlePayment => "settle payment for",
            Operation::ChangeRole => "change the role of",
        };
        write!(f, "{}", name)
    }
}

/// The ownership facts of the entity an operation targets.
///
/// Payments are scoped through the appointment they belong to, so both
/// appointments and payments resolve to the same pair of owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTarget {
    pub user_id: Uuid,
    pub doctor_id: Option<Uuid>,
}

impl AccessTarget {
    pub fn new(user_id: Uuid, doctor_id: Uuid) -> Self {
        Self { user_id, doctor_id: Some(doctor_id) }
    }

    /// A target that is a user account rather than a booking.
    pub fn user(user_id: Uuid) -> Self {
        Self { user_id, doctor_id: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Not allowed to {operation}: {reason}")]
pub struct AccessDenied {
    pub operation: Operation,
    pub role: Role,
    pub reason: String,
}

impl From<AccessDenied> for AppError {
    fn from(denied: AccessDenied) -> Self {
        AppError::Forbidden(denied.to_string())
    }
}

// =====================================================================================
// AUDIT MODELS
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Allowed,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor_id: Uuid,
    pub actor_role: Role,
    pub operation: Operation,
    pub entity_id: Option<Uuid>,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(
        actor_id: Uuid,
        actor_role: Role,
        operation: Operation,
        entity_id: Option<Uuid>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor_id,
            actor_role,
            operation,
            entity_id,
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}
