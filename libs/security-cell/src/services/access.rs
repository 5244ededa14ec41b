// =====================================================================================
// ACCESS GATE - ROLE & OWNERSHIP DECISIONS
// =====================================================================================

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{Identity, Role};

use crate::models::{AccessDenied, AccessTarget, AuditEntry, AuditOutcome, Operation};
use crate::services::audit::AccessAuditLog;

/// Pure decision function. Holds no state and never has side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGate;

impl AccessGate {
    pub fn can_access(identity: &Identity, operation: Operation, target: &AccessTarget) -> bool {
        Self::authorize(identity, operation, target).is_ok()
    }

    pub fn authorize(
        identity: &Identity,
        operation: Operation,
        target: &AccessTarget,
    ) -> Result<(), AccessDenied> {
        let deny = |reason: &str| AccessDenied {
            operation,
            role: identity.role,
            reason: reason.to_string(),
        };

        match identity.role {
            Role::Admin => Ok(()),
            Role::User => {
                if target.user_id != identity.user_id {
                    return Err(deny("patients may only access their own records"));
                }
                match operation {
                    Operation::View
                    | Operation::Create
                    | Operation::Cancel
                    | Operation::InitiatePayment
                    | Operation::SettlePayment => Ok(()),
                    Operation::Confirm | Operation::Complete => {
                        Err(deny("only the assigned doctor or an administrator may do this"))
                    }
                    Operation::Delete => Err(deny("only administrators may delete records")),
                    Operation::ChangeRole => Err(deny("only administrators may change roles")),
                }
            }
            Role::Doctor => {
                let assigned = match (identity.doctor_id, target.doctor_id) {
                    (Some(own), Some(assigned)) => own == assigned,
                    _ => false,
                };
                if !assigned {
                    return Err(deny("doctors may only access appointments assigned to them"));
                }
                match operation {
                    Operation::View
                    | Operation::Confirm
                    | Operation::Complete
                    | Operation::Cancel => Ok(()),
                    Operation::Create | Operation::InitiatePayment | Operation::SettlePayment => {
                        Err(deny("only the patient or an administrator may do this"))
                    }
                    Operation::Delete => Err(deny("only administrators may delete records")),
                    Operation::ChangeRole => Err(deny("only administrators may change roles")),
                }
            }
        }
    }
}

/// The gate plus an audit trail. Stores call this before every read or write.
#[derive(Clone)]
pub struct AccessControl {
    audit: Arc<AccessAuditLog>,
}

impl AccessControl {
    pub fn new(audit: Arc<AccessAuditLog>) -> Self {
        Self { audit }
    }

    pub fn audit_log(&self) -> Arc<AccessAuditLog> {
        Arc::clone(&self.audit)
    }

    /// Decides a mutation or a single-entity read, recording denials.
    pub async fn check(
        &self,
        identity: &Identity,
        operation: Operation,
        target: &AccessTarget,
        entity_id: Option<Uuid>,
    ) -> Result<(), AccessDenied> {
        match AccessGate::authorize(identity, operation, target) {
            Ok(()) => {
                if operation.is_privileged() {
                    self.audit
                        .record(AuditEntry::new(
                            identity.user_id,
                            identity.role,
                            operation,
                            entity_id,
                            AuditOutcome::Allowed,
                        ))
                        .await;
                }
                Ok(())
            }
            Err(denied) => {
                self.audit
                    .record(
                        AuditEntry::new(
                            identity.user_id,
                            identity.role,
                            operation,
                            entity_id,
                            AuditOutcome::Denied,
                        )
                        .with_detail(denied.reason.clone()),
                    )
                    .await;
                Err(denied)
            }
        }
    }

    /// Read scoping for list queries: silently drops what the caller may not see.
    pub fn filter_visible<T>(
        &self,
        identity: &Identity,
        items: Vec<T>,
        target_of: impl Fn(&T) -> AccessTarget,
    ) -> Vec<T> {
        let before = items.len();
        let visible: Vec<T> = items
            .into_iter()
            .filter(|item| AccessGate::can_access(identity, Operation::View, &target_of(item)))
            .collect();
        debug!(
            "Read scoping for {} ({}): {} of {} visible",
            identity.user_id, identity.role, visible.len(), before
        );
        visible
    }
}
