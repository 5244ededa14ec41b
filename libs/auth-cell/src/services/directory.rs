use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

use security_cell::{AccessControl, AccessTarget, Operation};
use shared_models::auth::{Identity, Role};

use crate::models::{IdentityError, UserAccount};

/// Role assignments made by administrators.
pub struct UserDirectory {
    accounts: RwLock<HashMap<Uuid, UserAccount>>,
    access: AccessControl,
}

impl UserDirectory {
    pub fn new(access: AccessControl) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            access,
        }
    }

    pub async fn get(&self, user_id: Uuid) -> Option<UserAccount> {
        self.accounts.read().await.get(&user_id).cloned()
    }

    /// Unconditional for admins: no approval step, takes effect on the next request.
    #[instrument(skip(self, caller), fields(caller_id = %caller.user_id))]
    pub async fn change_role(
        &self,
        caller: &Identity,
        target_user_id: Uuid,
        role: Role,
        doctor_id: Option<Uuid>,
    ) -> Result<UserAccount, IdentityError> {
        self.access
            .check(caller, Operation::ChangeRole, &AccessTarget::user(target_user_id), Some(target_user_id))
            .await?;

        let doctor_id = match role {
            Role::Doctor => Some(doctor_id.ok_or_else(|| {
                IdentityError::Validation("A doctor id is required when assigning the doctor role".to_string())
            })?),
            Role::User | Role::Admin => None,
        };

        let account = UserAccount {
            user_id: target_user_id,
            role,
            doctor_id,
            updated_at: Utc::now(),
            updated_by: Some(caller.user_id),
        };

        self.accounts.write().await.insert(target_user_id, account.clone());
        info!("Role of user {} changed to {}", target_user_id, role);

        Ok(account)
    }

    pub async fn snapshot(&self) -> Vec<UserAccount> {
        let mut accounts: Vec<UserAccount> = self.accounts.read().await.values().cloned().collect();
        accounts.sort_by_key(|account| account.user_id);
        accounts
    }

    pub async fn restore(&self, accounts: Vec<UserAccount>) {
        let mut map = self.accounts.write().await;
        map.clear();
        map.extend(accounts.into_iter().map(|account| (account.user_id, account)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use security_cell::AccessAuditLog;
    use std::sync::Arc;

    fn directory() -> UserDirectory {
        UserDirectory::new(AccessControl::new(Arc::new(AccessAuditLog::default())))
    }

    #[tokio::test]
    async fn test_admin_changes_role() {
        let directory = directory();
        let admin = Identity::admin(Uuid::new_v4());
        let target = Uuid::new_v4();
        let doctor_id = Uuid::new_v4();

        let account = directory.change_role(&admin, target, Role::Doctor, Some(doctor_id)).await.unwrap();
        assert_eq!(account.role, Role::Doctor);
        assert_eq!(account.doctor_id, Some(doctor_id));
        assert_eq!(account.updated_by, Some(admin.user_id));
        assert_eq!(directory.get(target).await, Some(account));
    }

    #[tokio::test]
    async fn test_non_admin_cannot_change_roles() {
        let directory = directory();
        let patient = Identity::patient(Uuid::new_v4());

        // Not even their own.
        let result = directory.change_role(&patient, patient.user_id, Role::Admin, None).await;
        assert_matches!(result, Err(IdentityError::Forbidden(_)));
        assert!(directory.get(patient.user_id).await.is_none());
    }

    #[tokio::test]
    async fn test_doctor_role_requires_doctor_id() {
        let directory = directory();
        let admin = Identity::admin(Uuid::new_v4());

        let result = directory.change_role(&admin, Uuid::new_v4(), Role::Doctor, None).await;
        assert_matches!(result, Err(IdentityError::Validation(_)));
    }

    #[tokio::test]
    async fn test_demotion_drops_doctor_id() {
        let directory = directory();
        let admin = Identity::admin(Uuid::new_v4());
        let target = Uuid::new_v4();

        directory.change_role(&admin, target, Role::Doctor, Some(Uuid::new_v4())).await.unwrap();
        let account = directory.change_role(&admin, target, Role::User, Some(Uuid::new_v4())).await.unwrap();
        assert_eq!(account.doctor_id, None);
    }
}
