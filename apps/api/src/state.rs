use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use appointment_cell::{handlers::AppointmentState, Appointment, AppointmentService};
use auth_cell::{handlers::AuthState, IdentityService, UserAccount, UserDirectory};
use payment_cell::handlers::PaymentState;
use payment_cell::{
    GatewayError, MobileMoneyGateway, Payment, PaymentEventBus, PaymentExpiryWorker,
    PaymentReconciliationService, PaymentService, SettlementCoordinator, StkPushClient,
};
use security_cell::{handlers::SecurityState, AccessAuditLog, AccessControl};
use shared_config::AppConfig;
use shared_database::{load_snapshot, save_snapshot, InMemoryTable, StoreError, Versioned};
use shared_utils::extractor::SharedIdentityProvider;

const AUDIT_CAPACITY: usize = 10_000;

/// Everything persisted between runs.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub appointments: Vec<Versioned<Appointment>>,
    #[serde(default)]
    pub payments: Vec<Versioned<Payment>>,
    #[serde(default)]
    pub users: Vec<UserAccount>,
}

/// The wired-up application: tables, services and the per-cell router states.
pub struct AppServices {
    pub config: Arc<AppConfig>,
    pub audit: Arc<AccessAuditLog>,
    pub appointment_table: Arc<InMemoryTable<Appointment>>,
    pub payment_table: Arc<InMemoryTable<Payment>>,
    pub identity: Arc<IdentityService>,
    pub appointments: Arc<AppointmentService>,
    pub payments: Arc<PaymentService>,
    pub reconciliation: Arc<PaymentReconciliationService>,
    pub coordinator: Arc<SettlementCoordinator>,
}

impl AppServices {
    /// Builds the services, using the STK push client when it is configured.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let gateway: Option<Arc<dyn MobileMoneyGateway>> = match StkPushClient::new(&config) {
            Ok(client) => Some(Arc::new(client)),
            Err(GatewayError::NotConfigured) => None,
            Err(e) => {
                warn!("Mobile money gateway unavailable: {}", e);
                None
            }
        };
        Self::with_gateway(config, gateway)
    }

    pub fn with_gateway(config: Arc<AppConfig>, gateway: Option<Arc<dyn MobileMoneyGateway>>) -> Self {
        let audit = Arc::new(AccessAuditLog::new(AUDIT_CAPACITY));
        let access = AccessControl::new(audit.clone());

        let appointment_table: Arc<InMemoryTable<Appointment>> = Arc::new(InMemoryTable::new("appointments"));
        let payment_table: Arc<InMemoryTable<Payment>> = Arc::new(InMemoryTable::new("payments"));

        let directory = Arc::new(UserDirectory::new(access.clone()));
        let identity = Arc::new(IdentityService::new(config.clone(), directory));

        let appointments = Arc::new(AppointmentService::new(appointment_table.clone(), access.clone()));
        let payments = Arc::new(PaymentService::new(
            payment_table.clone(),
            appointments.clone(),
            access,
            config.clone(),
            PaymentEventBus::default(),
        ));
        let coordinator = Arc::new(SettlementCoordinator::new(
            appointments.clone(),
            payments.clone(),
            config.confirm_appointment_on_payment,
        ));
        let reconciliation = Arc::new(PaymentReconciliationService::new(
            payments.clone(),
            gateway,
            coordinator.clone(),
        ));

        Self {
            config,
            audit,
            appointment_table,
            payment_table,
            identity,
            appointments,
            payments,
            reconciliation,
            coordinator,
        }
    }

    pub fn identity_provider(&self) -> SharedIdentityProvider {
        self.identity.clone()
    }

    pub fn auth_state(&self) -> Arc<AuthState> {
        Arc::new(AuthState {
            identity: self.identity.clone(),
        })
    }

    pub fn appointment_state(&self) -> Arc<AppointmentState> {
        Arc::new(AppointmentState {
            identity: self.identity_provider(),
            appointments: self.appointments.clone(),
        })
    }

    pub fn payment_state(&self) -> Arc<PaymentState> {
        Arc::new(PaymentState {
            identity: self.identity_provider(),
            payments: self.payments.clone(),
            reconciliation: self.reconciliation.clone(),
            coordinator: self.coordinator.clone(),
            callback_token: self.config.mobile_money_callback_token.clone(),
        })
    }

    pub fn security_state(&self) -> Arc<SecurityState> {
        Arc::new(SecurityState {
            identity: self.identity_provider(),
            audit: self.audit.clone(),
        })
    }

    /// Starts the settlement coordinator and the expiry sweep. Both stop when
    /// `shutdown` flips to true.
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let coordinator = tokio::spawn(
            self.coordinator
                .clone()
                .run(self.payments.events().subscribe(), shutdown.clone()),
        );

        let expiry = Arc::new(PaymentExpiryWorker::new(
            self.payments.clone(),
            Duration::from_secs(self.config.expiry_sweep_interval_seconds),
        ));
        let expiry = tokio::spawn(expiry.run(shutdown));

        vec![coordinator, expiry]
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            appointments: self.appointment_table.snapshot().await,
            payments: self.payment_table.snapshot().await,
            users: self.identity.directory().snapshot().await,
        }
    }

    pub async fn restore(&self, snapshot: StoreSnapshot) {
        info!(
            "Restoring {} appointments, {} payments and {} user accounts",
            snapshot.appointments.len(),
            snapshot.payments.len(),
            snapshot.users.len()
        );
        self.appointment_table.restore(snapshot.appointments).await;
        self.payment_table.restore(snapshot.payments).await;
        self.identity.directory().restore(snapshot.users).await;
    }

    /// Loads the snapshot at `path` if there is one.
    pub async fn restore_from(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(snapshot) = load_snapshot::<StoreSnapshot>(path).await? {
            self.restore(snapshot).await;
        }
        Ok(())
    }

    pub async fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        save_snapshot(path, &self.snapshot().await).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appointment_cell::CreateAppointmentRequest;
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;
    use shared_models::auth::{Identity, Role};
    use shared_utils::test_utils::TestConfig;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clinic.json");
        let config = TestConfig::default().to_arc();

        let first = AppServices::with_gateway(config.clone(), None);
        let patient = Identity::patient(Uuid::new_v4());
        let admin = Identity::admin(Uuid::new_v4());
        let appointment = first
            .appointments
            .create(
                &patient,
                CreateAppointmentRequest {
                    user_id: None,
                    doctor_id: Uuid::new_v4(),
                    appointment_date: (Utc::now() + ChronoDuration::days(3)).date_naive(),
                    time_slot: "10:30".to_string(),
                    total_amount: dec!(1200),
                    notes: None,
                },
            )
            .await
            .unwrap();
        first
            .identity
            .directory()
            .change_role(&admin, patient.user_id, Role::Admin, None)
            .await
            .unwrap();
        first.save_to(&path).await.unwrap();

        let second = AppServices::with_gateway(config, None);
        second.restore_from(&path).await.unwrap();

        assert_eq!(second.appointments.lookup(appointment.id).await.unwrap(), appointment);
        let account = second.identity.directory().get(patient.user_id).await.unwrap();
        assert_eq!(account.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let services = AppServices::with_gateway(TestConfig::default().to_arc(), None);

        services.restore_from(&dir.path().join("absent.json")).await.unwrap();
        assert!(services.appointment_table.is_empty().await);
    }

    #[test]
    fn test_unconfigured_gateway_is_skipped() {
        let config = AppConfig {
            mobile_money_api_key: String::new(),
            ..TestConfig::default().to_app_config()
        };
        // Building must not fail without mobile money credentials
        let services = AppServices::from_config(Arc::new(config));
        assert!(!services.config.is_mobile_money_configured());
    }
}
