// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use security_cell::{AccessControl, AccessTarget, Operation};
use shared_database::{Repository, Versioned};
use shared_models::auth::Identity;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, CreateAppointmentRequest,
    PaymentAcknowledgement,
};
use crate::services::lifecycle::AppointmentLifecycleService;

/// The Appointment Store. Every caller-facing operation consults the gate first.
pub struct AppointmentService {
    repository: Arc<dyn Repository<Appointment>>,
    access: AccessControl,
    lifecycle_service: AppointmentLifecycleService,
}

impl AppointmentService {
    pub fn new(repository: Arc<dyn Repository<Appointment>>, access: AccessControl) -> Self {
        Self {
            repository,
            access,
            lifecycle_service: AppointmentLifecycleService::new(),
        }
    }

    /// Books a new appointment in `Pending`.
    #[instrument(skip(self, caller, request), fields(caller_id = %caller.user_id, doctor_id = %request.doctor_id))]
    pub async fn create(
        &self,
        caller: &Identity,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let user_id = request.user_id.unwrap_or(caller.user_id);
        self.access
            .check(caller, Operation::Create, &AccessTarget::new(user_id, request.doctor_id), None)
            .await?;

        let time_slot = self.lifecycle_service.validate_new_appointment(
            request.appointment_date,
            &request.time_slot,
            request.total_amount,
            Utc::now().date_naive(),
        )?;

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            user_id,
            doctor_id: request.doctor_id,
            appointment_date: request.appointment_date,
            time_slot,
            total_amount: request.total_amount,
            status: AppointmentStatus::Pending,
            notes: request.notes.filter(|n| !n.trim().is_empty()),
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        let stored = self.repository.insert(appointment).await?;
        info!(
            appointment_id = %stored.record.id,
            "Appointment booked for {} at {}",
            stored.record.appointment_date, stored.record.time_slot
        );

        Ok(stored.record)
    }

    /// Moves an appointment along the state machine with an optimistic write.
    #[instrument(skip(self, caller, cancellation_reason), fields(caller_id = %caller.user_id))]
    pub async fn transition(
        &self,
        appointment_id: Uuid,
        caller: &Identity,
        target_status: AppointmentStatus,
        cancellation_reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;

        self.access
            .check(
                caller,
                self.lifecycle_service.operation_for(target_status),
                &current.record.access_target(),
                Some(appointment_id),
            )
            .await?;

        self.lifecycle_service
            .validate_status_transition(current.record.status, target_status)?;
        let cancellation_reason = self
            .lifecycle_service
            .resolve_cancellation_reason(target_status, cancellation_reason)?;

        let mut updated = current.record.clone();
        updated.status = target_status;
        updated.cancellation_reason = cancellation_reason;
        updated.updated_at = Utc::now();

        let stored = self
            .repository
            .compare_and_swap(appointment_id, current.version, updated)
            .await
            .map_err(|e| {
                warn!("Transition of {} to {} lost a race: {}", appointment_id, target_status, e);
                AppointmentError::from(e)
            })?;

        info!(
            appointment_id = %appointment_id,
            "Appointment moved from {} to {}",
            current.record.status, target_status
        );
        Ok(stored.record)
    }

    /// Admin-only hard delete, regardless of status.
    #[instrument(skip(self, caller), fields(caller_id = %caller.user_id))]
    pub async fn delete(&self, appointment_id: Uuid, caller: &Identity) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;

        self.access
            .check(caller, Operation::Delete, &current.record.access_target(), Some(appointment_id))
            .await?;

        let deleted = self
            .repository
            .delete(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound(appointment_id))?;

        info!(appointment_id = %appointment_id, "Appointment deleted");
        Ok(deleted)
    }

    pub async fn get_by_id(&self, appointment_id: Uuid, caller: &Identity) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;

        self.access
            .check(caller, Operation::View, &current.record.access_target(), Some(appointment_id))
            .await?;

        Ok(current.record)
    }

    pub async fn list_by_user(&self, caller: &Identity, user_id: Uuid) -> Result<Vec<Appointment>, AppointmentError> {
        self.list_visible(caller, |a| a.user_id == user_id).await
    }

    pub async fn list_by_doctor(&self, caller: &Identity, doctor_id: Uuid) -> Result<Vec<Appointment>, AppointmentError> {
        self.list_visible(caller, |a| a.doctor_id == doctor_id).await
    }

    /// Everything, for administrators. Anyone else gets an empty list.
    pub async fn list_all(&self, caller: &Identity) -> Result<Vec<Appointment>, AppointmentError> {
        if !caller.is_admin() {
            debug!("Non-admin {} asked for all appointments", caller.user_id);
            return Ok(Vec::new());
        }
        self.list_visible(caller, |_| true).await
    }

    /// Whatever the caller is allowed to see.
    pub async fn list_for(&self, caller: &Identity) -> Result<Vec<Appointment>, AppointmentError> {
        self.list_visible(caller, |_| true).await
    }

    /// Unscoped read for collaborating stores (payments check owners and amounts).
    pub async fn lookup(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        Ok(self.load(appointment_id).await?.record)
    }

    /// Applies a settled payment to its appointment.
    ///
    /// Runs on behalf of the system, not a caller. A `Conflict` means the row
    /// moved underneath us and the caller should retry.
    #[instrument(skip(self))]
    pub async fn acknowledge_payment(&self, appointment_id: Uuid) -> Result<PaymentAcknowledgement, AppointmentError> {
        let current = self.load(appointment_id).await?;

        match current.record.status {
            AppointmentStatus::Pending => {
                let mut updated = current.record.clone();
                updated.status = AppointmentStatus::Confirmed;
                updated.updated_at = Utc::now();

                let stored = self
                    .repository
                    .compare_and_swap(appointment_id, current.version, updated)
                    .await?;

                info!(appointment_id = %appointment_id, "Appointment confirmed by payment");
                Ok(PaymentAcknowledgement::Confirmed { appointment: stored.record })
            }
            AppointmentStatus::Cancelled => Ok(PaymentAcknowledgement::Cancelled { appointment: current.record }),
            status @ (AppointmentStatus::Confirmed | AppointmentStatus::Completed) => {
                debug!("Appointment {} already {}, payment changes nothing", appointment_id, status);
                Ok(PaymentAcknowledgement::Unchanged { status })
            }
        }
    }

    async fn load(&self, appointment_id: Uuid) -> Result<Versioned<Appointment>, AppointmentError> {
        self.repository
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    async fn list_visible(
        &self,
        caller: &Identity,
        predicate: impl Fn(&Appointment) -> bool,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let rows: Vec<Appointment> = self
            .repository
            .list()
            .await?
            .into_iter()
            .map(|row| row.record)
            .filter(|a| predicate(a))
            .collect();

        let mut visible = self.access.filter_visible(caller, rows, Appointment::access_target);
        visible.sort_by(|a, b| {
            (a.appointment_date, a.time_slot, a.created_at).cmp(&(b.appointment_date, b.time_slot, b.created_at))
        });
        Ok(visible)
    }
}
