// libs/appointment-cell/src/services/lifecycle.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use security_cell::Operation;

use crate::models::{AppointmentError, AppointmentStatus, TimeSlot};

/// The appointment state machine:
/// Pending -> Confirmed | Cancelled, Confirmed -> Completed | Cancelled.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> &'static [AppointmentStatus] {
        match current_status {
            AppointmentStatus::Pending => &[AppointmentStatus::Confirmed, AppointmentStatus::Cancelled],
            AppointmentStatus::Confirmed => &[AppointmentStatus::Completed, AppointmentStatus::Cancelled],
            // Terminal states
            AppointmentStatus::Completed | AppointmentStatus::Cancelled => &[],
        }
    }

    /// The gate operation a move towards `target` requires.
    ///
    /// Nothing may move back to Pending; only ownership is checked for it and
    /// the state machine rejects it afterwards.
    pub fn operation_for(&self, target: AppointmentStatus) -> Operation {
        match target {
            AppointmentStatus::Confirmed => Operation::Confirm,
            AppointmentStatus::Completed => Operation::Complete,
            AppointmentStatus::Cancelled => Operation::Cancel,
            AppointmentStatus::Pending => Operation::View,
        }
    }

    /// A cancellation must carry a non-empty reason; every other status carries none.
    pub fn resolve_cancellation_reason(
        &self,
        target: AppointmentStatus,
        reason: Option<String>,
    ) -> Result<Option<String>, AppointmentError> {
        match target {
            AppointmentStatus::Cancelled => {
                let reason = reason
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| {
                        AppointmentError::Validation("A cancellation reason is required".to_string())
                    })?;
                Ok(Some(reason))
            }
            _ => Ok(None),
        }
    }

    /// Validate a new booking against the calendar and the slot grid.
    pub fn validate_new_appointment(
        &self,
        appointment_date: NaiveDate,
        time_slot: &str,
        total_amount: Decimal,
        today: NaiveDate,
    ) -> Result<TimeSlot, AppointmentError> {
        if appointment_date < today {
            return Err(AppointmentError::Validation(format!(
                "Appointment date {} is in the past",
                appointment_date
            )));
        }

        let slot = TimeSlot::parse(time_slot)?;

        if total_amount < Decimal::ZERO {
            return Err(AppointmentError::Validation(
                "Total amount cannot be negative".to_string(),
            ));
        }

        Ok(slot)
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
