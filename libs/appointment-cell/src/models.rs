// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use security_cell::{AccessDenied, AccessTarget};
use shared_database::{Record, StoreError};
use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub time_slot: TimeSlot,
    pub total_amount: Decimal,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Owned by the patient, referenced by the assigned doctor.
    pub fn access_target(&self) -> AccessTarget {
        AccessTarget::new(self.user_id, self.doctor_id)
    }
}

impl Record for Appointment {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ==============================================================================
// TIME SLOTS
// ==============================================================================

/// Clinic opening hours, split into 30-minute consultations.
pub const FIRST_SLOT_HOUR: u32 = 8;
pub const LAST_SLOT_HOUR: u32 = 19;
pub const SLOT_MINUTES: u32 = 30;

/// A bookable start time. Only the fixed half-hour grid can be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSlot(NaiveTime);

impl TimeSlot {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if !(FIRST_SLOT_HOUR..=LAST_SLOT_HOUR).contains(&hour) || minute % SLOT_MINUTES != 0 {
            return None;
        }
        NaiveTime::from_hms_opt(hour, minute, 0).map(TimeSlot)
    }

    /// Every slot of the day in chronological order.
    pub fn all() -> Vec<TimeSlot> {
        (FIRST_SLOT_HOUR..=LAST_SLOT_HOUR)
            .flat_map(|hour| (0..60).step_by(SLOT_MINUTES as usize).map(move |minute| (hour, minute)))
            .filter_map(|(hour, minute)| TimeSlot::new(hour, minute))
            .collect()
    }

    pub fn parse(value: &str) -> Result<Self, AppointmentError> {
        let invalid = || {
            AppointmentError::Validation(format!(
                "Time slot '{}' is not one of the clinic's half-hour slots (08:00-19:30)",
                value
            ))
        };

        let time = NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| invalid())?;
        TimeSlot::new(time.hour(), time.minute()).ok_or_else(invalid)
    }

    pub fn start_time(&self) -> NaiveTime {
        self.0
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl TryFrom<String> for TimeSlot {
    type Error = AppointmentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TimeSlot::parse(&value)
    }
}

impl From<TimeSlot> for String {
    fn from(slot: TimeSlot) -> Self {
        slot.to_string()
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    /// Only set when an administrator books on a patient's behalf.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub time_slot: String,
    pub total_amount: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionAppointmentRequest {
    pub status: AppointmentStatus,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

/// What happened to an appointment when its payment settled as paid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PaymentAcknowledgement {
    /// Pending appointment moved to Confirmed.
    Confirmed { appointment: Appointment },
    /// Already Confirmed or Completed, nothing to do.
    Unchanged { status: AppointmentStatus },
    /// Cancelled appointments are never revived by a payment.
    Cancelled { appointment: Appointment },
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Error)]
pub enum AppointmentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Forbidden(#[from] AccessDenied),

    #[error("Appointment cannot move from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment {0} was modified by another request, reload and retry")]
    Conflict(Uuid),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<StoreError> for AppointmentError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { id, .. } => AppointmentError::NotFound(id),
            StoreError::VersionConflict { id, .. } => AppointmentError::Conflict(id),
            other => AppointmentError::Database(other.to_string()),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(error: AppointmentError) -> Self {
        match error {
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::NotFound(_) => AppError::NotFound(error.to_string()),
            AppointmentError::Forbidden(denied) => denied.into(),
            AppointmentError::InvalidTransition { .. } => AppError::InvalidTransition(error.to_string()),
            AppointmentError::Conflict(_) => AppError::Conflict(error.to_string()),
            AppointmentError::Database(msg) => AppError::Database(msg),
        }
    }
}
