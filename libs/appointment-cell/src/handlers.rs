// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::Identity;
use shared_models::error::AppError;
use shared_utils::extractor::SharedIdentityProvider;

use crate::models::{Appointment, CreateAppointmentRequest, TimeSlot, TransitionAppointmentRequest};
use crate::services::AppointmentService;

#[derive(Clone)]
pub struct AppointmentState {
    pub identity: SharedIdentityProvider,
    pub appointments: Arc<AppointmentService>,
}

fn listing(appointments: Vec<Appointment>) -> Json<Value> {
    Json(json!({
        "total": appointments.len(),
        "appointments": appointments,
    }))
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let appointment = state.appointments.create(&identity, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "appointment": appointment,
            "message": "Appointment booked, awaiting confirmation"
        })),
    ))
}

pub async fn get_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(identity): Extension<Identity>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    let appointment = state.appointments.get_by_id(appointment_id, &identity).await?;
    Ok(Json(appointment))
}

#[axum::debug_handler]
pub async fn transition_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(identity): Extension<Identity>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<TransitionAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .appointments
        .transition(appointment_id, &identity, request.status, request.cancellation_reason)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Appointment is now {}", appointment.status),
        "appointment": appointment,
    })))
}

pub async fn delete_appointment(
    State(state): State<Arc<AppointmentState>>,
    Extension(identity): Extension<Identity>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let deleted = state.appointments.delete(appointment_id, &identity).await?;

    Ok(Json(json!({
        "success": true,
        "deleted_id": deleted.id,
    })))
}

pub async fn list_my_appointments(
    State(state): State<Arc<AppointmentState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, AppError> {
    Ok(listing(state.appointments.list_for(&identity).await?))
}

pub async fn list_all_appointments(
    State(state): State<Arc<AppointmentState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, AppError> {
    Ok(listing(state.appointments.list_all(&identity).await?))
}

pub async fn list_user_appointments(
    State(state): State<Arc<AppointmentState>>,
    Extension(identity): Extension<Identity>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    Ok(listing(state.appointments.list_by_user(&identity, user_id).await?))
}

pub async fn list_doctor_appointments(
    State(state): State<Arc<AppointmentState>>,
    Extension(identity): Extension<Identity>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    Ok(listing(state.appointments.list_by_doctor(&identity, doctor_id).await?))
}

pub async fn list_time_slots() -> Json<Vec<TimeSlot>> {
    Json(TimeSlot::all())
}
