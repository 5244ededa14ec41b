use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use futures::future::join_all;
use rust_decimal_macros::dec;
use uuid::Uuid;

use appointment_cell::{
    Appointment, AppointmentError, AppointmentService, AppointmentStatus, CreateAppointmentRequest,
    PaymentAcknowledgement,
};
use security_cell::{AccessAuditLog, AccessControl, AuditOutcome, Operation};
use shared_database::{InMemoryTable, Repository, StoreError, Versioned};
use shared_models::auth::Identity;

struct Fixture {
    service: AppointmentService,
    audit: Arc<AccessAuditLog>,
    patient: Identity,
    doctor: Identity,
    admin: Identity,
}

fn fixture() -> Fixture {
    let audit = Arc::new(AccessAuditLog::default());
    let table: Arc<InMemoryTable<Appointment>> = Arc::new(InMemoryTable::new("appointments"));
    Fixture {
        service: AppointmentService::new(table, AccessControl::new(audit.clone())),
        audit,
        patient: Identity::patient(Uuid::new_v4()),
        doctor: Identity::doctor(Uuid::new_v4(), Uuid::new_v4()),
        admin: Identity::admin(Uuid::new_v4()),
    }
}

fn tomorrow() -> NaiveDate {
    (Utc::now() + Duration::days(1)).date_naive()
}

fn booking(doctor: &Identity) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        user_id: None,
        doctor_id: doctor.doctor_id.unwrap(),
        appointment_date: tomorrow(),
        time_slot: "09:00".to_string(),
        total_amount: dec!(5000),
        notes: Some("Follow-up on blood pressure".to_string()),
    }
}

#[tokio::test]
async fn test_patient_books_pending_appointment() {
    let f = fixture();

    let appointment = f.service.create(&f.patient, booking(&f.doctor)).await.unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.user_id, f.patient.user_id);
    assert_eq!(Some(appointment.doctor_id), f.doctor.doctor_id);
    assert_eq!(appointment.time_slot.to_string(), "09:00");
    assert_eq!(appointment.total_amount, dec!(5000));
    assert_eq!(appointment.cancellation_reason, None);

    let fetched = f.service.get_by_id(appointment.id, &f.patient).await.unwrap();
    assert_eq!(fetched, appointment);
}

#[tokio::test]
async fn test_create_validation_errors() {
    let f = fixture();

    let mut past = booking(&f.doctor);
    past.appointment_date = (Utc::now() - Duration::days(1)).date_naive();
    assert_matches!(f.service.create(&f.patient, past).await, Err(AppointmentError::Validation(_)));

    let mut off_grid = booking(&f.doctor);
    off_grid.time_slot = "21:00".to_string();
    assert_matches!(f.service.create(&f.patient, off_grid).await, Err(AppointmentError::Validation(_)));

    let mut negative = booking(&f.doctor);
    negative.total_amount = dec!(-10);
    assert_matches!(f.service.create(&f.patient, negative).await, Err(AppointmentError::Validation(_)));
}

#[tokio::test]
async fn test_only_patient_or_admin_may_book() {
    let f = fixture();

    let mut for_someone_else = booking(&f.doctor);
    for_someone_else.user_id = Some(Uuid::new_v4());
    assert_matches!(
        f.service.create(&f.patient, for_someone_else.clone()).await,
        Err(AppointmentError::Forbidden(_))
    );

    assert_matches!(
        f.service.create(&f.doctor, booking(&f.doctor)).await,
        Err(AppointmentError::Forbidden(_))
    );

    let on_behalf = f.service.create(&f.admin, for_someone_else.clone()).await.unwrap();
    assert_eq!(Some(on_behalf.user_id), for_someone_else.user_id);
}

#[tokio::test]
async fn test_unassigned_doctor_cannot_confirm() {
    let f = fixture();
    let appointment = f.service.create(&f.patient, booking(&f.doctor)).await.unwrap();
    let stranger = Identity::doctor(Uuid::new_v4(), Uuid::new_v4());

    let result = f
        .service
        .transition(appointment.id, &stranger, AppointmentStatus::Confirmed, None)
        .await;

    assert_matches!(result, Err(AppointmentError::Forbidden(denied)) if denied.operation == Operation::Confirm);

    let unchanged = f.service.get_by_id(appointment.id, &f.patient).await.unwrap();
    assert_eq!(unchanged.status, AppointmentStatus::Pending);
    assert_eq!(f.audit.denial_count().await, 1);
}

#[tokio::test]
async fn test_full_lifecycle_by_assigned_doctor() {
    let f = fixture();
    let appointment = f.service.create(&f.patient, booking(&f.doctor)).await.unwrap();

    let confirmed = f
        .service
        .transition(appointment.id, &f.doctor, AppointmentStatus::Confirmed, None)
        .await
        .unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

    let completed = f
        .service
        .transition(appointment.id, &f.doctor, AppointmentStatus::Completed, None)
        .await
        .unwrap();
    assert_eq!(completed.status, AppointmentStatus::Completed);

    let reopened = f
        .service
        .transition(appointment.id, &f.admin, AppointmentStatus::Cancelled, Some("late".to_string()))
        .await;
    assert_matches!(
        reopened,
        Err(AppointmentError::InvalidTransition {
            from: AppointmentStatus::Completed,
            to: AppointmentStatus::Cancelled
        })
    );
}

#[tokio::test]
async fn test_patient_cannot_confirm_own_appointment() {
    let f = fixture();
    let appointment = f.service.create(&f.patient, booking(&f.doctor)).await.unwrap();

    assert_matches!(
        f.service.transition(appointment.id, &f.patient, AppointmentStatus::Confirmed, None).await,
        Err(AppointmentError::Forbidden(_))
    );
}

#[tokio::test]
async fn test_cancellation_requires_reason() {
    let f = fixture();
    let appointment = f.service.create(&f.patient, booking(&f.doctor)).await.unwrap();

    assert_matches!(
        f.service.transition(appointment.id, &f.patient, AppointmentStatus::Cancelled, None).await,
        Err(AppointmentError::Validation(_))
    );

    let cancelled = f
        .service
        .transition(
            appointment.id,
            &f.patient,
            AppointmentStatus::Cancelled,
            Some("Feeling better".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Feeling better"));
}

#[tokio::test]
async fn test_transition_of_missing_appointment() {
    let f = fixture();

    assert_matches!(
        f.service.transition(Uuid::new_v4(), &f.admin, AppointmentStatus::Confirmed, None).await,
        Err(AppointmentError::NotFound(_))
    );
}

#[tokio::test]
async fn test_admin_deletes_unconditionally() {
    let f = fixture();
    let appointment = f.service.create(&f.patient, booking(&f.doctor)).await.unwrap();
    f.service
        .transition(appointment.id, &f.doctor, AppointmentStatus::Confirmed, None)
        .await
        .unwrap();

    assert_matches!(
        f.service.delete(appointment.id, &f.patient).await,
        Err(AppointmentError::Forbidden(_))
    );
    assert_matches!(
        f.service.delete(appointment.id, &f.doctor).await,
        Err(AppointmentError::Forbidden(_))
    );

    let deleted = f.service.delete(appointment.id, &f.admin).await.unwrap();
    assert_eq!(deleted.id, appointment.id);
    assert_matches!(
        f.service.get_by_id(appointment.id, &f.admin).await,
        Err(AppointmentError::NotFound(_))
    );

    let audit = f.audit.recent(10).await;
    assert!(audit
        .iter()
        .any(|e| e.operation == Operation::Delete && e.outcome == AuditOutcome::Allowed));
}

#[tokio::test]
async fn test_queries_are_scoped_not_denied() {
    let f = fixture();
    let other_patient = Identity::patient(Uuid::new_v4());
    let mine = f.service.create(&f.patient, booking(&f.doctor)).await.unwrap();
    let theirs = f.service.create(&other_patient, booking(&f.doctor)).await.unwrap();

    let listed = f.service.list_by_user(&f.patient, other_patient.user_id).await.unwrap();
    assert!(listed.is_empty());

    let listed = f.service.list_for(&f.patient).await.unwrap();
    assert_eq!(listed.iter().map(|a| a.id).collect::<Vec<_>>(), vec![mine.id]);

    let by_doctor = f.service.list_by_doctor(&f.doctor, f.doctor.doctor_id.unwrap()).await.unwrap();
    assert_eq!(by_doctor.len(), 2);

    let stranger = Identity::doctor(Uuid::new_v4(), Uuid::new_v4());
    assert!(f.service.list_by_doctor(&stranger, f.doctor.doctor_id.unwrap()).await.unwrap().is_empty());

    assert!(f.service.list_all(&f.patient).await.unwrap().is_empty());
    assert_eq!(f.service.list_all(&f.admin).await.unwrap().len(), 2);

    assert_matches!(
        f.service.get_by_id(theirs.id, &f.patient).await,
        Err(AppointmentError::Forbidden(_))
    );
}

#[tokio::test]
async fn test_concurrent_confirmations_have_one_winner() {
    let f = fixture();
    let appointment = f.service.create(&f.patient, booking(&f.doctor)).await.unwrap();

    let attempts = (0..8).map(|_| {
        f.service
            .transition(appointment.id, &f.doctor, AppointmentStatus::Confirmed, None)
    });
    let results = join_all(attempts).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results.into_iter().filter_map(Result::err) {
        assert_matches!(
            result,
            AppointmentError::Conflict(_) | AppointmentError::InvalidTransition { .. }
        );
    }
}

/// Lets another writer slip in between the read and the write of the first update.
struct RacingRepository {
    inner: InMemoryTable<Appointment>,
    raced: AtomicBool,
}

#[async_trait]
impl Repository<Appointment> for RacingRepository {
    async fn insert(&self, record: Appointment) -> Result<Versioned<Appointment>, StoreError> {
        self.inner.insert(record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Versioned<Appointment>>, StoreError> {
        self.inner.get(id).await
    }

    async fn compare_and_swap(
        &self,
        id: Uuid,
        expected_version: u64,
        record: Appointment,
    ) -> Result<Versioned<Appointment>, StoreError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let mut interloper = record.clone();
            interloper.status = AppointmentStatus::Cancelled;
            interloper.cancellation_reason = Some("Patient cancelled".to_string());
            self.inner.compare_and_swap(id, expected_version, interloper).await?;
        }
        self.inner.compare_and_swap(id, expected_version, record).await
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.inner.delete(id).await
    }

    async fn list(&self) -> Result<Vec<Versioned<Appointment>>, StoreError> {
        self.inner.list().await
    }
}

#[tokio::test]
async fn test_lost_update_is_reported_as_conflict() {
    let repository = Arc::new(RacingRepository {
        inner: InMemoryTable::new("appointments"),
        raced: AtomicBool::new(false),
    });
    let service = AppointmentService::new(
        repository.clone(),
        AccessControl::new(Arc::new(AccessAuditLog::default())),
    );
    let patient = Identity::patient(Uuid::new_v4());
    let doctor = Identity::doctor(Uuid::new_v4(), Uuid::new_v4());

    let appointment = service.create(&patient, booking(&doctor)).await.unwrap();
    let result = service
        .transition(appointment.id, &doctor, AppointmentStatus::Confirmed, None)
        .await;

    assert_matches!(result, Err(AppointmentError::Conflict(id)) if id == appointment.id);

    let stored = repository.get(appointment.id).await.unwrap().unwrap();
    assert_eq!(stored.record.status, AppointmentStatus::Cancelled);
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn test_payment_acknowledgement() {
    let f = fixture();

    let pending = f.service.create(&f.patient, booking(&f.doctor)).await.unwrap();
    assert_matches!(
        f.service.acknowledge_payment(pending.id).await.unwrap(),
        PaymentAcknowledgement::Confirmed { appointment } if appointment.status == AppointmentStatus::Confirmed
    );
    assert_matches!(
        f.service.acknowledge_payment(pending.id).await.unwrap(),
        PaymentAcknowledgement::Unchanged { status: AppointmentStatus::Confirmed }
    );

    let cancelled = f.service.create(&f.patient, booking(&f.doctor)).await.unwrap();
    f.service
        .transition(cancelled.id, &f.patient, AppointmentStatus::Cancelled, Some("Moved away".to_string()))
        .await
        .unwrap();
    assert_matches!(
        f.service.acknowledge_payment(cancelled.id).await.unwrap(),
        PaymentAcknowledgement::Cancelled { appointment } if appointment.status == AppointmentStatus::Cancelled
    );

    assert_matches!(
        f.service.acknowledge_payment(Uuid::new_v4()).await,
        Err(AppointmentError::NotFound(_))
    );
}
