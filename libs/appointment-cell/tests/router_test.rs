use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::{appointment_routes, handlers::AppointmentState, Appointment, AppointmentService};
use security_cell::{AccessAuditLog, AccessControl};
use shared_database::InMemoryTable;
use shared_models::auth::Identity;
use shared_utils::test_utils::StaticIdentityProvider;

struct TestApp {
    router: Router,
    patient: Identity,
    doctor: Identity,
}

fn create_app() -> TestApp {
    let patient = Identity::patient(Uuid::new_v4());
    let doctor = Identity::doctor(Uuid::new_v4(), Uuid::new_v4());
    let provider = StaticIdentityProvider::new()
        .with("patient-token", patient.clone())
        .with("doctor-token", doctor.clone())
        .with("stranger-token", Identity::doctor(Uuid::new_v4(), Uuid::new_v4()))
        .with("admin-token", Identity::admin(Uuid::new_v4()));

    let table: Arc<InMemoryTable<Appointment>> = Arc::new(InMemoryTable::new("appointments"));
    let appointments = Arc::new(AppointmentService::new(
        table,
        AccessControl::new(Arc::new(AccessAuditLog::default())),
    ));

    TestApp {
        router: appointment_routes(Arc::new(AppointmentState {
            identity: Arc::new(provider),
            appointments,
        })),
        patient,
        doctor,
    }
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn book(app: &TestApp) -> Value {
    let tomorrow = (Utc::now() + Duration::days(1)).date_naive();
    let (status, body) = send(
        app,
        request(
            "POST",
            "/",
            Some("patient-token"),
            Some(json!({
                "doctor_id": app.doctor.doctor_id,
                "appointment_date": tomorrow,
                "time_slot": "09:00",
                "total_amount": 5000,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["appointment"].clone()
}

#[tokio::test]
async fn test_requires_authentication() {
    let app = create_app();

    let (status, body) = send(&app, request("GET", "/", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Missing authorization header");

    let (status, _) = send(&app, request("GET", "/", Some("forged"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_slots_are_public() {
    let app = create_app();

    let (status, body) = send(&app, request("GET", "/slots", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(|s| s.len()), Some(24));
    assert_eq!(body[0], "08:00");
}

#[tokio::test]
async fn test_book_and_fetch() {
    let app = create_app();
    let appointment = book(&app).await;

    assert_eq!(appointment["status"], "pending");
    assert_eq!(appointment["user_id"], app.patient.user_id.to_string());
    assert_eq!(appointment["time_slot"], "09:00");

    let uri = format!("/{}", appointment["id"].as_str().unwrap());
    let (status, fetched) = send(&app, request("GET", &uri, Some("doctor-token"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, appointment);
}

#[tokio::test]
async fn test_invalid_booking_is_bad_request() {
    let app = create_app();

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/",
            Some("patient-token"),
            Some(json!({
                "doctor_id": app.doctor.doctor_id,
                "appointment_date": "2001-01-01",
                "time_slot": "09:00",
                "total_amount": 5000,
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("in the past"));
}

#[tokio::test]
async fn test_status_changes_map_to_http_errors() {
    let app = create_app();
    let appointment = book(&app).await;
    let uri = format!("/{}/status", appointment["id"].as_str().unwrap());

    let (status, _) = send(
        &app,
        request("PATCH", &uri, Some("stranger-token"), Some(json!({ "status": "confirmed" }))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        request("PATCH", &uri, Some("doctor-token"), Some(json!({ "status": "completed" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Appointment cannot move from pending to completed");

    let (status, body) = send(
        &app,
        request("PATCH", &uri, Some("doctor-token"), Some(json!({ "status": "confirmed" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "confirmed");
}

#[tokio::test]
async fn test_delete_is_admin_only() {
    let app = create_app();
    let appointment = book(&app).await;
    let uri = format!("/{}", appointment["id"].as_str().unwrap());

    let (status, _) = send(&app, request("DELETE", &uri, Some("patient-token"), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, request("DELETE", &uri, Some("admin-token"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_id"], appointment["id"]);

    let (status, _) = send(&app, request("GET", &uri, Some("admin-token"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_listings_are_scoped() {
    let app = create_app();
    book(&app).await;

    let (_, body) = send(&app, request("GET", "/all", Some("patient-token"), None)).await;
    assert_eq!(body["total"], 0);

    let (_, body) = send(&app, request("GET", "/all", Some("admin-token"), None)).await;
    assert_eq!(body["total"], 1);

    let uri = format!("/doctors/{}", app.doctor.doctor_id.unwrap());
    let (_, body) = send(&app, request("GET", &uri, Some("stranger-token"), None)).await;
    assert_eq!(body["total"], 0);

    let (_, body) = send(&app, request("GET", &uri, Some("doctor-token"), None)).await;
    assert_eq!(body["total"], 1);

    let uri = format!("/users/{}", app.patient.user_id);
    let (_, body) = send(&app, request("GET", &uri, Some("patient-token"), None)).await;
    assert_eq!(body["total"], 1);
}
