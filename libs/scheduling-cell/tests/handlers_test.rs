use std::sync::Arc;

use assert_matches::assert_matches;
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use headers::{authorization::Bearer, Authorization};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduling_cell::handlers::*;
use scheduling_cell::models::*;
use shared_config::AppConfig;
use shared_models::{auth::User, error::AppError};
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn user_extension(role: &str, id: &str) -> Extension<User> {
    Extension(User {
        id: id.to_string(),
        email: Some(format!("{}@example.com", role)),
        role: Some(role.to_string()),
        metadata: None,
        created_at: Some(Utc::now()),
    })
}

fn auth_header(config: &Arc<AppConfig>, user: &TestUser) -> TypedHeader<Authorization<Bearer>> {
    let token = JwtTestUtils::create_token(user, &config.supabase_jwt_secret, 3600);
    TypedHeader(Authorization::bearer(&token).unwrap())
}

// Local midnight at +300 shifted into UTC, the format the booking path
// persists.
fn stored_date(local_date: NaiveDate) -> String {
    let midnight = Utc.from_utc_datetime(&local_date.and_time(NaiveTime::MIN));
    (midnight - Duration::minutes(300)).to_rfc3339()
}

// Row whose window starts at `start_utc`, expressed in +300 wall clock.
fn appointment_row_starting_at(
    appointment_id: Uuid,
    doctor_id: Uuid,
    patient_id: Uuid,
    start_utc: DateTime<Utc>,
    status: &str,
) -> serde_json::Value {
    let local = start_utc + Duration::minutes(300);
    MockSupabaseResponses::appointment_response(
        &appointment_id.to_string(),
        &doctor_id.to_string(),
        &patient_id.to_string(),
        &stored_date(local.date_naive()),
        &local.format("%H:%M").to_string(),
        status,
    )
}

fn future_appointment_row(
    appointment_id: Uuid,
    doctor_id: Uuid,
    patient_id: Uuid,
    status: &str,
) -> serde_json::Value {
    MockSupabaseResponses::appointment_response(
        &appointment_id.to_string(),
        &doctor_id.to_string(),
        &patient_id.to_string(),
        &stored_date((Utc::now() + Duration::days(3)).date_naive()),
        "17:45",
        status,
    )
}

async fn mount_notification_sink(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": Uuid::new_v4() }])))
        .mount(mock_server)
        .await;
}

async fn mount_doctor(mock_server: &MockServer, doctor_id: Uuid) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_response(
                &doctor_id.to_string(),
                "doctor@example.com",
                "Dr. Test",
            )
        ])))
        .mount(mock_server)
        .await;
}

async fn mount_unlimited_subscription(mock_server: &MockServer, doctor_id: Uuid) {
    let expires = (Utc::now() + Duration::days(20)).to_rfc3339();
    Mock::given(method("GET"))
        .and(path("/rest/v1/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::subscription_response(
                &doctor_id.to_string(),
                "premium",
                &expires,
            )
        ])))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn create_appointment_succeeds() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();

    let doctor_id = Uuid::new_v4();
    let patient = TestUser::patient("patient@example.com");
    let patient_id = Uuid::parse_str(&patient.id).unwrap();
    let appointment_id = Uuid::new_v4();

    mount_doctor(&mock_server, doctor_id).await;
    mount_unlimited_subscription(&mock_server, doctor_id).await;
    mount_notification_sink(&mock_server).await;

    // No existing booking holds the slot.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            future_appointment_row(appointment_id, doctor_id, patient_id, "pending")
        ])))
        .mount(&mock_server)
        .await;

    let request = CreateAppointmentRequest {
        doctor_id,
        appointment_date: (Utc::now() + Duration::days(3)).date_naive(),
        start_time: "17:45".to_string(),
        booking_kind: BookingKind::Online,
        duration_minutes: None,
        timezone: Some("UTC+5".to_string()),
        timezone_offset_minutes: Some(300),
    };

    let response = create_appointment(
        State(config.clone()),
        auth_header(&config, &patient),
        user_extension("patient", &patient.id),
        Json(request),
    )
    .await
    .expect("appointment creation should succeed");

    assert_eq!(response.0["success"], true);
    assert_eq!(response.0["data"]["status"], "pending");
}

#[tokio::test]
async fn create_appointment_reports_conflict_when_slot_is_taken() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();

    let doctor_id = Uuid::new_v4();
    let patient = TestUser::patient("patient@example.com");

    mount_doctor(&mock_server, doctor_id).await;
    mount_unlimited_subscription(&mock_server, doctor_id).await;
    mount_notification_sink(&mock_server).await;

    // The advisory pre-check sees a free slot, then the conditional insert
    // loses the race and comes back empty.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let request = CreateAppointmentRequest {
        doctor_id,
        appointment_date: (Utc::now() + Duration::days(3)).date_naive(),
        start_time: "17:45".to_string(),
        booking_kind: BookingKind::Online,
        duration_minutes: None,
        timezone: None,
        timezone_offset_minutes: Some(300),
    };

    let error = create_appointment(
        State(config.clone()),
        auth_header(&config, &patient),
        user_extension("patient", &patient.id),
        Json(request),
    )
    .await
    .expect_err("a lost insert race must surface as a conflict");

    assert_matches!(error, AppError::Conflict(_));
}

#[tokio::test]
async fn create_appointment_rejects_exhausted_quota() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();

    let doctor_id = Uuid::new_v4();
    let patient = TestUser::patient("patient@example.com");

    mount_doctor(&mock_server, doctor_id).await;
    mount_notification_sink(&mock_server).await;

    // Basic plan: five video consultations per window, all used up.
    let expires = (Utc::now() + Duration::days(10)).to_rfc3339();
    Mock::given(method("GET"))
        .and(path("/rest/v1/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::subscription_response(&doctor_id.to_string(), "basic", &expires)
        ])))
        .mount(&mock_server)
        .await;

    let used: Vec<serde_json::Value> =
        (0..5).map(|_| json!({ "id": Uuid::new_v4() })).collect();
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(used)))
        .mount(&mock_server)
        .await;

    let request = CreateAppointmentRequest {
        doctor_id,
        appointment_date: (Utc::now() + Duration::days(3)).date_naive(),
        start_time: "17:45".to_string(),
        booking_kind: BookingKind::Online,
        duration_minutes: None,
        timezone: None,
        timezone_offset_minutes: Some(300),
    };

    let error = create_appointment(
        State(config.clone()),
        auth_header(&config, &patient),
        user_extension("patient", &patient.id),
        Json(request),
    )
    .await
    .expect_err("a full quota must block the booking");

    assert_matches!(error, AppError::QuotaExceeded(_));
}

#[tokio::test]
async fn doctor_confirms_pending_appointment() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();

    let doctor = TestUser::doctor("doctor@example.com");
    let doctor_id = Uuid::parse_str(&doctor.id).unwrap();
    let patient_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mount_notification_sink(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            future_appointment_row(appointment_id, doctor_id, patient_id, "pending")
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            future_appointment_row(appointment_id, doctor_id, patient_id, "confirmed")
        ])))
        .mount(&mock_server)
        .await;

    let response = update_appointment_status(
        State(config.clone()),
        auth_header(&config, &doctor),
        user_extension("doctor", &doctor.id),
        Path(appointment_id),
        Json(UpdateStatusRequest {
            status: AppointmentStatus::Confirmed,
            notes: None,
        }),
    )
    .await
    .expect("the doctor may confirm their own pending appointment");

    assert_eq!(response.0["data"]["status"], "confirmed");
}

#[tokio::test]
async fn patient_cannot_confirm_appointment() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();

    let patient = TestUser::patient("patient@example.com");
    let patient_id = Uuid::parse_str(&patient.id).unwrap();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            future_appointment_row(appointment_id, Uuid::new_v4(), patient_id, "pending")
        ])))
        .mount(&mock_server)
        .await;

    let error = update_appointment_status(
        State(config.clone()),
        auth_header(&config, &patient),
        user_extension("patient", &patient.id),
        Path(appointment_id),
        Json(UpdateStatusRequest {
            status: AppointmentStatus::Confirmed,
            notes: None,
        }),
    )
    .await
    .expect_err("confirmation is a doctor-side decision");

    assert_matches!(error, AppError::Forbidden(_));
}

#[tokio::test]
async fn rescheduled_status_is_not_settable_directly() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();

    // Even an admin cannot write it through the generic status update.
    let admin = TestUser::admin("admin@example.com");
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            future_appointment_row(appointment_id, Uuid::new_v4(), Uuid::new_v4(), "confirmed")
        ])))
        .mount(&mock_server)
        .await;

    let error = update_appointment_status(
        State(config.clone()),
        auth_header(&config, &admin),
        user_extension("admin", &admin.id),
        Path(appointment_id),
        Json(UpdateStatusRequest {
            status: AppointmentStatus::Rescheduled,
            notes: None,
        }),
    )
    .await
    .expect_err("rescheduled is reserved for the reschedule workflow");

    assert_matches!(error, AppError::State(_));
}

#[tokio::test]
async fn cancellation_is_blocked_after_start() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();

    let patient = TestUser::patient("patient@example.com");
    let patient_id = Uuid::parse_str(&patient.id).unwrap();
    let appointment_id = Uuid::new_v4();

    // Started an hour ago.
    let row = appointment_row_starting_at(
        appointment_id,
        Uuid::new_v4(),
        patient_id,
        Utc::now() - Duration::hours(1),
        "confirmed",
    );

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&mock_server)
        .await;

    let error = cancel_appointment(
        State(config.clone()),
        auth_header(&config, &patient),
        user_extension("patient", &patient.id),
        Path(appointment_id),
    )
    .await
    .expect_err("late cancellation must be refused");

    assert_matches!(error, AppError::State(_));
}

#[tokio::test]
async fn availability_reports_taken_slot() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();
    let patient = TestUser::patient("patient@example.com");
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": Uuid::new_v4() }
        ])))
        .mount(&mock_server)
        .await;

    let response = check_availability(
        State(config.clone()),
        auth_header(&config, &patient),
        Query(SlotAvailabilityQuery {
            doctor_id,
            appointment_date: (Utc::now() + Duration::days(3)).date_naive(),
            start_time: "17:45".to_string(),
        }),
    )
    .await
    .expect("availability probe should succeed");

    assert_eq!(response.0["data"]["available"], false);
}

#[tokio::test]
async fn session_access_is_denied_before_window_opens() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();

    let patient = TestUser::patient("patient@example.com");
    let patient_id = Uuid::parse_str(&patient.id).unwrap();
    let appointment_id = Uuid::new_v4();

    // Starts in half an hour; the window opens two minutes before.
    let row = appointment_row_starting_at(
        appointment_id,
        Uuid::new_v4(),
        patient_id,
        Utc::now() + Duration::minutes(30),
        "confirmed",
    );

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&mock_server)
        .await;

    let response = check_session_access(
        State(config.clone()),
        auth_header(&config, &patient),
        user_extension("patient", &patient.id),
        Path(appointment_id),
    )
    .await
    .expect("the check itself succeeds even when access is denied");

    assert_eq!(response.0["data"]["is_valid"], false);
    assert_eq!(response.0["data"]["reason"]["kind"], "BEFORE_START");
}

#[tokio::test]
async fn outsider_cannot_view_appointment() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();

    let outsider = TestUser::patient("other@example.com");
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            future_appointment_row(appointment_id, Uuid::new_v4(), Uuid::new_v4(), "confirmed")
        ])))
        .mount(&mock_server)
        .await;

    let error = get_appointment(
        State(config.clone()),
        auth_header(&config, &outsider),
        user_extension("patient", &outsider.id),
        Path(appointment_id),
    )
    .await
    .expect_err("only participants may view an appointment");

    assert_matches!(error, AppError::Forbidden(_));
}
