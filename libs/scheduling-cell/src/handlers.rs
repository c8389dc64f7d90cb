// libs/scheduling-cell/src/handlers.rs
//
// HTTP boundary for appointments and reschedules. Services are assembled per
// request from shared state; handlers translate between the wire envelope and
// domain results.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;
use shared_models::error::AppError;
use subscription_cell::services::plans::StaticPlanPolicySource;
use subscription_cell::services::quota::QuotaService;

use crate::models::{
    AppointmentSearchQuery, ApproveRescheduleRequest, CreateAppointmentRequest,
    CreateRescheduleRequest, RejectRescheduleRequest, SlotAvailabilityQuery, UpdateStatusRequest,
};
use crate::services::access::AccessGuardService;
use crate::services::collaborators::{SupabaseNotificationSink, SupabasePaymentClient};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::reschedule::RescheduleService;

fn lifecycle_service(config: &Arc<AppConfig>) -> AppointmentLifecycleService {
    let supabase = Arc::new(SupabaseClient::new(config));
    AppointmentLifecycleService::new(
        supabase.clone(),
        Arc::new(QuotaService::new(
            supabase.clone(),
            Arc::new(StaticPlanPolicySource::new()),
        )),
        Arc::new(SupabasePaymentClient::new(supabase.clone())),
        Arc::new(SupabaseNotificationSink::new(supabase)),
        config.clone(),
    )
}

fn reschedule_service(config: &Arc<AppConfig>) -> RescheduleService {
    let supabase = Arc::new(SupabaseClient::new(config));
    RescheduleService::new(
        supabase.clone(),
        Arc::new(SupabasePaymentClient::new(supabase.clone())),
        Arc::new(SupabaseNotificationSink::new(supabase)),
        config.clone(),
    )
}

fn access_service(config: &Arc<AppConfig>) -> AccessGuardService {
    let supabase = Arc::new(SupabaseClient::new(config));
    AccessGuardService::new(supabase, config.clone())
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = lifecycle_service(&state)
        .create_appointment(&user, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment created",
        "data": appointment
    })))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = lifecycle_service(&state)
        .search_appointments(&user, query, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointments retrieved",
        "data": appointments
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = lifecycle_service(&state)
        .get_appointment_for(&user, appointment_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment retrieved",
        "data": appointment
    })))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = lifecycle_service(&state)
        .update_status(&user, appointment_id, request.status, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment status updated",
        "data": appointment
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = lifecycle_service(&state)
        .cancel_appointment(&user, appointment_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment cancelled",
        "data": appointment
    })))
}

#[axum::debug_handler]
pub async fn check_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<SlotAvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let available = lifecycle_service(&state)
        .is_slot_available(
            query.doctor_id,
            query.appointment_date,
            &query.start_time,
            auth.token(),
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Availability checked",
        "data": { "available": available }
    })))
}

#[axum::debug_handler]
pub async fn check_session_access(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let check = access_service(&state)
        .check_session_access(&user, appointment_id, auth.token())
        .await?;

    let message = match &check.reason {
        Some(denial) => denial.description(),
        None => "Access granted".to_string(),
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "data": check
    })))
}

// ==============================================================================
// RESCHEDULES
// ==============================================================================

#[axum::debug_handler]
pub async fn list_eligible_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let eligible = reschedule_service(&state)
        .list_eligible_appointments(&user, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Eligible appointments retrieved",
        "data": eligible
    })))
}

#[axum::debug_handler]
pub async fn check_reschedule_eligibility(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let verdict = reschedule_service(&state)
        .check_eligibility(&user, appointment_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Eligibility checked",
        "data": verdict
    })))
}

#[axum::debug_handler]
pub async fn create_reschedule_request(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateRescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let created = reschedule_service(&state)
        .create_request(&user, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Reschedule request created",
        "data": created
    })))
}

#[axum::debug_handler]
pub async fn list_reschedule_requests(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let requests = reschedule_service(&state)
        .list_requests(&user, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Reschedule requests retrieved",
        "data": requests
    })))
}

#[axum::debug_handler]
pub async fn approve_reschedule_request(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
    Json(decision): Json<ApproveRescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let updated = reschedule_service(&state)
        .approve_request(&user, request_id, decision, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Reschedule request approved",
        "data": updated
    })))
}

#[axum::debug_handler]
pub async fn reject_reschedule_request(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
    Json(decision): Json<RejectRescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let updated = reschedule_service(&state)
        .reject_request(&user, request_id, decision, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Reschedule request rejected",
        "data": updated
    })))
}

#[axum::debug_handler]
pub async fn pay_reschedule_fee(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let updated = reschedule_service(&state)
        .pay_fee(&user, request_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Reschedule fee paid",
        "data": updated
    })))
}
