// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::create_appointment))
        .route("/search", get(handlers::search_appointments))
        .route("/availability", get(handlers::check_availability))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/access", get(handlers::check_session_access))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}

pub fn reschedule_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route(
            "/",
            post(handlers::create_reschedule_request).get(handlers::list_reschedule_requests),
        )
        .route("/eligible", get(handlers::list_eligible_appointments))
        .route(
            "/eligible/{appointment_id}",
            get(handlers::check_reschedule_eligibility),
        )
        .route(
            "/{request_id}/approve",
            post(handlers::approve_reschedule_request),
        )
        .route(
            "/{request_id}/reject",
            post(handlers::reject_reschedule_request),
        )
        .route("/{request_id}/pay", post(handlers::pay_reschedule_fee))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
