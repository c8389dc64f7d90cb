use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use scheduling_cell::router::{appointment_routes, reschedule_routes};
use shared_config::AppConfig;
use subscription_cell::router::subscription_routes;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Care scheduling API is running!" }))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/reschedules", reschedule_routes(state.clone()))
        .nest("/subscriptions", subscription_routes(state))
}
