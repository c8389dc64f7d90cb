// libs/subscription-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
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

use crate::services::plans::{PlanPolicySource, StaticPlanPolicySource};
use crate::services::quota::QuotaService;

fn quota_service(config: &AppConfig) -> QuotaService {
    QuotaService::new(
        Arc::new(SupabaseClient::new(config)),
        Arc::new(StaticPlanPolicySource::new()),
    )
}

/// Usage snapshot for a doctor's current subscription window.
#[axum::debug_handler]
pub async fn get_quota(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let is_own = user.id == doctor_id.to_string();
    if !is_own && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Not authorized to view this doctor's quota".to_string(),
        ));
    }

    let usage = quota_service(&state)
        .quota_snapshot(doctor_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Quota usage retrieved",
        "data": usage
    })))
}

#[axum::debug_handler]
pub async fn list_plans(
    State(_state): State<Arc<AppConfig>>,
    TypedHeader(_auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let plans = StaticPlanPolicySource::new().list_plans().await?;

    Ok(Json(json!({
        "success": true,
        "message": "Available plans",
        "data": plans
    })))
}
