// libs/subscription-cell/src/services/quota.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{QuotaUsage, Subscription, SubscriptionError, SubscriptionStatus, UsageKind};
use crate::services::plans::PlanPolicySource;

/// Advisory gate consulted before a doctor accepts a booking or chat. Reads
/// only; the caller performs the actual write after the gate passes.
pub struct QuotaService {
    supabase: Arc<SupabaseClient>,
    plans: Arc<dyn PlanPolicySource>,
}

/// The rolling usage window: `[expires_at - duration_days, expires_at]`.
/// Recomputed on every check, never persisted.
pub fn rolling_window(
    expires_at: DateTime<Utc>,
    duration_days: i64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    (expires_at - Duration::days(duration_days), expires_at)
}

impl QuotaService {
    pub fn new(supabase: Arc<SupabaseClient>, plans: Arc<dyn PlanPolicySource>) -> Self {
        Self { supabase, plans }
    }

    /// Fails with `QuotaExceeded` naming the breached limit, or
    /// `SubscriptionInactive` when the doctor has no live subscription.
    pub async fn check_booking_allowed(
        &self,
        doctor_id: Uuid,
        kind: UsageKind,
        auth_token: &str,
    ) -> Result<(), SubscriptionError> {
        debug!("Checking {} quota for doctor {}", kind.limit_name(), doctor_id);

        let subscription = self.get_active_subscription(doctor_id, auth_token).await?;
        let plan = self.plans.get_plan(&subscription.plan_id).await?;

        let cap = match plan.limits.cap_for(kind) {
            Some(cap) => cap,
            None => return Ok(()), // unlimited
        };

        let (window_start, window_end) = rolling_window(subscription.expires_at, plan.duration_days);
        let used = self
            .count_usage(doctor_id, kind, window_start, window_end, auth_token)
            .await?;

        if used >= cap {
            warn!(
                "Doctor {} reached {} limit ({}/{})",
                doctor_id,
                kind.limit_name(),
                used,
                cap
            );
            return Err(SubscriptionError::QuotaExceeded {
                limit_name: kind.limit_name().to_string(),
                limit: cap,
            });
        }

        Ok(())
    }

    pub async fn check_chat_allowed(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SubscriptionError> {
        self.check_booking_allowed(doctor_id, UsageKind::ChatSession, auth_token)
            .await
    }

    /// Full usage snapshot for the doctor's current window.
    pub async fn quota_snapshot(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<QuotaUsage, SubscriptionError> {
        let subscription = self.get_active_subscription(doctor_id, auth_token).await?;
        let plan = self.plans.get_plan(&subscription.plan_id).await?;
        let (window_start, window_end) = rolling_window(subscription.expires_at, plan.duration_days);

        let private_used = self
            .count_usage(
                doctor_id,
                UsageKind::PrivateConsultation,
                window_start,
                window_end,
                auth_token,
            )
            .await?;
        let video_used = self
            .count_usage(
                doctor_id,
                UsageKind::VideoConsultation,
                window_start,
                window_end,
                auth_token,
            )
            .await?;
        let chat_used = self
            .count_usage(
                doctor_id,
                UsageKind::ChatSession,
                window_start,
                window_end,
                auth_token,
            )
            .await?;

        Ok(QuotaUsage {
            doctor_id,
            plan_id: plan.id,
            window_start,
            window_end,
            private_consultations_used: private_used,
            video_consultations_used: video_used,
            chat_sessions_used: chat_used,
            limits: plan.limits,
        })
    }

    pub async fn get_active_subscription(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Subscription, SubscriptionError> {
        let path = format!(
            "/rest/v1/subscriptions?doctor_id=eq.{}&status=eq.active&order=expires_at.desc&limit=1",
            doctor_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SubscriptionError::DatabaseError(e.to_string()))?;

        let subscription: Subscription = match result.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map_err(|e| SubscriptionError::DatabaseError(format!("Failed to parse subscription: {}", e)))?,
            None => return Err(SubscriptionError::SubscriptionInactive),
        };

        // A record can still say "active" after its window lapsed.
        if subscription.status != SubscriptionStatus::Active || subscription.expires_at < Utc::now() {
            return Err(SubscriptionError::SubscriptionInactive);
        }

        Ok(subscription)
    }

    /// Counts records created within the window whose status is not
    /// cancelled/rejected.
    async fn count_usage(
        &self,
        doctor_id: Uuid,
        kind: UsageKind,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<u32, SubscriptionError> {
        let from_raw = window_start.to_rfc3339();
        let to_raw = window_end.to_rfc3339();
        let from = urlencoding::encode(&from_raw);
        let to = urlencoding::encode(&to_raw);

        let path = match kind {
            UsageKind::PrivateConsultation => format!(
                "/rest/v1/appointments?doctor_id=eq.{}&booking_kind=eq.in_person\
                 &status=not.in.(cancelled,rejected)&created_at=gte.{}&created_at=lte.{}&select=id",
                doctor_id, from, to
            ),
            UsageKind::VideoConsultation => format!(
                "/rest/v1/appointments?doctor_id=eq.{}&booking_kind=eq.online\
                 &status=not.in.(cancelled,rejected)&created_at=gte.{}&created_at=lte.{}&select=id",
                doctor_id, from, to
            ),
            UsageKind::ChatSession => format!(
                "/rest/v1/chat_sessions?doctor_id=eq.{}&status=not.in.(cancelled,rejected)\
                 &created_at=gte.{}&created_at=lte.{}&select=id",
                doctor_id, from, to
            ),
        };

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SubscriptionError::DatabaseError(e.to_string()))?;

        Ok(result.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::models::{PlanLimits, PlanPolicy};
    use crate::services::plans::MockPlanPolicySource;

    #[test]
    fn rolling_window_spans_plan_duration() {
        let expires = Utc.with_ymd_and_hms(2024, 7, 31, 0, 0, 0).unwrap();
        let (start, end) = rolling_window(expires, 30);

        assert_eq!(end, expires);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn rolling_window_is_pure() {
        let expires = Utc.with_ymd_and_hms(2025, 1, 15, 12, 30, 0).unwrap();
        assert_eq!(rolling_window(expires, 7), rolling_window(expires, 7));
    }

    fn capped_plan_source(cap: u32) -> MockPlanPolicySource {
        let mut plans = MockPlanPolicySource::new();
        plans.expect_get_plan().returning(move |plan_id| {
            Ok(PlanPolicy {
                id: plan_id.to_string(),
                name: "Trial".to_string(),
                price: 0.0,
                duration_days: 30,
                limits: PlanLimits {
                    private_consultations: Some(cap),
                    video_consultations: Some(cap),
                    chat_sessions: Some(cap),
                },
            })
        });
        plans
    }

    #[tokio::test]
    async fn booking_blocked_when_cap_reached() {
        let mock_server = MockServer::start().await;
        let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();
        let doctor_id = Uuid::new_v4();

        let expires = (Utc::now() + Duration::days(10)).to_rfc3339();
        Mock::given(method("GET"))
            .and(path("/rest/v1/subscriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::subscription_response(
                    &doctor_id.to_string(),
                    "trial",
                    &expires,
                )
            ])))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": Uuid::new_v4() },
                { "id": Uuid::new_v4() }
            ])))
            .mount(&mock_server)
            .await;

        let service = QuotaService::new(
            Arc::new(SupabaseClient::new(&config)),
            Arc::new(capped_plan_source(2)),
        );

        let result = service
            .check_booking_allowed(doctor_id, UsageKind::VideoConsultation, "token")
            .await;
        assert!(matches!(result, Err(SubscriptionError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn booking_allowed_under_cap() {
        let mock_server = MockServer::start().await;
        let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();
        let doctor_id = Uuid::new_v4();

        let expires = (Utc::now() + Duration::days(10)).to_rfc3339();
        Mock::given(method("GET"))
            .and(path("/rest/v1/subscriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::subscription_response(
                    &doctor_id.to_string(),
                    "trial",
                    &expires,
                )
            ])))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": Uuid::new_v4() }
            ])))
            .mount(&mock_server)
            .await;

        let service = QuotaService::new(
            Arc::new(SupabaseClient::new(&config)),
            Arc::new(capped_plan_source(2)),
        );

        service
            .check_booking_allowed(doctor_id, UsageKind::VideoConsultation, "token")
            .await
            .expect("one of two uses leaves room");
    }

    #[tokio::test]
    async fn missing_subscription_blocks_booking() {
        let mock_server = MockServer::start().await;
        let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();

        Mock::given(method("GET"))
            .and(path("/rest/v1/subscriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let service = QuotaService::new(
            Arc::new(SupabaseClient::new(&config)),
            Arc::new(capped_plan_source(2)),
        );

        let result = service
            .check_booking_allowed(Uuid::new_v4(), UsageKind::ChatSession, "token")
            .await;
        assert!(matches!(result, Err(SubscriptionError::SubscriptionInactive)));
    }

    #[tokio::test]
    async fn lapsed_active_record_counts_as_inactive() {
        let mock_server = MockServer::start().await;
        let config = TestConfig::with_supabase_url(&mock_server.uri()).to_arc();
        let doctor_id = Uuid::new_v4();

        // Still says "active" but its window already ended.
        let expires = (Utc::now() - Duration::days(1)).to_rfc3339();
        Mock::given(method("GET"))
            .and(path("/rest/v1/subscriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::subscription_response(
                    &doctor_id.to_string(),
                    "trial",
                    &expires,
                )
            ])))
            .mount(&mock_server)
            .await;

        let service = QuotaService::new(
            Arc::new(SupabaseClient::new(&config)),
            Arc::new(capped_plan_source(2)),
        );

        let result = service
            .check_booking_allowed(doctor_id, UsageKind::PrivateConsultation, "token")
            .await;
        assert!(matches!(result, Err(SubscriptionError::SubscriptionInactive)));
    }
}
