// libs/subscription-cell/src/services/plans.rs
use async_trait::async_trait;

use crate::models::{PlanLimits, PlanPolicy, SubscriptionError};

/// Plan policy lookup, injected into the quota enforcer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlanPolicySource: Send + Sync {
    async fn get_plan(&self, plan_id: &str) -> Result<PlanPolicy, SubscriptionError>;

    async fn list_plans(&self) -> Result<Vec<PlanPolicy>, SubscriptionError>;
}

/// Built-in tier table. Plans change rarely enough that shipping them with the
/// binary beats another store round-trip on every booking.
pub struct StaticPlanPolicySource;

impl StaticPlanPolicySource {
    pub fn new() -> Self {
        Self
    }

    fn tiers() -> Vec<PlanPolicy> {
        vec![
            PlanPolicy {
                id: "basic".to_string(),
                name: "Basic".to_string(),
                price: 29.0,
                duration_days: 30,
                limits: PlanLimits {
                    private_consultations: Some(10),
                    video_consultations: Some(5),
                    chat_sessions: Some(20),
                },
            },
            PlanPolicy {
                id: "standard".to_string(),
                name: "Standard".to_string(),
                price: 79.0,
                duration_days: 30,
                limits: PlanLimits {
                    private_consultations: Some(40),
                    video_consultations: Some(25),
                    chat_sessions: Some(100),
                },
            },
            PlanPolicy {
                id: "premium".to_string(),
                name: "Premium".to_string(),
                price: 149.0,
                duration_days: 30,
                limits: PlanLimits {
                    private_consultations: None,
                    video_consultations: None,
                    chat_sessions: None,
                },
            },
        ]
    }
}

impl Default for StaticPlanPolicySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlanPolicySource for StaticPlanPolicySource {
    async fn get_plan(&self, plan_id: &str) -> Result<PlanPolicy, SubscriptionError> {
        Self::tiers()
            .into_iter()
            .find(|plan| plan.id == plan_id)
            .ok_or_else(|| SubscriptionError::PlanNotFound(plan_id.to_string()))
    }

    async fn list_plans(&self) -> Result<Vec<PlanPolicy>, SubscriptionError> {
        Ok(Self::tiers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UsageKind;

    #[tokio::test]
    async fn known_plan_resolves() {
        let source = StaticPlanPolicySource::new();
        let plan = source.get_plan("basic").await.unwrap();
        assert_eq!(plan.limits.cap_for(UsageKind::VideoConsultation), Some(5));
    }

    #[tokio::test]
    async fn premium_is_unlimited() {
        let source = StaticPlanPolicySource::new();
        let plan = source.get_plan("premium").await.unwrap();
        assert_eq!(plan.limits.cap_for(UsageKind::ChatSession), None);
    }

    #[tokio::test]
    async fn unknown_plan_errors() {
        let source = StaticPlanPolicySource::new();
        assert!(matches!(
            source.get_plan("platinum").await,
            Err(SubscriptionError::PlanNotFound(_))
        ));
    }
}
