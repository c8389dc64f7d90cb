pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{PlanLimits, PlanPolicy, QuotaUsage, Subscription, SubscriptionError, UsageKind};
pub use services::plans::{PlanPolicySource, StaticPlanPolicySource};
pub use services::quota::QuotaService;
