// libs/subscription-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// SUBSCRIPTION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionStatus::Active => write!(f, "active"),
            SubscriptionStatus::Expired => write!(f, "expired"),
            SubscriptionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What a quota check is gating. Private and video map to the two booking
/// kinds; chat sessions are counted separately.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    PrivateConsultation,
    VideoConsultation,
    ChatSession,
}

impl UsageKind {
    pub fn limit_name(&self) -> &'static str {
        match self {
            UsageKind::PrivateConsultation => "private consultations",
            UsageKind::VideoConsultation => "video consultations",
            UsageKind::ChatSession => "chat sessions",
        }
    }
}

// ==============================================================================
// PLAN POLICY MODELS
// ==============================================================================

/// `None` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLimits {
    pub private_consultations: Option<u32>,
    pub video_consultations: Option<u32>,
    pub chat_sessions: Option<u32>,
}

impl PlanLimits {
    pub fn cap_for(&self, kind: UsageKind) -> Option<u32> {
        match kind {
            UsageKind::PrivateConsultation => self.private_consultations,
            UsageKind::VideoConsultation => self.video_consultations,
            UsageKind::ChatSession => self.chat_sessions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPolicy {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub duration_days: i64,
    pub limits: PlanLimits,
}

/// Point-in-time usage snapshot over the rolling subscription window.
/// Derived on every check, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub doctor_id: Uuid,
    pub plan_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub private_consultations_used: u32,
    pub video_consultations_used: u32,
    pub chat_sessions_used: u32,
    pub limits: PlanLimits,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SubscriptionError {
    #[error("Doctor has no active subscription")]
    SubscriptionInactive,

    #[error("Plan limit reached for {limit_name} ({limit} per period)")]
    QuotaExceeded { limit_name: String, limit: u32 },

    #[error("Unknown subscription plan: {0}")]
    PlanNotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<SubscriptionError> for shared_models::error::AppError {
    fn from(err: SubscriptionError) -> Self {
        use shared_models::error::AppError;
        match &err {
            SubscriptionError::SubscriptionInactive => {
                AppError::SubscriptionInactive(err.to_string())
            }
            SubscriptionError::QuotaExceeded { .. } => AppError::QuotaExceeded(err.to_string()),
            SubscriptionError::PlanNotFound(_) => AppError::NotFound(err.to_string()),
            SubscriptionError::DatabaseError(msg) => AppError::Database(msg.clone()),
        }
    }
}
