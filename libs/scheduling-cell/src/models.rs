// libs/scheduling-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use subscription_cell::models::{SubscriptionError, UsageKind};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    /// Intended local calendar date, persisted as local midnight shifted into
    /// UTC. The window resolver recovers the Y-M-D regardless of how the
    /// store round-tripped it.
    pub appointment_date: DateTime<Utc>,
    /// Wall-clock start in the appointment's own timezone, "HH:MM".
    pub start_time: String,
    /// Optional explicit wall-clock end; derived from duration when absent.
    pub end_time: Option<String>,
    pub duration_minutes: i32,
    /// Display label, e.g. "UTC+5". Informational only.
    pub timezone: Option<String>,
    /// Signed minutes ahead of UTC. Immutable once set at creation.
    pub timezone_offset_minutes: Option<i32>,
    pub booking_kind: BookingKind,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub reschedule_request_id: Option<Uuid>,
    pub video_session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
    NoShow,
    Rescheduled,
}

impl AppointmentStatus {
    /// Active appointments hold their slot and count toward quotas.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Rejected => write!(f, "rejected"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
            AppointmentStatus::Rescheduled => write!(f, "rescheduled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    InPerson,
    Online,
}

impl BookingKind {
    pub fn usage_kind(&self) -> UsageKind {
        match self {
            BookingKind::InPerson => UsageKind::PrivateConsultation,
            BookingKind::Online => UsageKind::VideoConsultation,
        }
    }
}

impl fmt::Display for BookingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingKind::InPerson => write!(f, "in_person"),
            BookingKind::Online => write!(f, "online"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Unpaid => write!(f, "unpaid"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

// ==============================================================================
// RESCHEDULE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub reason: String,
    pub preferred_date: Option<NaiveDate>,
    pub preferred_time: Option<String>,
    pub status: RescheduleStatus,
    /// Fee the patient owes for the new slot; always within
    /// [configured floor, original fee].
    pub reschedule_fee: f64,
    pub fee_percentage: f64,
    /// Captured from the latest successful transaction at request time.
    pub original_appointment_fee: f64,
    pub doctor_notes: Option<String>,
    pub new_appointment_id: Option<Uuid>,
    pub payment_transaction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RescheduleStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl RescheduleStatus {
    /// At most one open request may reference an appointment.
    pub fn is_open(&self) -> bool {
        matches!(self, RescheduleStatus::Pending | RescheduleStatus::Approved)
    }
}

impl fmt::Display for RescheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RescheduleStatus::Pending => write!(f, "pending"),
            RescheduleStatus::Approved => write!(f, "approved"),
            RescheduleStatus::Rejected => write!(f, "rejected"),
            RescheduleStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub doctor_id: Uuid,
    /// Intended local calendar date.
    pub appointment_date: NaiveDate,
    /// "HH:MM" wall clock in the patient's timezone.
    pub start_time: String,
    pub booking_kind: BookingKind,
    pub duration_minutes: Option<i32>,
    pub timezone: Option<String>,
    pub timezone_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub booking_kind: Option<BookingKind>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotAvailabilityQuery {
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRescheduleRequest {
    pub appointment_id: Uuid,
    pub reason: String,
    pub preferred_date: Option<NaiveDate>,
    pub preferred_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRescheduleRequest {
    pub new_date: NaiveDate,
    pub new_start_time: String,
    pub doctor_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRescheduleRequest {
    pub reason: String,
}

/// Auth subjects carry their id as a string claim; domain records key on
/// UUIDs. Parse once at the service boundary.
pub fn user_uuid(user: &shared_models::auth::User) -> Result<Uuid, SchedulingError> {
    Uuid::parse_str(&user.id)
        .map_err(|_| SchedulingError::Authorization("Malformed user id".to_string()))
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Doctor already has an active appointment at this time")]
    Conflict,

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<SchedulingError> for shared_models::error::AppError {
    fn from(err: SchedulingError) -> Self {
        use shared_models::error::AppError;
        match err {
            SchedulingError::Validation(msg) => AppError::ValidationError(msg),
            SchedulingError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            SchedulingError::Authorization(msg) => AppError::Forbidden(msg),
            SchedulingError::State(msg) => AppError::State(msg),
            SchedulingError::Conflict => {
                AppError::Conflict("Appointment slot conflicts with an existing booking".to_string())
            }
            SchedulingError::Subscription(inner) => inner.into(),
            SchedulingError::ExternalService(msg) => AppError::ExternalService(msg),
            SchedulingError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}
