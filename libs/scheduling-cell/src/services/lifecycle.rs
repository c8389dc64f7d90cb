// libs/scheduling-cell/src/services/lifecycle.rs
//
// Booking creation and the appointment state machine. All collaborators come
// in through the constructor; handlers assemble the service per request.

use std::sync::Arc;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;
use subscription_cell::services::quota::QuotaService;

use crate::models::{
    user_uuid, Appointment, AppointmentSearchQuery, AppointmentStatus, CreateAppointmentRequest,
    PaymentStatus, SchedulingError,
};
use crate::services::collaborators::{NotificationSink, PaymentClient};
use crate::services::conflict::BookingConflictGuard;
use crate::services::window::{
    legacy_offset_shim, parse_wall_clock, resolve_window, store_calendar_date, WindowInputs,
};

/// Whether `from -> to` is a legal appointment transition. `Rescheduled` is
/// reserved for the reschedule workflow and never reachable through direct
/// status updates.
pub fn transition_allowed(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    use AppointmentStatus::*;
    match (from, to) {
        (Pending, Confirmed) | (Pending, Rejected) | (Pending, Cancelled) => true,
        (Confirmed, Cancelled) | (Confirmed, Completed) | (Confirmed, NoShow)
        | (Confirmed, Rescheduled) => true,
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct DoctorProfile {
    id: Uuid,
    is_approved: bool,
    profile_completed: bool,
    #[serde(default)]
    slot_minutes: Option<i32>,
}

pub struct AppointmentLifecycleService {
    supabase: Arc<SupabaseClient>,
    conflict: BookingConflictGuard,
    quota: Arc<QuotaService>,
    payments: Arc<dyn PaymentClient>,
    notifications: Arc<dyn NotificationSink>,
    config: Arc<AppConfig>,
}

impl AppointmentLifecycleService {
    pub fn new(
        supabase: Arc<SupabaseClient>,
        quota: Arc<QuotaService>,
        payments: Arc<dyn PaymentClient>,
        notifications: Arc<dyn NotificationSink>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            conflict: BookingConflictGuard::new(supabase.clone()),
            supabase,
            quota,
            payments,
            notifications,
            config,
        }
    }

    // ==========================================================================
    // CREATION
    // ==========================================================================

    pub async fn create_appointment(
        &self,
        patient: &User,
        request: CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let patient_id = user_uuid(patient)?;
        let (start_hour, _) = parse_wall_clock(&request.start_time)?;

        let doctor = self.get_doctor(request.doctor_id, auth_token).await?;
        if !doctor.is_approved || !doctor.profile_completed {
            return Err(SchedulingError::Validation(
                "Doctor is not accepting appointments".to_string(),
            ));
        }

        self.quota
            .check_booking_allowed(doctor.id, request.booking_kind.usage_kind(), auth_token)
            .await?;

        let offset = legacy_offset_shim(request.timezone_offset_minutes, start_hour);
        let stored_date = store_calendar_date(request.appointment_date, offset);

        let duration = request
            .duration_minutes
            .or(doctor.slot_minutes)
            .unwrap_or(self.config.default_slot_minutes);
        if duration <= 0 {
            return Err(SchedulingError::Validation(
                "Appointment duration must be positive".to_string(),
            ));
        }

        let window = resolve_window(
            WindowInputs {
                stored_date,
                start_time: &request.start_time,
                end_time: None,
                timezone_offset_minutes: Some(offset),
                duration_minutes: duration,
            },
            self.config.access_buffer_minutes,
        )?;
        if window.start_utc <= Utc::now() {
            return Err(SchedulingError::Validation(
                "Appointment must be scheduled in the future".to_string(),
            ));
        }

        // Friendly early rejection; the insert below still decides the race.
        if !self
            .conflict
            .is_slot_available(doctor.id, stored_date, &request.start_time, auth_token)
            .await?
        {
            return Err(SchedulingError::Conflict);
        }

        let record = json!({
            "doctor_id": doctor.id,
            "patient_id": patient_id,
            "appointment_date": stored_date.to_rfc3339(),
            "start_time": request.start_time,
            "duration_minutes": duration,
            "timezone": request.timezone,
            "timezone_offset_minutes": offset,
            "booking_kind": request.booking_kind.to_string(),
            "status": AppointmentStatus::Pending.to_string(),
            "payment_status": PaymentStatus::Unpaid.to_string(),
        });

        let appointment = self.conflict.insert_active_unique(record, auth_token).await?;

        self.notifications
            .notify(
                patient_id,
                "appointment_created",
                "Appointment requested",
                &format!(
                    "Your appointment on {} at {} is awaiting confirmation",
                    request.appointment_date, request.start_time
                ),
                appointment.id,
                auth_token,
            )
            .await?;
        self.notifications
            .notify(
                doctor.id,
                "appointment_created",
                "New appointment request",
                &format!(
                    "A patient requested {} on {} at {}",
                    request.booking_kind, request.appointment_date, request.start_time
                ),
                appointment.id,
                auth_token,
            )
            .await?;

        Ok(appointment)
    }

    // ==========================================================================
    // STATUS TRANSITIONS
    // ==========================================================================

    pub async fn update_status(
        &self,
        user: &User,
        appointment_id: Uuid,
        target: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        // Reserved for the reschedule workflow; not reachable here for any
        // caller, admins included.
        if target == AppointmentStatus::Rescheduled {
            return Err(SchedulingError::State(
                "The rescheduled status is set by the reschedule workflow".to_string(),
            ));
        }

        let actor_id = user_uuid(user)?;
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        self.authorize_transition(user, actor_id, &appointment, target)?;

        if !transition_allowed(appointment.status, target) {
            return Err(SchedulingError::State(format!(
                "Cannot move appointment from {} to {}",
                appointment.status, target
            )));
        }

        if target == AppointmentStatus::Cancelled {
            let window = resolve_window(
                WindowInputs::from_appointment(&appointment),
                self.config.access_buffer_minutes,
            )?;
            if Utc::now() >= window.start_utc {
                return Err(SchedulingError::State(
                    "Appointments cannot be cancelled after their start time".to_string(),
                ));
            }
        }

        let updated = self
            .persist_status(appointment_id, target, auth_token)
            .await?;

        if target == AppointmentStatus::Completed && updated.payment_status == PaymentStatus::Paid {
            // Failures here are logged and retried out of band; the completed
            // status stands either way.
            if let Err(e) = self.credit_doctor_balance(&updated, auth_token).await {
                warn!(
                    "Failed to credit doctor {} for appointment {}: {}",
                    updated.doctor_id, updated.id, e
                );
            }
        }

        let counterpart = if actor_id == updated.doctor_id {
            updated.patient_id
        } else {
            updated.doctor_id
        };
        self.notifications
            .notify(
                counterpart,
                "appointment_status",
                "Appointment updated",
                &format!("Appointment status changed to {}", target),
                updated.id,
                auth_token,
            )
            .await?;

        info!("Appointment {} moved to {}", updated.id, target);
        Ok(updated)
    }

    pub async fn cancel_appointment(
        &self,
        user: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        self.update_status(user, appointment_id, AppointmentStatus::Cancelled, auth_token)
            .await
    }

    fn authorize_transition(
        &self,
        user: &User,
        actor_id: Uuid,
        appointment: &Appointment,
        target: AppointmentStatus,
    ) -> Result<(), SchedulingError> {
        if user.is_admin() {
            return Ok(());
        }

        let is_doctor = actor_id == appointment.doctor_id;
        let is_patient = actor_id == appointment.patient_id;
        if !is_doctor && !is_patient {
            return Err(SchedulingError::Authorization(
                "Only the appointment's participants may modify it".to_string(),
            ));
        }

        use AppointmentStatus::*;
        let allowed = match target {
            Confirmed | Rejected | Completed | NoShow => is_doctor,
            Cancelled => true,
            // Reserved for the reschedule workflow.
            Rescheduled => false,
            Pending => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(SchedulingError::Authorization(format!(
                "Not permitted to set status {}",
                target
            )))
        }
    }

    pub(crate) async fn persist_status(
        &self,
        appointment_id: Uuid,
        target: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let body = json!({
            "status": target.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(headers))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or(SchedulingError::NotFound("Appointment"))
    }

    // ==========================================================================
    // SETTLEMENT
    // ==========================================================================

    /// Credits the doctor's ledger for a completed, paid appointment. The
    /// ledger is keyed by appointment, so a retry after a partial failure
    /// never double-credits.
    async fn credit_doctor_balance(
        &self,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let existing_path = format!(
            "/rest/v1/doctor_ledger?appointment_id=eq.{}&select=id",
            appointment.id
        );
        let existing: Vec<Value> = self
            .supabase
            .request(Method::GET, &existing_path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;
        if !existing.is_empty() {
            return Ok(());
        }

        let charge = self
            .payments
            .latest_successful_charge(appointment.id, auth_token)
            .await?
            .ok_or_else(|| {
                SchedulingError::State("Paid appointment has no recorded charge".to_string())
            })?;

        let entry = json!({
            "doctor_id": appointment.doctor_id,
            "appointment_id": appointment.id,
            "amount": charge.amount,
            "source_transaction_id": charge.id,
        });

        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/doctor_ledger",
                Some(auth_token),
                Some(entry),
                Some(headers),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        info!(
            "Credited doctor {} with {} for appointment {}",
            appointment.doctor_id, charge.amount, appointment.id
        );
        Ok(())
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&limit=1", appointment_id);
        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or(SchedulingError::NotFound("Appointment"))
    }

    /// Read with participant check. Admins see everything.
    pub async fn get_appointment_for(
        &self,
        user: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;
        let viewer_id = user_uuid(user)?;
        if !user.is_admin() && viewer_id != appointment.doctor_id && viewer_id != appointment.patient_id
        {
            return Err(SchedulingError::Authorization(
                "Only the appointment's participants may view it".to_string(),
            ));
        }
        Ok(appointment)
    }

    pub async fn search_appointments(
        &self,
        user: &User,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let mut filters = Vec::new();

        // Non-admins only see their own calendar.
        if !user.is_admin() {
            if user.is_doctor() {
                filters.push(format!("doctor_id=eq.{}", user.id));
            } else {
                filters.push(format!("patient_id=eq.{}", user.id));
            }
        } else {
            if let Some(doctor_id) = query.doctor_id {
                filters.push(format!("doctor_id=eq.{}", doctor_id));
            }
            if let Some(patient_id) = query.patient_id {
                filters.push(format!("patient_id=eq.{}", patient_id));
            }
        }

        if let Some(status) = query.status {
            filters.push(format!("status=eq.{}", status));
        }
        if let Some(kind) = query.booking_kind {
            filters.push(format!("booking_kind=eq.{}", kind));
        }
        if let Some(from) = query.from_date {
            let raw = store_calendar_date(from, self.config.default_timezone_offset_minutes)
                .to_rfc3339();
            filters.push(format!("appointment_date=gte.{}", urlencoding::encode(&raw)));
        }
        if let Some(to) = query.to_date {
            let raw = store_calendar_date(to, self.config.default_timezone_offset_minutes)
                .to_rfc3339();
            filters.push(format!("appointment_date=lte.{}", urlencoding::encode(&raw)));
        }

        let limit = query.limit.unwrap_or(50).clamp(1, 200);
        let offset = query.offset.unwrap_or(0).max(0);
        filters.push(format!("order=appointment_date.desc&limit={}&offset={}", limit, offset));

        let path = format!("/rest/v1/appointments?{}", filters.join("&"));
        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        Ok(rows)
    }

    /// Advisory availability probe for the booking UI.
    pub async fn is_slot_available(
        &self,
        doctor_id: Uuid,
        date: chrono::NaiveDate,
        start_time: &str,
        auth_token: &str,
    ) -> Result<bool, SchedulingError> {
        let (start_hour, _) = parse_wall_clock(start_time)?;
        let offset = legacy_offset_shim(None, start_hour);
        let stored_date = store_calendar_date(date, offset);
        self.conflict
            .is_slot_available(doctor_id, stored_date, start_time, auth_token)
            .await
    }

    async fn get_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<DoctorProfile, SchedulingError> {
        let path = format!(
            "/rest/v1/doctors?id=eq.{}&select=id,is_approved,profile_completed,slot_minutes&limit=1",
            doctor_id
        );
        let rows: Vec<DoctorProfile> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(SchedulingError::NotFound("Doctor"))
    }
}
