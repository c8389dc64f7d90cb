// libs/scheduling-cell/src/services/reschedule.rs
//
// Missed-appointment recovery: a patient who missed a confirmed, paid online
// session may request a new slot for a reduced fee instead of booking and
// paying from scratch.

use std::sync::Arc;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{
    user_uuid, Appointment, AppointmentStatus, ApproveRescheduleRequest, BookingKind,
    CreateRescheduleRequest, PaymentStatus, RejectRescheduleRequest, RescheduleRequest,
    RescheduleStatus, SchedulingError,
};
use crate::services::collaborators::{ChargeStatus, NotificationSink, PaymentClient};
use crate::services::conflict::BookingConflictGuard;
use crate::services::window::{
    legacy_offset_shim, parse_wall_clock, resolve_window, store_calendar_date, WindowInputs,
};

/// Fee owed for the replacement slot: the configured percentage of the
/// original fee, never below the configured floor, never above the original.
pub fn compute_reschedule_fee(original_fee: f64, percentage: f64, min_fee: f64) -> f64 {
    let proposed = original_fee * percentage / 100.0;
    proposed.max(min_fee).min(original_fee)
}

#[derive(Debug, Clone, Serialize)]
pub struct RescheduleEligibility {
    pub eligible: bool,
    pub reason: Option<String>,
}

pub struct RescheduleService {
    supabase: Arc<SupabaseClient>,
    conflict: BookingConflictGuard,
    payments: Arc<dyn PaymentClient>,
    notifications: Arc<dyn NotificationSink>,
    config: Arc<AppConfig>,
}

impl RescheduleService {
    pub fn new(
        supabase: Arc<SupabaseClient>,
        payments: Arc<dyn PaymentClient>,
        notifications: Arc<dyn NotificationSink>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            conflict: BookingConflictGuard::new(supabase.clone()),
            supabase,
            payments,
            notifications,
            config,
        }
    }

    // ==========================================================================
    // ELIGIBILITY
    // ==========================================================================

    /// A missed appointment qualifies when it is confirmed, paid, online, its
    /// window has started, the patient never joined the video session, and no
    /// open request already covers it.
    pub async fn check_eligibility(
        &self,
        patient: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<RescheduleEligibility, SchedulingError> {
        let patient_id = user_uuid(patient)?;
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        if appointment.patient_id != patient_id {
            return Err(SchedulingError::Authorization(
                "Only the appointment's patient may request a reschedule".to_string(),
            ));
        }

        let verdict = self.eligibility_of(&appointment, auth_token).await?;
        Ok(verdict)
    }

    async fn eligibility_of(
        &self,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<RescheduleEligibility, SchedulingError> {
        let ineligible = |reason: &str| RescheduleEligibility {
            eligible: false,
            reason: Some(reason.to_string()),
        };

        if appointment.status != AppointmentStatus::Confirmed {
            return Ok(ineligible("Only confirmed appointments can be rescheduled"));
        }
        if appointment.payment_status != PaymentStatus::Paid {
            return Ok(ineligible("Only paid appointments can be rescheduled"));
        }
        if appointment.booking_kind != BookingKind::Online {
            return Ok(ineligible("Only online appointments can be rescheduled"));
        }

        let window = resolve_window(
            WindowInputs::from_appointment(appointment),
            self.config.access_buffer_minutes,
        )?;
        if Utc::now() < window.start_utc {
            return Ok(ineligible("The appointment has not started yet"));
        }

        if self.patient_joined_session(appointment, auth_token).await? {
            return Ok(ineligible("The session was attended"));
        }

        if self.open_request_for(appointment.id, auth_token).await?.is_some() {
            return Ok(ineligible("A reschedule request already exists for this appointment"));
        }

        Ok(RescheduleEligibility { eligible: true, reason: None })
    }

    /// All of the patient's missed appointments that currently qualify for a
    /// reschedule request.
    pub async fn list_eligible_appointments(
        &self,
        patient: &User,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let patient_id = user_uuid(patient)?;
        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&status=eq.confirmed\
             &payment_status=eq.paid&booking_kind=eq.online&order=appointment_date.desc",
            patient_id
        );
        let candidates: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let mut eligible = Vec::new();
        for appointment in candidates {
            if self.eligibility_of(&appointment, auth_token).await?.eligible {
                eligible.push(appointment);
            }
        }
        Ok(eligible)
    }

    async fn patient_joined_session(
        &self,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<bool, SchedulingError> {
        let session_id = match appointment.video_session_id {
            Some(id) => id,
            None => return Ok(false),
        };

        let path = format!(
            "/rest/v1/video_session_participants?session_id=eq.{}&participant_id=eq.{}&select=id&limit=1",
            session_id, appointment.patient_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        Ok(!rows.is_empty())
    }

    async fn open_request_for(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<RescheduleRequest>, SchedulingError> {
        let path = format!(
            "/rest/v1/reschedule_requests?appointment_id=eq.{}&status=in.(pending,approved)&limit=1",
            appointment_id
        );
        let rows: Vec<RescheduleRequest> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().next())
    }

    // ==========================================================================
    // CREATION
    // ==========================================================================

    pub async fn create_request(
        &self,
        patient: &User,
        request: CreateRescheduleRequest,
        auth_token: &str,
    ) -> Result<RescheduleRequest, SchedulingError> {
        let patient_id = user_uuid(patient)?;
        if request.reason.trim().is_empty() {
            return Err(SchedulingError::Validation(
                "A reason is required to request a reschedule".to_string(),
            ));
        }

        let appointment = self.get_appointment(request.appointment_id, auth_token).await?;
        if appointment.patient_id != patient_id {
            return Err(SchedulingError::Authorization(
                "Only the appointment's patient may request a reschedule".to_string(),
            ));
        }

        let verdict = self.eligibility_of(&appointment, auth_token).await?;
        if !verdict.eligible {
            return Err(SchedulingError::State(
                verdict.reason.unwrap_or_else(|| "Appointment is not eligible".to_string()),
            ));
        }

        let original_fee = self
            .payments
            .latest_successful_charge(appointment.id, auth_token)
            .await?
            .ok_or_else(|| {
                SchedulingError::State("Paid appointment has no recorded charge".to_string())
            })?
            .amount;

        let percentage = self.config.reschedule_fee_percentage;
        let fee = compute_reschedule_fee(original_fee, percentage, self.config.reschedule_min_fee);

        let body = json!({
            "appointment_id": appointment.id,
            "patient_id": appointment.patient_id,
            "doctor_id": appointment.doctor_id,
            "reason": request.reason.trim(),
            "preferred_date": request.preferred_date,
            "preferred_time": request.preferred_time,
            "status": RescheduleStatus::Pending.to_string(),
            "reschedule_fee": fee,
            "fee_percentage": percentage,
            "original_appointment_fee": original_fee,
        });

        let created = self.insert_request(body, auth_token).await?;

        self.notifications
            .notify(
                appointment.doctor_id,
                "reschedule_requested",
                "Reschedule requested",
                "A patient asked to reschedule a missed appointment",
                created.id,
                auth_token,
            )
            .await?;

        info!(
            "Reschedule request {} opened for appointment {} (fee {})",
            created.id, appointment.id, fee
        );
        Ok(created)
    }

    // ==========================================================================
    // DOCTOR DECISIONS
    // ==========================================================================

    pub async fn approve_request(
        &self,
        doctor: &User,
        request_id: Uuid,
        decision: ApproveRescheduleRequest,
        auth_token: &str,
    ) -> Result<RescheduleRequest, SchedulingError> {
        let request = self.get_owned_request(doctor, request_id, auth_token).await?;
        if request.status != RescheduleStatus::Pending {
            return Err(SchedulingError::State(format!(
                "Reschedule request is {}, not pending",
                request.status
            )));
        }

        let original = self.get_appointment(request.appointment_id, auth_token).await?;
        let new_appointment = self
            .book_replacement_slot(&original, &request, &decision, auth_token)
            .await?;

        self.set_appointment_status(original.id, AppointmentStatus::Rescheduled, auth_token)
            .await?;

        let updated = self
            .update_request(
                request.id,
                json!({
                    "status": RescheduleStatus::Approved.to_string(),
                    "doctor_notes": decision.doctor_notes,
                    "new_appointment_id": new_appointment.id,
                    "updated_at": Utc::now().to_rfc3339(),
                }),
                auth_token,
            )
            .await?;

        self.notifications
            .notify(
                request.patient_id,
                "reschedule_approved",
                "Reschedule approved",
                &format!(
                    "Your new slot on {} at {} is reserved; pay the fee of {} to confirm",
                    decision.new_date, decision.new_start_time, request.reschedule_fee
                ),
                updated.id,
                auth_token,
            )
            .await?;

        Ok(updated)
    }

    async fn book_replacement_slot(
        &self,
        original: &Appointment,
        request: &RescheduleRequest,
        decision: &ApproveRescheduleRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let (start_hour, _) = parse_wall_clock(&decision.new_start_time)?;
        let offset = legacy_offset_shim(original.timezone_offset_minutes, start_hour);
        let stored_date = store_calendar_date(decision.new_date, offset);

        let window = resolve_window(
            WindowInputs {
                stored_date,
                start_time: &decision.new_start_time,
                end_time: None,
                timezone_offset_minutes: Some(offset),
                duration_minutes: original.duration_minutes,
            },
            self.config.access_buffer_minutes,
        )?;
        if window.start_utc <= Utc::now() {
            return Err(SchedulingError::Validation(
                "The replacement slot must be in the future".to_string(),
            ));
        }

        let record = json!({
            "doctor_id": original.doctor_id,
            "patient_id": original.patient_id,
            "appointment_date": stored_date.to_rfc3339(),
            "start_time": decision.new_start_time,
            "duration_minutes": original.duration_minutes,
            "timezone": original.timezone,
            "timezone_offset_minutes": offset,
            "booking_kind": original.booking_kind.to_string(),
            "status": AppointmentStatus::Pending.to_string(),
            "payment_status": PaymentStatus::Unpaid.to_string(),
            "reschedule_request_id": request.id,
        });

        self.conflict.insert_active_unique(record, auth_token).await
    }

    pub async fn reject_request(
        &self,
        doctor: &User,
        request_id: Uuid,
        decision: RejectRescheduleRequest,
        auth_token: &str,
    ) -> Result<RescheduleRequest, SchedulingError> {
        if decision.reason.trim().is_empty() {
            return Err(SchedulingError::Validation(
                "A reason is required to reject a reschedule request".to_string(),
            ));
        }

        let request = self.get_owned_request(doctor, request_id, auth_token).await?;
        if request.status != RescheduleStatus::Pending {
            return Err(SchedulingError::State(format!(
                "Reschedule request is {}, not pending",
                request.status
            )));
        }

        let updated = self
            .update_request(
                request.id,
                json!({
                    "status": RescheduleStatus::Rejected.to_string(),
                    "doctor_notes": decision.reason.trim(),
                    "updated_at": Utc::now().to_rfc3339(),
                }),
                auth_token,
            )
            .await?;

        self.notifications
            .notify(
                request.patient_id,
                "reschedule_rejected",
                "Reschedule declined",
                decision.reason.trim(),
                updated.id,
                auth_token,
            )
            .await?;

        Ok(updated)
    }

    // ==========================================================================
    // FEE PAYMENT
    // ==========================================================================

    /// Settles the fee for an approved request: charge the patient, mark the
    /// replacement appointment confirmed and paid.
    pub async fn pay_fee(
        &self,
        patient: &User,
        request_id: Uuid,
        auth_token: &str,
    ) -> Result<RescheduleRequest, SchedulingError> {
        let patient_id = user_uuid(patient)?;
        let request = self.get_request(request_id, auth_token).await?;
        if request.patient_id != patient_id {
            return Err(SchedulingError::Authorization(
                "Only the requesting patient may pay the fee".to_string(),
            ));
        }
        if request.status != RescheduleStatus::Approved {
            return Err(SchedulingError::State(
                "Only approved reschedule requests can be paid".to_string(),
            ));
        }
        if request.payment_transaction_id.is_some() {
            return Err(SchedulingError::State(
                "The reschedule fee was already paid".to_string(),
            ));
        }
        let new_appointment_id = request.new_appointment_id.ok_or_else(|| {
            SchedulingError::State("Approved request has no replacement appointment".to_string())
        })?;

        let outcome = self
            .payments
            .charge(
                patient_id,
                new_appointment_id,
                request.reschedule_fee,
                "Reschedule fee",
                auth_token,
            )
            .await?;
        if outcome.status != ChargeStatus::Success {
            return Err(SchedulingError::ExternalService(
                "The reschedule fee payment was declined".to_string(),
            ));
        }

        self.confirm_replacement(new_appointment_id, auth_token).await?;

        let updated = self
            .update_request(
                request.id,
                json!({
                    "payment_transaction_id": outcome.transaction_id,
                    "updated_at": Utc::now().to_rfc3339(),
                }),
                auth_token,
            )
            .await?;

        for recipient in [request.patient_id, request.doctor_id] {
            self.notifications
                .notify(
                    recipient,
                    "reschedule_paid",
                    "Reschedule confirmed",
                    "The reschedule fee was paid and the new appointment is confirmed",
                    updated.id,
                    auth_token,
                )
                .await?;
        }

        Ok(updated)
    }

    async fn confirm_replacement(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let body = json!({
            "status": AppointmentStatus::Confirmed.to_string(),
            "payment_status": PaymentStatus::Paid.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(headers))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        if rows.is_empty() {
            warn!("Replacement appointment {} vanished before confirmation", appointment_id);
            return Err(SchedulingError::NotFound("Appointment"));
        }
        Ok(())
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn list_requests(
        &self,
        user: &User,
        auth_token: &str,
    ) -> Result<Vec<RescheduleRequest>, SchedulingError> {
        let user_id = user_uuid(user)?;
        let filter = if user.is_doctor() {
            format!("doctor_id=eq.{}", user_id)
        } else {
            format!("patient_id=eq.{}", user_id)
        };

        let path = format!(
            "/rest/v1/reschedule_requests?{}&order=created_at.desc",
            filter
        );
        let rows: Vec<RescheduleRequest> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        Ok(rows)
    }

    async fn get_request(
        &self,
        request_id: Uuid,
        auth_token: &str,
    ) -> Result<RescheduleRequest, SchedulingError> {
        let path = format!("/rest/v1/reschedule_requests?id=eq.{}&limit=1", request_id);
        let rows: Vec<RescheduleRequest> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or(SchedulingError::NotFound("Reschedule request"))
    }

    async fn get_owned_request(
        &self,
        doctor: &User,
        request_id: Uuid,
        auth_token: &str,
    ) -> Result<RescheduleRequest, SchedulingError> {
        let doctor_id = user_uuid(doctor)?;
        let request = self.get_request(request_id, auth_token).await?;
        if request.doctor_id != doctor_id && !doctor.is_admin() {
            return Err(SchedulingError::Authorization(
                "Only the appointment's doctor may decide this request".to_string(),
            ));
        }
        Ok(request)
    }

    async fn get_appointment(
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

    async fn set_appointment_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let body = json!({
            "status": status.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(headers))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    // Backed by a partial unique index on appointment_id over open (pending,
    // approved) requests, so two concurrent creations cannot both land. The
    // eligibility read above stays as the advisory pre-check.
    async fn insert_request(
        &self,
        body: Value,
        auth_token: &str,
    ) -> Result<RescheduleRequest, SchedulingError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=ignore-duplicates,return=representation"),
        );

        let rows: Vec<RescheduleRequest> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/reschedule_requests?on_conflict=appointment_id",
                Some(auth_token),
                Some(body),
                Some(headers),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or_else(|| {
            SchedulingError::State(
                "A reschedule request already exists for this appointment".to_string(),
            )
        })
    }

    async fn update_request(
        &self,
        request_id: Uuid,
        body: Value,
        auth_token: &str,
    ) -> Result<RescheduleRequest, SchedulingError> {
        let path = format!("/rest/v1/reschedule_requests?id=eq.{}", request_id);

        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let rows: Vec<RescheduleRequest> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(headers))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or(SchedulingError::NotFound("Reschedule request"))
    }
}
