// libs/scheduling-cell/src/services/access.rs

use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{user_uuid, Appointment, AppointmentStatus, SchedulingError};
use crate::services::window::{check_access, WindowCheck, WindowInputs};

/// Decides whether a party may enter their session right now. Membership and
/// status problems are errors; being outside the window is a valid answer
/// carried in the returned check.
pub struct AccessGuardService {
    supabase: Arc<SupabaseClient>,
    config: Arc<AppConfig>,
}

impl AccessGuardService {
    pub fn new(supabase: Arc<SupabaseClient>, config: Arc<AppConfig>) -> Self {
        Self { supabase, config }
    }

    pub async fn check_session_access(
        &self,
        user: &User,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<WindowCheck, SchedulingError> {
        let user_id = user_uuid(user)?;
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        if user_id != appointment.doctor_id && user_id != appointment.patient_id {
            return Err(SchedulingError::Authorization(
                "Only the appointment's participants may join the session".to_string(),
            ));
        }

        if appointment.status != AppointmentStatus::Confirmed {
            return Err(SchedulingError::State(format!(
                "Session access requires a confirmed appointment, found {}",
                appointment.status
            )));
        }

        let check = check_access(
            WindowInputs::from_appointment(&appointment),
            self.config.access_buffer_minutes,
            Utc::now(),
        )?;

        debug!(
            "Access check for {} on appointment {}: valid={}",
            user_id, appointment_id, check.is_valid
        );
        Ok(check)
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
}
