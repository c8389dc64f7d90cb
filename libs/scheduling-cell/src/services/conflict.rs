// libs/scheduling-cell/src/services/conflict.rs
//
// Slot exclusivity for a doctor's calendar. The advisory pre-check gives
// early, friendly feedback; the conditional insert is what actually closes
// the race. The store carries a partial unique index over
// (doctor_id, appointment_date, start_time) restricted to active statuses,
// so two concurrent bookings can never both land.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, SchedulingError};

pub struct BookingConflictGuard {
    supabase: Arc<SupabaseClient>,
}

impl BookingConflictGuard {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Advisory point query: is any pending/confirmed appointment already
    /// holding this exact slot? Subject to races; callers must still go
    /// through `insert_active_unique`.
    pub async fn is_slot_available(
        &self,
        doctor_id: Uuid,
        stored_date: DateTime<Utc>,
        start_time: &str,
        auth_token: &str,
    ) -> Result<bool, SchedulingError> {
        let date_raw = stored_date.to_rfc3339();
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&start_time=eq.{}\
             &status=in.(pending,confirmed)&select=id",
            doctor_id,
            urlencoding::encode(&date_raw),
            urlencoding::encode(start_time)
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        debug!(
            "Slot check for doctor {} at {} {}: {} existing",
            doctor_id,
            date_raw,
            start_time,
            rows.len()
        );
        Ok(rows.is_empty())
    }

    /// Atomic conditional insert. PostgREST is told to ignore duplicates and
    /// return the representation, so a lost race surfaces as an empty result
    /// set rather than a second row.
    pub async fn insert_active_unique(
        &self,
        record: Value,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=ignore-duplicates,return=representation"),
        );

        let path = "/rest/v1/appointments?on_conflict=doctor_id,appointment_date,start_time";
        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(Method::POST, path, Some(auth_token), Some(record), Some(headers))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(appointment) => {
                info!(
                    "Booked appointment {} for doctor {}",
                    appointment.id, appointment.doctor_id
                );
                Ok(appointment)
            }
            None => Err(SchedulingError::Conflict),
        }
    }
}
