// libs/scheduling-cell/src/services/reminders.rs
//
// Background reminder loop. A plain timer tick, not a job queue: every pass
// re-derives who needs a reminder from the store, and the notification log
// keeps re-sends out.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Method;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, SchedulingError};
use crate::services::collaborators::NotificationSink;
use crate::services::window::{resolve_window, WindowInputs};

const TICK_SECONDS: u64 = 60;

const KIND_UPCOMING: &str = "appointment_reminder";
const KIND_STARTING: &str = "appointment_starting";

pub struct ReminderScheduler {
    supabase: Arc<SupabaseClient>,
    notifications: Arc<dyn NotificationSink>,
    config: Arc<AppConfig>,
}

impl ReminderScheduler {
    pub fn new(
        supabase: Arc<SupabaseClient>,
        notifications: Arc<dyn NotificationSink>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            supabase,
            notifications,
            config,
        }
    }

    /// Runs until the process exits. A failed tick is logged and the next
    /// tick starts from scratch.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(TICK_SECONDS));
            info!("Reminder scheduler started ({}s tick)", TICK_SECONDS);
            loop {
                ticker.tick().await;
                match self.tick(Utc::now()).await {
                    Ok(sent) if sent > 0 => info!("Reminder tick sent {} notifications", sent),
                    Ok(_) => {}
                    Err(e) => error!("Reminder tick failed: {}", e),
                }
            }
        })
    }

    /// One pass over upcoming confirmed appointments. Public so tests can
    /// drive it with a fixed `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<u32, SchedulingError> {
        let lead = ChronoDuration::minutes(self.config.reminder_lead_minutes);
        let candidates = self.upcoming_confirmed(now, auth_token(&self.config)).await?;
        debug!("Reminder tick considering {} appointments", candidates.len());

        let mut sent = 0;
        for appointment in &candidates {
            let window = match resolve_window(
                WindowInputs::from_appointment(appointment),
                self.config.access_buffer_minutes,
            ) {
                Ok(window) => window,
                Err(e) => {
                    error!("Skipping appointment {} with bad window: {}", appointment.id, e);
                    continue;
                }
            };

            let kind = if window.start_utc > now && window.start_utc <= now + lead {
                KIND_UPCOMING
            } else if window.start_utc <= now && now <= window.end_utc {
                KIND_STARTING
            } else {
                continue;
            };

            sent += self.send_once(appointment, kind, now, auth_token(&self.config)).await?;
        }

        Ok(sent)
    }

    /// Notifies both parties unless the log shows the same reminder already
    /// went out for this appointment.
    async fn send_once(
        &self,
        appointment: &Appointment,
        kind: &str,
        now: DateTime<Utc>,
        token: &str,
    ) -> Result<u32, SchedulingError> {
        // Anything sent within the last day for this appointment and kind
        // counts as already delivered.
        let since = now - ChronoDuration::days(1);

        let body = match kind {
            KIND_STARTING => "Your appointment is starting now".to_string(),
            _ => format!(
                "Your appointment starts in {} minutes",
                self.config.reminder_lead_minutes
            ),
        };

        let mut sent = 0;
        for recipient in [appointment.patient_id, appointment.doctor_id] {
            let already = self
                .notifications
                .was_sent_since(recipient, kind, appointment.id, since, token)
                .await?;
            if already {
                continue;
            }

            self.notifications
                .notify(recipient, kind, "Appointment reminder", &body, appointment.id, token)
                .await?;
            sent += 1;
        }

        Ok(sent)
    }

    /// Confirmed appointments whose stored date falls near `now`. The exact
    /// start instant is resolved in process; the query only narrows the scan.
    async fn upcoming_confirmed(
        &self,
        now: DateTime<Utc>,
        token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let from_raw = (now - ChronoDuration::days(1)).to_rfc3339();
        let to_raw = (now + ChronoDuration::days(1)).to_rfc3339();
        let path = format!(
            "/rest/v1/appointments?status=eq.confirmed&booking_kind=eq.online\
             &appointment_date=gte.{}&appointment_date=lte.{}",
            urlencoding::encode(&from_raw),
            urlencoding::encode(&to_raw)
        );

        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        Ok(rows)
    }
}

/// The scheduler acts with service credentials rather than a user session.
fn auth_token(config: &AppConfig) -> &str {
    &config.supabase_anon_key
}
