use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    /// Offset applied when a record carries no timezone, minutes ahead of UTC.
    pub default_timezone_offset_minutes: i32,
    /// How early a party may enter an appointment's access window.
    pub access_buffer_minutes: i64,
    /// Lead time for the "starting soon" reminder.
    pub reminder_lead_minutes: i64,
    pub default_slot_minutes: i32,
    pub reschedule_fee_percentage: f64,
    pub reschedule_min_fee: f64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            default_timezone_offset_minutes: parse_env("DEFAULT_TIMEZONE_OFFSET_MINUTES", 300),
            access_buffer_minutes: parse_env("ACCESS_BUFFER_MINUTES", 2),
            reminder_lead_minutes: parse_env("REMINDER_LEAD_MINUTES", 5),
            default_slot_minutes: parse_env("DEFAULT_SLOT_MINUTES", 30),
            reschedule_fee_percentage: parse_env("RESCHEDULE_FEE_PERCENTAGE", 50.0),
            reschedule_min_fee: parse_env("RESCHEDULE_MIN_FEE", 5.0),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

fn parse_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid value, using default", key);
            default
        }),
        Err(_) => default,
    }
}
