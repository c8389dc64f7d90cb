use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

type HmacSha256 = Hmac<Sha256>;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            default_timezone_offset_minutes: 300,
            access_buffer_minutes: 2,
            reminder_lead_minutes: 5,
            default_slot_minutes: 30,
            reschedule_fee_percentage: 50.0,
            reschedule_min_fee: 5.0,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: None,
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    /// Builds a signed HS256 token the way Supabase would. Negative ttl
    /// produces an already-expired token.
    pub fn create_token(user: &TestUser, secret: &str, ttl_seconds: i64) -> String {
        let header = json!({"alg": "HS256", "typ": "JWT"});
        let exp = (Utc::now().timestamp() + ttl_seconds) as u64;
        let claims = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "exp": exp,
            "iat": Utc::now().timestamp() as u64,
            "aud": "authenticated"
        });

        let header_b64 = URL_SAFE_NO_PAD.encode(header.to_string());
        let claims_b64 = URL_SAFE_NO_PAD.encode(claims.to_string());
        let signing_input = format!("{}.{}", header_b64, claims_b64);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}", signing_input, signature)
    }

    pub fn bearer_header(user: &TestUser, secret: &str) -> String {
        format!("Bearer {}", Self::create_token(user, secret, 3600))
    }
}

/// Canned PostgREST rows matching this project's schema.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn doctor_response(doctor_id: &str, email: &str, name: &str) -> Value {
        json!({
            "id": doctor_id,
            "email": email,
            "full_name": name,
            "is_approved": true,
            "profile_completed": true,
            "slot_minutes": 30,
            "balance": 0.0
        })
    }

    pub fn patient_response(patient_id: &str, email: &str, name: &str) -> Value {
        json!({
            "id": patient_id,
            "email": email,
            "full_name": name
        })
    }

    pub fn subscription_response(doctor_id: &str, plan_id: &str, expires_at: &str) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "doctor_id": doctor_id,
            "plan_id": plan_id,
            "status": "active",
            "expires_at": expires_at
        })
    }

    pub fn appointment_response(
        appointment_id: &str,
        doctor_id: &str,
        patient_id: &str,
        appointment_date: &str,
        start_time: &str,
        status: &str,
    ) -> Value {
        json!({
            "id": appointment_id,
            "doctor_id": doctor_id,
            "patient_id": patient_id,
            "appointment_date": appointment_date,
            "start_time": start_time,
            "end_time": null,
            "duration_minutes": 30,
            "timezone": "UTC+5",
            "timezone_offset_minutes": 300,
            "booking_kind": "online",
            "status": status,
            "payment_status": "unpaid",
            "reschedule_request_id": null,
            "video_session_id": null,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        })
    }

    pub fn payment_transaction_response(
        appointment_id: &str,
        amount: f64,
        status: &str,
    ) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "appointment_id": appointment_id,
            "amount": amount,
            "status": status,
            "purpose": "appointment_fee",
            "created_at": Utc::now().to_rfc3339()
        })
    }
}
