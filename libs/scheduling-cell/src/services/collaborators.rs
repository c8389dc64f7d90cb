// libs/scheduling-cell/src/services/collaborators.rs
//
// Seams to the payment and notification subsystems. Services take these as
// trait objects through their constructors so tests can substitute mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::SchedulingError;

// ==============================================================================
// PAYMENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub transaction_id: Uuid,
    pub status: ChargeStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeRecord {
    pub id: Uuid,
    pub amount: f64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentClient: Send + Sync {
    /// Charges the patient and records the transaction. A declined charge is
    /// a `Failure` outcome, not an error; errors mean the payment system was
    /// unreachable.
    async fn charge(
        &self,
        patient_id: Uuid,
        appointment_id: Uuid,
        amount: f64,
        description: &str,
        auth_token: &str,
    ) -> Result<ChargeOutcome, SchedulingError>;

    /// Most recent successful charge recorded against an appointment, if any.
    async fn latest_successful_charge(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<ChargeRecord>, SchedulingError>;
}

pub struct SupabasePaymentClient {
    supabase: Arc<SupabaseClient>,
}

impl SupabasePaymentClient {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl PaymentClient for SupabasePaymentClient {
    async fn charge(
        &self,
        patient_id: Uuid,
        appointment_id: Uuid,
        amount: f64,
        description: &str,
        auth_token: &str,
    ) -> Result<ChargeOutcome, SchedulingError> {
        let body = json!({
            "patient_id": patient_id,
            "appointment_id": appointment_id,
            "amount": amount,
            "description": description,
            "status": "success",
        });

        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/payment_transactions",
                Some(auth_token),
                Some(body),
                Some(headers),
            )
            .await
            .map_err(|e| SchedulingError::ExternalService(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| SchedulingError::ExternalService("Empty transaction response".to_string()))?;

        let transaction_id = row
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| SchedulingError::ExternalService("Transaction missing id".to_string()))?;

        let status = match row.get("status").and_then(|v| v.as_str()) {
            Some("success") => ChargeStatus::Success,
            _ => ChargeStatus::Failure,
        };

        debug!("Recorded charge {} ({:?})", transaction_id, status);
        Ok(ChargeOutcome { transaction_id, status })
    }

    async fn latest_successful_charge(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<ChargeRecord>, SchedulingError> {
        let path = format!(
            "/rest/v1/payment_transactions?appointment_id=eq.{}&status=eq.success\
             &order=created_at.desc&limit=1&select=id,amount",
            appointment_id
        );

        let rows: Vec<ChargeRecord> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().next())
    }
}

// ==============================================================================
// NOTIFICATIONS
// ==============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Fire-and-forget delivery. `reference_id` ties the notification to the
    /// record it is about so later sends can be de-duplicated.
    async fn notify(
        &self,
        recipient_id: Uuid,
        kind: &str,
        title: &str,
        body: &str,
        reference_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError>;

    /// Whether a notification of `kind` about `reference_id` was already sent
    /// to the recipient after `since`.
    async fn was_sent_since(
        &self,
        recipient_id: Uuid,
        kind: &str,
        reference_id: Uuid,
        since: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<bool, SchedulingError>;
}

pub struct SupabaseNotificationSink {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseNotificationSink {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl NotificationSink for SupabaseNotificationSink {
    async fn notify(
        &self,
        recipient_id: Uuid,
        kind: &str,
        title: &str,
        body: &str,
        reference_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let payload = json!({
            "recipient_id": recipient_id,
            "kind": kind,
            "title": title,
            "body": body,
            "reference_id": reference_id,
        });

        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let result: Result<Vec<Value>, _> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/notifications",
                Some(auth_token),
                Some(payload),
                Some(headers),
            )
            .await;

        if let Err(e) = result {
            // Notifications never fail the surrounding operation.
            warn!("Failed to deliver {} notification to {}: {}", kind, recipient_id, e);
        }
        Ok(())
    }

    async fn was_sent_since(
        &self,
        recipient_id: Uuid,
        kind: &str,
        reference_id: Uuid,
        since: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<bool, SchedulingError> {
        let since_raw = since.to_rfc3339();
        let path = format!(
            "/rest/v1/notifications?recipient_id=eq.{}&kind=eq.{}&reference_id=eq.{}\
             &created_at=gte.{}&select=id&limit=1",
            recipient_id,
            kind,
            reference_id,
            urlencoding::encode(&since_raw)
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        Ok(!rows.is_empty())
    }
}
