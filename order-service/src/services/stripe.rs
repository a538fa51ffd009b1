//! Stripe payment gateway client.
//!
//! Covers payment intent creation and verification of the signed webhook
//! events Stripe sends back when an intent changes state.

use crate::config::StripeConfig;
use anyhow::{anyhow, Result};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use secrecy::ExposeSecret;
use serde::Deserialize;
use service_core::utils::signature;
use std::collections::HashMap;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

/// Payment intent as returned by `POST /v1/payment_intents`.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

/// Signed event delivered to the webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: WebhookPaymentIntent,
}

/// The payment intent carried by an event. Only the fields the order
/// workflow reads are modelled.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPaymentIntent {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl WebhookPaymentIntent {
    pub fn order_id(&self) -> Option<&str> {
        self.metadata.get("orderId").map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventKind {
    Created,
    Succeeded,
    PaymentFailed,
    Canceled,
    Other,
}

impl WebhookEvent {
    pub fn kind(&self) -> PaymentEventKind {
        match self.event_type.as_str() {
            "payment_intent.created" => PaymentEventKind::Created,
            "payment_intent.succeeded" => PaymentEventKind::Succeeded,
            "payment_intent.payment_failed" => PaymentEventKind::PaymentFailed,
            "payment_intent.canceled" => PaymentEventKind::Canceled,
            _ => PaymentEventKind::Other,
        }
    }
}

/// Convert a major-unit amount (e.g. dollars) to the minor units Stripe
/// expects, rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| anyhow!("Amount {} is out of range", amount))
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if the API key is set.
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    /// Check if webhook verification is possible.
    pub fn webhook_configured(&self) -> bool {
        !self.config.webhook_secret.expose_secret().is_empty()
    }

    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    /// Create a payment intent for `amount_minor` tagged with the order and
    /// user it pays for.
    pub async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        user_id: &str,
        order_id: &str,
    ) -> Result<PaymentIntent> {
        if !self.is_configured() {
            return Err(anyhow!("Stripe credentials not configured"));
        }

        let form = serde_urlencoded::to_string([
            ("amount", amount_minor.to_string()),
            ("currency", currency.to_lowercase()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[userId]", user_id.to_string()),
            ("metadata[orderId]", order_id.to_string()),
        ])?;

        let url = format!(
            "{}/v1/payment_intents",
            self.config.api_base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "Stripe create_payment_intent response");

        if status.is_success() {
            let intent: PaymentIntent = serde_json::from_str(&body)?;
            tracing::info!(
                payment_intent_id = %intent.id,
                amount = intent.amount,
                currency = %intent.currency,
                "Payment intent created"
            );
            Ok(intent)
        } else {
            let (kind, message) = match serde_json::from_str::<StripeErrorBody>(&body) {
                Ok(err) => (
                    err.error.kind.unwrap_or_else(|| "unknown".to_string()),
                    err.error.message.unwrap_or_default(),
                ),
                Err(_) => ("unknown".to_string(), body.clone()),
            };
            tracing::error!(
                status = %status,
                kind = %kind,
                message = %message,
                "Payment intent creation failed"
            );
            Err(anyhow!("Stripe error ({}): {}", kind, message))
        }
    }

    /// Verify a `Stripe-Signature` header against the raw request body.
    ///
    /// `Err` for an unusable header, `Ok(false)` for a mismatch or a
    /// timestamp outside the configured tolerance.
    pub fn verify_webhook_signature(&self, payload: &[u8], header: &str) -> Result<bool> {
        self.verify_webhook_signature_at(payload, header, chrono::Utc::now().timestamp())
    }

    pub fn verify_webhook_signature_at(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> Result<bool> {
        if !self.webhook_configured() {
            return Err(anyhow!("Stripe webhook secret not configured"));
        }

        let is_valid = signature::verify_webhook_signature(
            self.config.webhook_secret.expose_secret(),
            payload,
            header,
            self.config.webhook_tolerance_seconds,
            now,
        )?;

        if !is_valid {
            tracing::warn!("Webhook signature verification failed");
        }

        Ok(is_valid)
    }

    pub fn parse_webhook_event(&self, payload: &[u8]) -> Result<WebhookEvent> {
        let event: WebhookEvent = serde_json::from_slice(payload)?;
        Ok(event)
    }
}
