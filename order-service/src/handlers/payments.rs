//! Payment intent issuance and the gateway webhook.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use service_core::error::AppError;

use crate::{
    dtos::{PaymentIntentRequest, PaymentIntentResponse, WebhookAck},
    middleware::AuthUser,
    services::stripe::SIGNATURE_HEADER,
    utils::ValidatedJson,
    AppState,
};

/// `POST /payment-intent`
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<PaymentIntentRequest>,
) -> Result<Json<PaymentIntentResponse>, AppError> {
    let response = state.workflow.create_payment_intent(&user, payload).await?;
    Ok(Json(response))
}

/// `POST /webhooks/payments`
///
/// Takes the raw body: the signature covers the exact bytes sent.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.workflow.handle_webhook(&body, signature).await?;
    tracing::debug!(outcome = outcome.as_str(), "Webhook handled");

    Ok(Json(WebhookAck { received: true }))
}
