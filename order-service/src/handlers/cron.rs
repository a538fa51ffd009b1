//! Secret-gated maintenance endpoints for an external scheduler.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    Json,
};
use chrono::Utc;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::utils::signature::constant_time_eq;

use crate::{
    dtos::{CleanupQuery, CleanupResponse},
    AppState,
};

/// The secret may come as `?secret=` or as `Authorization: Bearer <secret>`.
fn provided_secret<'a>(query: &'a CleanupQuery, headers: &'a HeaderMap) -> Option<&'a str> {
    query.secret.as_deref().or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    })
}

/// `GET /cron/cleanup-pending-orders`
pub async fn cleanup_pending_orders(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
    headers: HeaderMap,
) -> Result<Json<CleanupResponse>, AppError> {
    let expected = state.config.cron.secret.expose_secret();
    let authorized = match provided_secret(&query, &headers) {
        Some(provided) => !expected.is_empty() && constant_time_eq(provided, expected),
        None => false,
    };
    if !authorized {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Cron secret missing or incorrect"
        )));
    }

    let deleted = state.workflow.cleanup_pending_orders(Utc::now()).await?;
    Ok(Json(CleanupResponse { deleted }))
}
