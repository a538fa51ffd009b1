//! Checkout and order management endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        CreateOrderRequest, CreateOrderResponse, ListOrdersQuery, OrderDetailResponse,
        OrdersPage, UpdateOrderResponse, UpdateStatusRequest,
    },
    middleware::AuthUser,
    services::StatusUpdateMode,
    utils::ValidatedJson,
    AppState,
};

/// `POST /orders`
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), AppError> {
    let order = state.workflow.create_order(&user, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id: order.id,
            order_number: order.order_number,
            total: order.total,
        }),
    ))
}

/// `GET /orders`
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrdersPage>, AppError> {
    let page = state.workflow.list_orders(&user, query).await?;
    Ok(Json(page.into()))
}

/// `GET /orders/:id`
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OrderDetailResponse>, AppError> {
    let (order, profile) = state.workflow.get_order(&user, &id).await?;

    Ok(Json(OrderDetailResponse {
        order: order.into(),
        profile: profile.map(Into::into),
    }))
}

/// `PATCH /orders/:id` (admin): status and payment intent id.
///
/// Entering `cancelled` returns every item's quantity to stock. Because that
/// stock is already back on the shelf, `cancelled` is terminal: moving a
/// cancelled order anywhere else answers 409 Conflict. Re-sending the
/// current status is a 200 no-op.
pub async fn patch_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(payload): ValidatedJson<UpdateStatusRequest>,
) -> Result<Json<UpdateOrderResponse>, AppError> {
    let order = state
        .workflow
        .update_status(&user, &id, payload, StatusUpdateMode::WithPaymentIntent)
        .await?;

    Ok(Json(UpdateOrderResponse {
        order: order.into(),
    }))
}

/// `PUT /orders/:id` (admin): status only.
///
/// Shares PATCH's transition, so it restocks on cancellation and gets the
/// same 409 for leaving `cancelled`. Admin-only for that reason: any caller
/// able to cancel could otherwise return stock.
pub async fn put_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(payload): ValidatedJson<UpdateStatusRequest>,
) -> Result<Json<UpdateOrderResponse>, AppError> {
    let order = state
        .workflow
        .update_status(&user, &id, payload, StatusUpdateMode::StatusOnly)
        .await?;

    Ok(Json(UpdateOrderResponse {
        order: order.into(),
    }))
}
