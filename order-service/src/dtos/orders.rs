use crate::models::{Order, OrderItem, Profile};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("must not be negative".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    #[serde(alias = "product_id")]
    #[validate(length(min = 1, message = "productId is required"))]
    pub product_id: String,

    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,

    #[validate(custom(function = "validate_non_negative"))]
    pub price: Decimal,

    pub size: Option<String>,
    pub color: Option<String>,
}

/// Checkout payload. Presence of the required fields is checked by the
/// workflow so a missing one yields a single clear message.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<OrderItemInput>,

    #[serde(alias = "shipping_address")]
    pub shipping_address: Option<serde_json::Value>,

    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub shipping: Option<Decimal>,
    pub total: Option<Decimal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub order_number: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Option<String>,
    pub quantity: i32,
    pub size: Option<String>,
    pub color: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<OrderItem> for OrderItemResponse {
    fn from(item: OrderItem) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            quantity: item.quantity,
            size: item.size,
            color: item.color,
            price: item.price,
            created_at: item.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: String,
    pub order_number: String,
    pub status: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub tax: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub shipping: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub stripe_payment_intent_id: Option<String>,
    pub payment_status: String,
    pub shipping_address: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            order_number: order.order_number,
            status: order.status.as_str().to_string(),
            subtotal: order.subtotal,
            tax: order.tax,
            shipping: order.shipping,
            total: order.total,
            stripe_payment_intent_id: order.stripe_payment_intent_id,
            payment_status: order.payment_status.as_str().to_string(),
            shipping_address: order.shipping_address,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items: order.items.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: String,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        Self {
            id: profile.id,
            email: profile.email,
            full_name: profile.full_name,
            role: profile.role.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_orders: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
        Self {
            current_page: page,
            total_pages,
            total_orders: total,
            has_more: page < total_pages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrdersPage {
    pub orders: Vec<OrderResponse>,
    pub pagination: Pagination,
}

impl From<(Vec<Order>, Pagination)> for OrdersPage {
    fn from((orders, pagination): (Vec<Order>, Pagination)) -> Self {
        OrdersPage {
            orders: orders.into_iter().map(Into::into).collect(),
            pagination,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderDetailResponse {
    pub order: OrderResponse,
    pub profile: Option<ProfileResponse>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
    #[serde(alias = "payment_intent_id")]
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateOrderResponse {
    pub order: OrderResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_rounds_pages_up() {
        let p = Pagination::new(2, 10, 25);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_more);

        let last = Pagination::new(3, 10, 25);
        assert!(!last.has_more);
    }

    #[test]
    fn pagination_with_no_orders() {
        let p = Pagination::new(1, 10, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_more);
    }

    #[test]
    fn item_accepts_snake_case_product_id() {
        let item: OrderItemInput =
            serde_json::from_str(r#"{"product_id":"p1","quantity":2,"price":50}"#).unwrap();
        assert_eq!(item.product_id, "p1");
        assert_eq!(item.price, Decimal::from(50));
        assert!(item.validate().is_ok());
    }

    #[test]
    fn item_rejects_zero_quantity_and_negative_price() {
        let item: OrderItemInput =
            serde_json::from_str(r#"{"productId":"p1","quantity":0,"price":-1}"#).unwrap();
        let errors = item.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("quantity"));
        assert!(fields.contains_key("price"));
    }

    #[test]
    fn amounts_serialize_as_numbers() {
        let response = CreateOrderResponse {
            order_id: Uuid::nil(),
            order_number: "ORD-1".to_string(),
            total: Decimal::new(10000, 2),
        };
        let json = serde_json::to_value(response).unwrap();
        assert_eq!(json["total"].as_f64(), Some(100.0));
        assert_eq!(json["orderNumber"], "ORD-1");
    }
}
