//! Catalog entries referenced by order items.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Inactive,
    Draft,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
    pub status: ProductStatus,
    pub category_id: Option<String>,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
