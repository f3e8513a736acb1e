use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::{
    carts::{self, CartStatus},
    categories::{self, CategoryStatus},
    orders,
    products::{self, ProductStatus},
    products_in_cart::{self, LineItemStatus},
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub quantity: i32,
    #[schema(value_type = String, example = "10.00")]
    pub price: Decimal,
    pub user_id: Uuid,
    pub category_id: Option<Uuid>,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub status: CategoryStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: CartStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LineItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub status: LineItemStatus,
    #[schema(value_type = Option<String>)]
    pub unit_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cart_id: Uuid,
    #[schema(value_type = String, example = "25.00")]
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A purchased line item as shown on an order.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub line_item_id: Uuid,
    pub product_id: Uuid,
    pub title: Option<String>,
    pub quantity: i32,
    #[schema(value_type = Option<String>)]
    pub unit_price: Option<Decimal>,
}

impl From<products::Model> for Product {
    fn from(model: products::Model) -> Self {
        Self {
            id: model.id,
            title: model.title,
            description: model.description,
            quantity: model.quantity,
            price: model.price,
            user_id: model.user_id,
            category_id: model.category_id,
            status: model.status,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<categories::Model> for Category {
    fn from(model: categories::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            status: model.status,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<carts::Model> for Cart {
    fn from(model: carts::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            status: model.status,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl From<products_in_cart::Model> for LineItem {
    fn from(model: products_in_cart::Model) -> Self {
        Self {
            id: model.id,
            cart_id: model.cart_id,
            product_id: model.product_id,
            quantity: model.quantity,
            status: model.status,
            unit_price: model.unit_price,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl From<orders::Model> for Order {
    fn from(model: orders::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            cart_id: model.cart_id,
            total_price: model.total_price,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl OrderItem {
    pub fn from_entities(item: products_in_cart::Model, product: Option<products::Model>) -> Self {
        Self {
            line_item_id: item.id,
            product_id: item.product_id,
            title: product.map(|p| p.title),
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}
