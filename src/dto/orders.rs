use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{Order, OrderItem};

/// An order with the line items its cart was purchased with, at the prices charged.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<OrderWithItems>,
}
