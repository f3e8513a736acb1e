use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    dto::orders::{OrderList, OrderWithItems},
    entity::{
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::Entity as Products,
        products_in_cart::{Column as LineItemCol, Entity as ProductsInCart, LineItemStatus},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::OrderItem,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

/// Append an order. Orders are never updated or deleted afterwards.
pub async fn create_order<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    cart_id: Uuid,
    total: Decimal,
) -> AppResult<OrderModel> {
    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        cart_id: Set(cart_id),
        total_price: Set(total),
        created_at: Set(Utc::now().into()),
    }
    .insert(conn)
    .await?;
    Ok(order)
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(OrderCol::UserId.eq(user.user_id));
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let cart_ids: Vec<Uuid> = orders.iter().map(|o| o.cart_id).collect();
    let mut items_by_cart = purchased_items(&state.orm, cart_ids).await?;

    let items = orders
        .into_iter()
        .map(|order| {
            let items = items_by_cart.remove(&order.cart_id).unwrap_or_default();
            OrderWithItems {
                order: order.into(),
                items,
            }
        })
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Ok", OrderList { items }, Some(meta)))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::OrderNotFound(id))?;

    let items = purchased_items(&state.orm, vec![order.cart_id])
        .await?
        .remove(&order.cart_id)
        .unwrap_or_default();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order.into(),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Purchased line items of the given carts, grouped by cart.
async fn purchased_items<C: ConnectionTrait>(
    conn: &C,
    cart_ids: Vec<Uuid>,
) -> AppResult<HashMap<Uuid, Vec<OrderItem>>> {
    let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    if cart_ids.is_empty() {
        return Ok(grouped);
    }

    let rows = ProductsInCart::find()
        .filter(LineItemCol::CartId.is_in(cart_ids))
        .filter(LineItemCol::Status.eq(LineItemStatus::Purchased))
        .order_by_asc(LineItemCol::ProductId)
        .find_also_related(Products)
        .all(conn)
        .await?;

    for (item, product) in rows {
        grouped
            .entry(item.cart_id)
            .or_default()
            .push(OrderItem::from_entities(item, product));
    }
    Ok(grouped)
}
