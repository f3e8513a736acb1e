use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect,
    Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    db::{OrmConn, is_transient},
    dto::orders::OrderWithItems,
    entity::{
        carts::{ActiveModel as CartActive, CartStatus, Column as CartCol, Entity as Carts, Model as CartModel},
        products::Model as ProductModel,
        products_in_cart::{ActiveModel as LineItemActive, LineItemStatus, Model as LineItemModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::OrderItem,
    response::{ApiResponse, Meta},
    services::{cart_service, order_service, product_service},
    state::AppState,
};

/// Turn the caller's active cart into an order.
///
/// Contention reported by the store (deadlocks, serialization failures, a busy
/// database) restarts the whole transaction, up to the configured number of
/// attempts. Every other failure is returned as is, with nothing applied.
pub async fn purchase(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let max_attempts = state.config.purchase_max_attempts.max(1);
    let backoff = Duration::from_millis(state.config.purchase_retry_backoff_ms);

    let mut attempt: u32 = 1;
    let receipt = loop {
        match purchase_cart(&state.orm, user.user_id).await {
            Ok(receipt) => break receipt,
            Err(AppError::OrmError(err)) if is_transient(&err) => {
                if attempt >= max_attempts {
                    tracing::error!(
                        user_id = %user.user_id,
                        attempts = attempt,
                        error = %err,
                        "purchase abandoned after repeated contention"
                    );
                    return Err(AppError::Transient { attempts: attempt });
                }
                tracing::warn!(
                    user_id = %user.user_id,
                    attempt,
                    error = %err,
                    "purchase hit contention, retrying"
                );
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    };

    audit::record(
        &state.orm,
        user.user_id,
        "purchase",
        "orders",
        serde_json::json!({
            "order_id": receipt.order.id,
            "cart_id": receipt.order.cart_id,
            "total_price": receipt.order.total_price,
        }),
    )
    .await;

    Ok(ApiResponse::success(
        "Purchase completed",
        receipt,
        Some(Meta::empty()),
    ))
}

/// One attempt at the purchase transaction.
///
/// The cart row is locked first, so a second purchase of the same cart waits
/// and then finds no active cart. Stock is taken product by product with a
/// conditional update; the first shortfall rolls the whole transaction back,
/// including the decrements already made for earlier items. Line items, the
/// cart and the new order are written in the same transaction and become
/// visible together on commit.
#[tracing::instrument(skip(conn), fields(cart_id = tracing::field::Empty))]
pub async fn purchase_cart(conn: &OrmConn, user_id: Uuid) -> AppResult<OrderWithItems> {
    let txn = conn.begin().await?;

    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .filter(CartCol::Status.eq(CartStatus::Active))
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NoActiveCart)?;
    tracing::Span::current().record("cart_id", tracing::field::display(cart.id));
    tracing::debug!("purchase started");

    let line_items = cart_service::list_active_line_items(&txn, cart.id).await?;
    if line_items.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let mut reserved: Vec<(LineItemModel, ProductModel)> = Vec::with_capacity(line_items.len());
    for item in line_items {
        match product_service::decrement_stock(&txn, item.product_id, item.quantity).await {
            Ok(product) => reserved.push((item, product)),
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed, relying on drop");
                }
                tracing::info!(user_id = %user_id, error = %err, "purchase rolled back");
                return Err(err);
            }
        }
    }

    // Charged at the price read while the product row is locked.
    let total: Decimal = reserved
        .iter()
        .map(|(item, product)| product.price * Decimal::from(item.quantity))
        .sum();

    let mut items = Vec::with_capacity(reserved.len());
    for (item, product) in reserved {
        let price = product.price;
        let purchased = mark_purchased(&txn, item, price).await?;
        items.push(OrderItem::from_entities(purchased, Some(product)));
    }

    let cart = close_cart(&txn, cart).await?;
    let order = order_service::create_order(&txn, user_id, cart.id, total).await?;

    txn.commit().await?;

    tracing::info!(
        user_id = %user_id,
        order_id = %order.id,
        total = %order.total_price,
        items = items.len(),
        "purchase committed"
    );

    Ok(OrderWithItems {
        order: order.into(),
        items,
    })
}

async fn mark_purchased(
    txn: &DatabaseTransaction,
    item: LineItemModel,
    unit_price: Decimal,
) -> AppResult<LineItemModel> {
    if !item.status.can_transition_to(LineItemStatus::Purchased) {
        return Err(AppError::Conflict(format!(
            "line item {} is {:?} and cannot be purchased",
            item.id, item.status
        )));
    }

    let mut active: LineItemActive = item.into();
    active.status = Set(LineItemStatus::Purchased);
    active.unit_price = Set(Some(unit_price));
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(txn).await?)
}

async fn close_cart(txn: &DatabaseTransaction, cart: CartModel) -> AppResult<CartModel> {
    if !cart.status.can_transition_to(CartStatus::Purchased) {
        return Err(AppError::NoActiveCart);
    }

    let mut active: CartActive = cart.into();
    active.status = Set(CartStatus::Purchased);
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(txn).await?)
}
