use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{AddToCartRequest, CartItemDto, CartView, UpdateCartRequest},
    entity::{
        carts::{ActiveModel as CartActive, CartStatus, Column as CartCol, Entity as Carts, Model as CartModel},
        products::Entity as Products,
        products_in_cart::{
            ActiveModel as LineItemActive, Column as LineItemCol, Entity as ProductsInCart,
            LineItemStatus, Model as LineItemModel,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::LineItem,
    response::{ApiResponse, Meta},
    services::product_service,
    state::AppState,
};

pub async fn find_active_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> AppResult<Option<CartModel>> {
    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .filter(CartCol::Status.eq(CartStatus::Active))
        .one(conn)
        .await?;
    Ok(cart)
}

/// Return the user's active cart, creating it on first use.
///
/// Two first requests can race here. The partial unique index on active carts
/// lets exactly one insert through; the loser re-reads and gets the winner's cart.
pub async fn get_or_create_active_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> AppResult<CartModel> {
    if let Some(cart) = find_active_cart(conn, user_id).await? {
        return Ok(cart);
    }

    let now = Utc::now();
    let inserted = CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        status: Set(CartStatus::Active),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(conn)
    .await;

    match inserted {
        Ok(cart) => {
            tracing::debug!(user_id = %user_id, cart_id = %cart.id, "created cart");
            Ok(cart)
        }
        Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            tracing::debug!(user_id = %user_id, "lost cart creation race, re-reading");
            find_active_cart(conn, user_id).await?.ok_or_else(|| {
                AppError::Conflict("active cart changed while it was being created".into())
            })
        }
        Err(err) => Err(err.into()),
    }
}

/// Take the row lock on a cart that must still be active.
///
/// Every cart mutation and the purchase go through this lock, so work on one
/// cart is serialized.
pub async fn lock_active_cart(txn: &DatabaseTransaction, cart_id: Uuid) -> AppResult<CartModel> {
    Carts::find_by_id(cart_id)
        .filter(CartCol::Status.eq(CartStatus::Active))
        .lock(LockType::Update)
        .one(txn)
        .await?
        .ok_or_else(|| AppError::Conflict(format!("cart {cart_id} is no longer active")))
}

pub async fn find_active_line_item<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
) -> AppResult<Option<LineItemModel>> {
    find_line_item_with_status(conn, cart_id, product_id, LineItemStatus::Active).await
}

/// The (cart, product) slot a user can still change: the active row if there
/// is one, otherwise the most recently removed row.
pub async fn find_open_line_item<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
) -> AppResult<Option<LineItemModel>> {
    if let Some(item) = find_active_line_item(conn, cart_id, product_id).await? {
        return Ok(Some(item));
    }
    find_line_item_with_status(conn, cart_id, product_id, LineItemStatus::Removed).await
}

async fn find_line_item_with_status<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
    status: LineItemStatus,
) -> AppResult<Option<LineItemModel>> {
    let item = ProductsInCart::find()
        .filter(LineItemCol::CartId.eq(cart_id))
        .filter(LineItemCol::ProductId.eq(product_id))
        .filter(LineItemCol::Status.eq(status))
        .order_by_desc(LineItemCol::UpdatedAt)
        .one(conn)
        .await?;
    Ok(item)
}

/// Put a product in a cart. A removed slot for the same product is reused
/// rather than duplicated.
pub async fn add_line_item<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<LineItemModel> {
    if quantity <= 0 {
        return Err(AppError::InvalidQuantity(quantity));
    }

    match find_open_line_item(conn, cart_id, product_id).await? {
        Some(item) if item.status == LineItemStatus::Active => {
            Err(AppError::AlreadyInCart(product_id))
        }
        Some(item) => transition(conn, item, LineItemStatus::Active, quantity).await,
        None => {
            let now = Utc::now();
            let item = LineItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart_id),
                product_id: Set(product_id),
                quantity: Set(quantity),
                status: Set(LineItemStatus::Active),
                unit_price: Set(None),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            }
            .insert(conn)
            .await
            .map_err(|err| match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => AppError::AlreadyInCart(product_id),
                _ => err.into(),
            })?;
            Ok(item)
        }
    }
}

/// Zero removes the slot, a positive quantity (re)activates it.
pub async fn set_line_item_quantity<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
    new_quantity: i32,
) -> AppResult<LineItemModel> {
    if new_quantity < 0 {
        return Err(AppError::InvalidQuantity(new_quantity));
    }

    let item = find_open_line_item(conn, cart_id, product_id)
        .await?
        .ok_or(AppError::NotInCart(product_id))?;

    let next = if new_quantity == 0 {
        LineItemStatus::Removed
    } else {
        LineItemStatus::Active
    };
    transition(conn, item, next, new_quantity).await
}

/// Soft delete. Removing an already removed item is a no-op; purchased
/// items belong to an order and cannot be removed.
pub async fn remove_line_item<C: ConnectionTrait>(
    conn: &C,
    line_item_id: Uuid,
) -> AppResult<LineItemModel> {
    let item = ProductsInCart::find_by_id(line_item_id)
        .one(conn)
        .await?
        .ok_or(AppError::LineItemNotFound(line_item_id))?;

    if item.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "line item {line_item_id} was already purchased"
        )));
    }
    if item.status == LineItemStatus::Removed {
        return Ok(item);
    }
    transition(conn, item, LineItemStatus::Removed, 0).await
}

/// Active items of a cart, ordered by product id so stock rows are always
/// locked in the same order.
pub async fn list_active_line_items<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> AppResult<Vec<LineItemModel>> {
    let items = ProductsInCart::find()
        .filter(LineItemCol::CartId.eq(cart_id))
        .filter(LineItemCol::Status.eq(LineItemStatus::Active))
        .order_by_asc(LineItemCol::ProductId)
        .all(conn)
        .await?;
    Ok(items)
}

async fn transition<C: ConnectionTrait>(
    conn: &C,
    item: LineItemModel,
    next: LineItemStatus,
    quantity: i32,
) -> AppResult<LineItemModel> {
    if !item.status.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "line item {} cannot move from {:?} to {:?}",
            item.id, item.status, next
        )));
    }

    let mut active: LineItemActive = item.into();
    active.status = Set(next);
    active.quantity = Set(quantity);
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(conn).await?)
}

pub async fn view_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    let Some(cart) = find_active_cart(&state.orm, user.user_id).await? else {
        return Ok(ApiResponse::success(
            "OK",
            CartView {
                cart: None,
                items: Vec::new(),
            },
            Some(Meta::empty()),
        ));
    };

    let items: Vec<CartItemDto> = ProductsInCart::find()
        .filter(LineItemCol::CartId.eq(cart.id))
        .filter(LineItemCol::Status.eq(LineItemStatus::Active))
        .order_by_asc(LineItemCol::CreatedAt)
        .find_also_related(Products)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|(item, product)| CartItemDto {
            line_item: item.into(),
            product: product.map(Into::into),
        })
        .collect();

    let meta = Meta::single_page(items.len());
    Ok(ApiResponse::success(
        "OK",
        CartView {
            cart: Some(cart.into()),
            items,
        },
        Some(meta),
    ))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<LineItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::InvalidQuantity(payload.quantity));
    }

    let product = product_service::find_available(&state.orm, payload.product_id).await?;
    product_service::ensure_stock(&product, payload.quantity)?;

    let cart = get_or_create_active_cart(&state.orm, user.user_id).await?;

    let txn = state.orm.begin().await?;
    lock_active_cart(&txn, cart.id).await?;
    let item = add_line_item(&txn, cart.id, product.id, payload.quantity).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        user.user_id,
        "cart_add",
        "products_in_cart",
        serde_json::json!({ "product_id": product.id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product added to cart",
        item.into(),
        Some(Meta::empty()),
    ))
}

pub async fn update_cart_item(
    state: &AppState,
    user: &AuthUser,
    payload: UpdateCartRequest,
) -> AppResult<ApiResponse<LineItem>> {
    if payload.new_qty < 0 {
        return Err(AppError::InvalidQuantity(payload.new_qty));
    }

    // Dropping a product to zero stays possible even after it was delisted.
    if payload.new_qty > 0 {
        let product = product_service::find_available(&state.orm, payload.product_id).await?;
        product_service::ensure_stock(&product, payload.new_qty)?;
    }

    let cart = find_active_cart(&state.orm, user.user_id)
        .await?
        .ok_or(AppError::NotInCart(payload.product_id))?;

    let txn = state.orm.begin().await?;
    lock_active_cart(&txn, cart.id).await?;
    let item = set_line_item_quantity(&txn, cart.id, payload.product_id, payload.new_qty).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        user.user_id,
        "cart_update",
        "products_in_cart",
        serde_json::json!({ "product_id": payload.product_id, "quantity": payload.new_qty }),
    )
    .await;

    Ok(ApiResponse::success("Cart updated", item.into(), Some(Meta::empty())))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let cart = find_active_cart(&state.orm, user.user_id)
        .await?
        .ok_or(AppError::NotInCart(product_id))?;

    let txn = state.orm.begin().await?;
    lock_active_cart(&txn, cart.id).await?;
    let item = find_open_line_item(&txn, cart.id, product_id)
        .await?
        .ok_or(AppError::NotInCart(product_id))?;
    remove_line_item(&txn, item.id).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        user.user_id,
        "cart_remove",
        "products_in_cart",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
