mod common;

use cart_order_engine::{
    db::create_orm_conn,
    dto::cart::AddToCartRequest,
    entity::{
        carts::{CartStatus, Entity as Carts},
        orders::Entity as Orders,
        products::{
            ActiveModel as ProductActive, Column as ProductCol, Entity as Products, ProductStatus,
        },
        products_in_cart::{Column as LineItemCol, Entity as ProductsInCart, LineItemStatus},
    },
    error::AppError,
    middleware::auth::AuthUser,
    routes::params::OrderListQuery,
    services::{cart_service, order_service, purchase_service},
    state::AppState,
};
use rust_decimal_macros::dec;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use uuid::Uuid;

async fn add(state: &AppState, user: &AuthUser, product_id: Uuid, quantity: i32) -> anyhow::Result<()> {
    cart_service::add_to_cart(state, user, AddToCartRequest { product_id, quantity }).await?;
    Ok(())
}

#[tokio::test]
async fn purchase_turns_the_cart_into_an_order() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let user = common::new_user();
    let x = common::seed_product(&state, "Product X", dec!(10.00), 5).await?;
    let y = common::seed_product(&state, "Product Y", dec!(5.00), 1).await?;

    add(&state, &user, x.id, 2).await?;
    add(&state, &user, y.id, 1).await?;

    let receipt = purchase_service::purchase(&state, &user)
        .await?
        .data
        .expect("receipt");

    assert_eq!(receipt.order.total_price, dec!(25.00));
    assert_eq!(receipt.order.user_id, user.user_id);
    assert_eq!(receipt.items.len(), 2);
    for item in &receipt.items {
        let expected = if item.product_id == x.id { dec!(10.00) } else { dec!(5.00) };
        assert_eq!(item.unit_price, Some(expected));
    }

    assert_eq!(common::reload_product(&state, x.id).await?.quantity, 3);
    assert_eq!(common::reload_product(&state, y.id).await?.quantity, 0);

    let cart = Carts::find_by_id(receipt.order.cart_id)
        .one(&state.orm)
        .await?
        .expect("cart");
    assert_eq!(cart.status, CartStatus::Purchased);

    let items = ProductsInCart::find()
        .filter(LineItemCol::CartId.eq(cart.id))
        .all(&state.orm)
        .await?;
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.status == LineItemStatus::Purchased));
    Ok(())
}

#[tokio::test]
async fn shortfall_rolls_back_every_decrement() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let user = common::new_user();
    let x = common::seed_product(&state, "Product X", dec!(10.00), 5).await?;
    let y = common::seed_product(&state, "Product Y", dec!(5.00), 1).await?;

    add(&state, &user, x.id, 2).await?;
    add(&state, &user, y.id, 1).await?;
    common::set_stock(&state, y.id, 0).await?;

    let result = purchase_service::purchase(&state, &user).await;
    assert!(matches!(
        result,
        Err(AppError::InsufficientStock { product_id, requested: 1, available: 0 }) if product_id == y.id
    ));

    assert_eq!(common::reload_product(&state, x.id).await?.quantity, 5);
    assert_eq!(common::reload_product(&state, y.id).await?.quantity, 0);

    let cart = cart_service::find_active_cart(&state.orm, user.user_id)
        .await?
        .expect("cart is still active");
    let items = cart_service::list_active_line_items(&state.orm, cart.id).await?;
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.unit_price.is_none()));
    assert_eq!(Orders::find().count(&state.orm).await?, 0);
    Ok(())
}

#[tokio::test]
async fn delisted_product_aborts_the_purchase() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let user = common::new_user();
    let x = common::seed_product(&state, "Product X", dec!(10.00), 5).await?;
    let y = common::seed_product(&state, "Product Y", dec!(5.00), 5).await?;

    add(&state, &user, x.id, 1).await?;
    add(&state, &user, y.id, 1).await?;

    let mut active: ProductActive = common::reload_product(&state, y.id).await?.into();
    active.status = Set(ProductStatus::Inactive);
    active.update(&state.orm).await?;

    let result = purchase_service::purchase(&state, &user).await;
    assert!(matches!(result, Err(AppError::ProductNotFound(id)) if id == y.id));
    assert_eq!(common::reload_product(&state, x.id).await?.quantity, 5);
    assert!(cart_service::find_active_cart(&state.orm, user.user_id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn concurrent_purchases_of_one_cart_produce_one_order() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let user = common::new_user();
    let x = common::seed_product(&state, "Product X", dec!(10.00), 5).await?;
    add(&state, &user, x.id, 2).await?;

    let (first, second) = tokio::join!(
        purchase_service::purchase(&state, &user),
        purchase_service::purchase(&state, &user),
    );

    let outcomes = [first, second];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(AppError::NoActiveCart) | Err(AppError::Conflict(_))
    )));

    assert_eq!(Orders::find().count(&state.orm).await?, 1);
    assert_eq!(common::reload_product(&state, x.id).await?.quantity, 3);
    Ok(())
}

#[tokio::test]
async fn competing_carts_never_oversell() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let alice = common::new_user();
    let bob = common::new_user();
    let last_one = common::seed_product(&state, "Last one", dec!(42.00), 1).await?;

    add(&state, &alice, last_one.id, 1).await?;
    add(&state, &bob, last_one.id, 1).await?;

    let (a, b) = tokio::join!(
        purchase_service::purchase(&state, &alice),
        purchase_service::purchase(&state, &bob),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(AppError::InsufficientStock { requested: 1, available: 0, .. })
    )));
    assert_eq!(common::reload_product(&state, last_one.id).await?.quantity, 0);
    Ok(())
}

#[tokio::test]
async fn purchase_needs_a_non_empty_active_cart() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let user = common::new_user();

    let result = purchase_service::purchase(&state, &user).await;
    assert!(matches!(result, Err(AppError::NoActiveCart)));
    // Purchasing must not create a cart as a side effect.
    assert_eq!(Carts::find().count(&state.orm).await?, 0);

    let x = common::seed_product(&state, "Product X", dec!(10.00), 5).await?;
    add(&state, &user, x.id, 1).await?;
    cart_service::remove_from_cart(&state, &user, x.id).await?;

    let result = purchase_service::purchase(&state, &user).await;
    assert!(matches!(result, Err(AppError::EmptyCart)));
    assert_eq!(common::reload_product(&state, x.id).await?.quantity, 5);
    Ok(())
}

#[tokio::test]
async fn next_add_after_purchase_opens_a_fresh_cart() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let user = common::new_user();
    let x = common::seed_product(&state, "Product X", dec!(10.00), 5).await?;

    add(&state, &user, x.id, 1).await?;
    let receipt = purchase_service::purchase(&state, &user)
        .await?
        .data
        .expect("receipt");

    // The purchased cart still holds a purchased row for X; a new cart does not collide with it.
    add(&state, &user, x.id, 1).await?;
    let cart = cart_service::find_active_cart(&state.orm, user.user_id)
        .await?
        .expect("new cart");
    assert_ne!(cart.id, receipt.order.cart_id);
    Ok(())
}

#[tokio::test]
async fn orders_are_listed_per_user_with_their_items() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let user = common::new_user();
    let stranger = common::new_user();
    let x = common::seed_product(&state, "Product X", dec!(10.00), 10).await?;
    let y = common::seed_product(&state, "Product Y", dec!(2.50), 10).await?;

    add(&state, &user, x.id, 1).await?;
    purchase_service::purchase(&state, &user).await?;
    add(&state, &user, y.id, 2).await?;
    let second = purchase_service::purchase(&state, &user)
        .await?
        .data
        .expect("receipt");

    let listed = order_service::list_orders(&state, &user, OrderListQuery::default()).await?;
    let meta = listed.meta.expect("meta");
    assert_eq!(meta.total, Some(2));
    let orders = listed.data.expect("orders").items;
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o.items.len() == 1));

    let fetched = order_service::get_order(&state, &user, second.order.id)
        .await?
        .data
        .expect("order");
    assert_eq!(fetched.order.total_price, dec!(5.00));
    assert_eq!(fetched.items[0].product_id, y.id);
    assert_eq!(fetched.items[0].quantity, 2);
    assert_eq!(fetched.items[0].title.as_deref(), Some("Product Y"));

    let hidden = order_service::get_order(&state, &stranger, second.order.id).await;
    assert!(matches!(hidden, Err(AppError::OrderNotFound(_))));

    let none = order_service::list_orders(&state, &stranger, OrderListQuery::default())
        .await?
        .data
        .expect("orders");
    assert!(none.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn purchase_cart_can_be_driven_directly() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let user = common::new_user();
    let x = common::seed_product(&state, "Product X", dec!(1.25), 4).await?;
    add(&state, &user, x.id, 4).await?;

    let receipt = purchase_service::purchase_cart(&state.orm, user.user_id).await?;
    assert_eq!(receipt.order.total_price, dec!(5.00));
    assert_eq!(common::reload_product(&state, x.id).await?.quantity, 0);
    Ok(())
}

#[tokio::test]
async fn pages_far_past_the_end_are_empty() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let user = common::new_user();
    let x = common::seed_product(&state, "Product X", dec!(10.00), 5).await?;
    add(&state, &user, x.id, 1).await?;
    purchase_service::purchase(&state, &user).await?;

    let listed = order_service::list_orders(
        &state,
        &user,
        OrderListQuery {
            page: Some(i64::MAX),
            ..Default::default()
        },
    )
    .await?;
    assert!(listed.data.expect("orders").items.is_empty());
    assert_eq!(listed.meta.expect("meta").total, Some(1));
    Ok(())
}

#[tokio::test]
async fn purchased_line_items_cannot_be_removed() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let user = common::new_user();
    let x = common::seed_product(&state, "Product X", dec!(10.00), 5).await?;
    add(&state, &user, x.id, 1).await?;

    let receipt = purchase_service::purchase(&state, &user)
        .await?
        .data
        .expect("receipt");
    let line_item_id = receipt.items[0].line_item_id;

    let result = cart_service::remove_line_item(&state.orm, line_item_id).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let row = ProductsInCart::find_by_id(line_item_id)
        .one(&state.orm)
        .await?
        .expect("line item");
    assert_eq!(row.status, LineItemStatus::Purchased);
    assert_eq!(row.quantity, 1);

    let missing = Uuid::new_v4();
    let result = cart_service::remove_line_item(&state.orm, missing).await;
    assert!(matches!(result, Err(AppError::LineItemNotFound(id)) if id == missing));
    Ok(())
}

#[tokio::test]
async fn contention_is_retried_then_reported_as_transient() -> anyhow::Result<()> {
    let file = common::SqliteFile::new();
    let state = common::setup_state_with(&file.url(), 2).await?;
    let user = common::new_user();
    let x = common::seed_product(&state, "Product X", dec!(10.00), 5).await?;
    add(&state, &user, x.id, 2).await?;

    // Another connection holds the write lock on the product for the whole purchase.
    let other = create_orm_conn(&file.url()).await?;
    let blocker = other.begin().await?;
    Products::update_many()
        .col_expr(ProductCol::Quantity, Expr::col(ProductCol::Quantity).into())
        .filter(ProductCol::Id.eq(x.id))
        .exec(&blocker)
        .await?;

    let result = purchase_service::purchase(&state, &user).await;
    blocker.rollback().await?;

    assert!(matches!(result, Err(AppError::Transient { attempts: 2 })));
    assert_eq!(common::reload_product(&state, x.id).await?.quantity, 5);
    let cart = cart_service::find_active_cart(&state.orm, user.user_id)
        .await?
        .expect("cart is still active");
    let items = cart_service::list_active_line_items(&state.orm, cart.id).await?;
    assert_eq!(items.len(), 1);
    assert_eq!(Orders::find().count(&state.orm).await?, 0);

    // Once the lock is gone the same cart goes through.
    let receipt = purchase_service::purchase(&state, &user)
        .await?
        .data
        .expect("receipt");
    assert_eq!(receipt.order.total_price, dec!(20.00));
    assert_eq!(common::reload_product(&state, x.id).await?.quantity, 3);
    Ok(())
}
