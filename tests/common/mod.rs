#![allow(dead_code)]

use cart_order_engine::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    entity::products::{ActiveModel as ProductActive, Entity as Products, Model as ProductModel, ProductStatus},
    middleware::auth::AuthUser,
    state::AppState,
};
use std::path::PathBuf;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

pub const TEST_SECRET: &str = "test-secret";

// Each call gets its own in-memory database, so tests never share rows.
pub async fn setup_state() -> anyhow::Result<AppState> {
    setup_state_with("sqlite::memory:", 3).await
}

pub async fn setup_state_with(database_url: &str, purchase_max_attempts: u32) -> anyhow::Result<AppState> {
    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: TEST_SECRET.to_string(),
        purchase_max_attempts,
        purchase_retry_backoff_ms: 1,
    };
    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;
    Ok(AppState::new(orm, config))
}

/// A throwaway SQLite file, removed on drop. Unlike the in-memory database it
/// can be opened by several connections at once.
pub struct SqliteFile {
    path: PathBuf,
}

impl SqliteFile {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("cart-order-engine-{}.db", Uuid::new_v4()));
        Self { path }
    }

    pub fn url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path.display())
    }
}

impl Drop for SqliteFile {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut path = self.path.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

pub fn new_user() -> AuthUser {
    AuthUser::new(Uuid::new_v4())
}

pub async fn seed_product(
    state: &AppState,
    title: &str,
    price: Decimal,
    quantity: i32,
) -> anyhow::Result<ProductModel> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        title: Set(title.to_string()),
        description: Set(Some(format!("{title} for testing"))),
        quantity: Set(quantity),
        price: Set(price),
        user_id: Set(Uuid::new_v4()),
        category_id: Set(None),
        status: Set(ProductStatus::Active),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

pub async fn set_stock(state: &AppState, product_id: Uuid, quantity: i32) -> anyhow::Result<()> {
    let product = reload_product(state, product_id).await?;
    let mut active: ProductActive = product.into();
    active.quantity = Set(quantity);
    active.update(&state.orm).await?;
    Ok(())
}

pub async fn reload_product(state: &AppState, product_id: Uuid) -> anyhow::Result<ProductModel> {
    Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product {product_id} missing"))
}
