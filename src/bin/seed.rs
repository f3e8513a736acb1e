use cart_order_engine::{
    config::AppConfig,
    db::{OrmConn, create_orm_conn, run_migrations},
    entity::{
        categories::{
            ActiveModel as CategoryActive, CategoryStatus, Column as CategoryCol,
            Entity as Categories,
        },
        products::{ActiveModel as ProductActive, Column as ProductCol, Entity as Products, ProductStatus},
    },
    middleware::auth::encode_token,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

// Fixed so repeated runs keep the same seller and a dev token stays valid.
const SELLER_ID: Uuid = Uuid::from_u128(0x5e11e700_0000_4000_8000_000000000001);
const BUYER_ID: Uuid = Uuid::from_u128(0xb0b0b0b0_0000_4000_8000_000000000002);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let category_id = ensure_category(&orm, "Merch").await?;
    seed_products(&orm, category_id).await?;

    // One day is plenty for local poking around.
    let exp = (Utc::now().timestamp() + 24 * 3600) as usize;
    let seller_token = encode_token(SELLER_ID, &config.jwt_secret, exp)?;
    let buyer_token = encode_token(BUYER_ID, &config.jwt_secret, exp)?;

    println!("Seed completed. Seller ID: {SELLER_ID}, Buyer ID: {BUYER_ID}");
    println!("Seller token: {seller_token}");
    println!("Buyer token: {buyer_token}");
    Ok(())
}

async fn ensure_category(orm: &OrmConn, name: &str) -> anyhow::Result<Uuid> {
    if let Some(existing) = Categories::find()
        .filter(CategoryCol::Name.eq(name))
        .one(orm)
        .await?
    {
        return Ok(existing.id);
    }

    let category = CategoryActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        status: Set(CategoryStatus::Active),
        created_at: Set(Utc::now().into()),
    }
    .insert(orm)
    .await?;

    println!("Ensured category {name}");
    Ok(category.id)
}

async fn seed_products(orm: &OrmConn, category_id: Uuid) -> anyhow::Result<()> {
    let products = vec![
        ("Axum Hoodie", "Warm hoodie for Rustaceans", Decimal::new(5500, 2), 50),
        ("Ferris Mug", "Coffee tastes better with Ferris", Decimal::new(1200, 2), 100),
        ("Rust Sticker Pack", "Decorate your laptop", Decimal::new(500, 2), 200),
        ("E-book: Async Rust", "Learn async Rust patterns", Decimal::new(2500, 2), 75),
    ];

    for (title, desc, price, quantity) in products {
        let exists = Products::find()
            .filter(ProductCol::Title.eq(title))
            .filter(ProductCol::UserId.eq(SELLER_ID))
            .one(orm)
            .await?
            .is_some();
        if exists {
            continue;
        }

        ProductActive {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            description: Set(Some(desc.to_string())),
            quantity: Set(quantity),
            price: Set(price),
            user_id: Set(SELLER_ID),
            category_id: Set(Some(category_id)),
            status: Set(ProductStatus::Active),
            created_at: Set(Utc::now().into()),
        }
        .insert(orm)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
