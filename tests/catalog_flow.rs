mod common;

use cart_order_engine::{
    dto::products::{
        CreateCategoryRequest, CreateProductRequest, UpdateCategoryRequest, UpdateProductRequest,
    },
    error::AppError,
    routes::params::{Pagination, ProductQuery, ProductSortBy, SortOrder},
    services::product_service,
};
use rust_decimal_macros::dec;

fn listing(title: &str, price: rust_decimal::Decimal) -> CreateProductRequest {
    CreateProductRequest {
        title: title.to_string(),
        description: Some(format!("{title} description")),
        quantity: 5,
        price,
        category_id: None,
    }
}

#[tokio::test]
async fn sellers_manage_their_own_listings() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let seller = common::new_user();
    let someone_else = common::new_user();

    let created = product_service::create_product(&state, &seller, listing("Lamp", dec!(19.50)))
        .await?
        .data
        .expect("product");
    assert_eq!(created.user_id, seller.user_id);

    let forbidden = product_service::update_product(
        &state,
        &someone_else,
        created.id,
        UpdateProductRequest {
            title: None,
            description: None,
            price: Some(dec!(1.00)),
            quantity: None,
        },
    )
    .await;
    assert!(matches!(forbidden, Err(AppError::Forbidden)));

    let updated = product_service::update_product(
        &state,
        &seller,
        created.id,
        UpdateProductRequest {
            title: Some("Desk lamp".into()),
            description: None,
            price: None,
            quantity: Some(8),
        },
    )
    .await?
    .data
    .expect("product");
    assert_eq!(updated.title, "Desk lamp");
    assert_eq!(updated.quantity, 8);
    assert_eq!(updated.price, dec!(19.50));

    product_service::deactivate_product(&state, &seller, created.id).await?;
    let gone = product_service::get_product(&state, created.id).await;
    assert!(matches!(gone, Err(AppError::ProductNotFound(_))));

    // Inactive listings still show up for their owner.
    let mine = product_service::list_user_products(&state, &seller, Pagination::default())
        .await?
        .data
        .expect("products");
    assert_eq!(mine.items.len(), 1);
    Ok(())
}

#[tokio::test]
async fn invalid_listings_are_rejected() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let seller = common::new_user();

    let blank = product_service::create_product(&state, &seller, listing("  ", dec!(1.00))).await;
    assert!(matches!(blank, Err(AppError::BadRequest(_))));

    let negative = product_service::create_product(&state, &seller, listing("Thing", dec!(-1.00))).await;
    assert!(matches!(negative, Err(AppError::BadRequest(_))));

    let too_expensive =
        product_service::create_product(&state, &seller, listing("Yacht", dec!(10000000000.00))).await;
    assert!(matches!(too_expensive, Err(AppError::BadRequest(_))));

    let sub_cent = product_service::create_product(&state, &seller, listing("Gum", dec!(0.005))).await;
    assert!(matches!(sub_cent, Err(AppError::BadRequest(_))));

    // Trailing zeros are not extra precision.
    let priciest = product_service::create_product(&state, &seller, listing("Jet", dec!(9999999999.990)))
        .await?
        .data
        .expect("product");
    let repriced = product_service::update_product(
        &state,
        &seller,
        priciest.id,
        UpdateProductRequest {
            title: None,
            description: None,
            price: Some(dec!(12.345)),
            quantity: None,
        },
    )
    .await;
    assert!(matches!(repriced, Err(AppError::BadRequest(_))));

    let mut request = listing("Thing", dec!(1.00));
    request.quantity = -3;
    let result = product_service::create_product(&state, &seller, request).await;
    assert!(matches!(result, Err(AppError::InvalidQuantity(-3))));

    let mut request = listing("Thing", dec!(1.00));
    request.category_id = Some(uuid::Uuid::new_v4());
    let result = product_service::create_product(&state, &seller, request).await;
    assert!(matches!(result, Err(AppError::CategoryNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn listing_filters_and_sorts() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let seller = common::new_user();

    let category = product_service::create_category(
        &state,
        &seller,
        CreateCategoryRequest { name: "Kitchen".into() },
    )
    .await?
    .data
    .expect("category");

    let mut kettle = listing("Kettle", dec!(30.00));
    kettle.category_id = Some(category.id);
    product_service::create_product(&state, &seller, kettle).await?;
    product_service::create_product(&state, &seller, listing("Teapot", dec!(12.00))).await?;
    product_service::create_product(&state, &seller, listing("Bicycle", dec!(250.00))).await?;

    let by_price = product_service::list_products(
        &state,
        ProductQuery {
            sort_by: Some(ProductSortBy::Price),
            sort_order: Some(SortOrder::Asc),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("products");
    let titles: Vec<&str> = by_price.items.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, ["Teapot", "Kettle", "Bicycle"]);

    let cheap = product_service::list_products(
        &state,
        ProductQuery {
            max_price: Some(dec!(50.00)),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("products");
    assert_eq!(cheap.items.len(), 2);

    let searched = product_service::list_products(
        &state,
        ProductQuery {
            q: Some("Tea".into()),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("products");
    assert_eq!(searched.items.len(), 1);
    assert_eq!(searched.items[0].title, "Teapot");

    let in_kitchen = product_service::list_products(
        &state,
        ProductQuery {
            category_id: Some(category.id),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("products");
    assert_eq!(in_kitchen.items.len(), 1);
    assert_eq!(in_kitchen.items[0].title, "Kettle");

    let paged = product_service::list_products(
        &state,
        ProductQuery {
            per_page: Some(2),
            page: Some(2),
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(paged.data.expect("products").items.len(), 1);
    assert_eq!(paged.meta.expect("meta").total, Some(3));

    let categories = product_service::list_categories(&state)
        .await?
        .data
        .expect("categories");
    assert_eq!(categories.items.len(), 1);
    assert_eq!(categories.items[0].name, "Kitchen");
    Ok(())
}

#[tokio::test]
async fn categories_can_be_renamed() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let user = common::new_user();

    let category = product_service::create_category(
        &state,
        &user,
        CreateCategoryRequest { name: "Kichen".into() },
    )
    .await?
    .data
    .expect("category");

    let renamed = product_service::update_category(
        &state,
        &user,
        category.id,
        UpdateCategoryRequest { name: "  Kitchen ".into() },
    )
    .await?
    .data
    .expect("category");
    assert_eq!(renamed.id, category.id);
    assert_eq!(renamed.name, "Kitchen");

    let blank = product_service::update_category(
        &state,
        &user,
        category.id,
        UpdateCategoryRequest { name: " ".into() },
    )
    .await;
    assert!(matches!(blank, Err(AppError::BadRequest(_))));

    let unknown = uuid::Uuid::new_v4();
    let missing = product_service::update_category(
        &state,
        &user,
        unknown,
        UpdateCategoryRequest { name: "Garden".into() },
    )
    .await;
    assert!(matches!(missing, Err(AppError::CategoryNotFound(id)) if id == unknown));

    let categories = product_service::list_categories(&state)
        .await?
        .data
        .expect("categories");
    assert_eq!(categories.items.len(), 1);
    assert_eq!(categories.items[0].name, "Kitchen");
    Ok(())
}
