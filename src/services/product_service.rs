use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::products::{
        CategoryList, CreateCategoryRequest, CreateProductRequest, ProductList,
        UpdateCategoryRequest, UpdateProductRequest,
    },
    entity::{
        categories::{
            ActiveModel as CategoryActive, CategoryStatus, Column as CategoryCol,
            Entity as Categories, Model as CategoryModel,
        },
        products::{ActiveModel, Column, Entity as Products, Model as ProductModel, ProductStatus},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Category, Product},
    response::{ApiResponse, Meta},
    routes::params::{Pagination, ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

const MAX_PRICE_EXCLUSIVE: i64 = 10_000_000_000;

/// Look up a product that can still be put in a cart.
pub async fn find_available<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> AppResult<ProductModel> {
    Products::find_by_id(product_id)
        .filter(Column::Status.eq(ProductStatus::Active))
        .one(conn)
        .await?
        .ok_or(AppError::ProductNotFound(product_id))
}

/// Advisory check done before a cart mutation; purchase re-checks atomically.
pub fn ensure_stock(product: &ProductModel, requested: i32) -> AppResult<()> {
    if requested > product.quantity {
        return Err(AppError::InsufficientStock {
            product_id: product.id,
            requested,
            available: product.quantity,
        });
    }
    Ok(())
}

/// Take `quantity` units out of stock.
///
/// The sufficiency check and the subtraction are a single conditional UPDATE,
/// so concurrent decrements of the same row serialize on the row lock and the
/// stock can never drop below zero. Returns the product as it reads after the
/// decrement; inside a transaction that row stays locked until commit.
pub async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<ProductModel> {
    if quantity <= 0 {
        return Err(AppError::InvalidQuantity(quantity));
    }

    let result = Products::update_many()
        .col_expr(Column::Quantity, Expr::col(Column::Quantity).sub(quantity))
        .filter(Column::Id.eq(product_id))
        .filter(Column::Status.eq(ProductStatus::Active))
        .filter(Column::Quantity.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let product = find_available(conn, product_id).await?;
        return Err(AppError::InsufficientStock {
            product_id,
            requested: quantity,
            available: product.quantity,
        });
    }

    find_available(conn, product_id).await
}

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(Column::Status.eq(ProductStatus::Active));

    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(
            Condition::any()
                .add(Column::Title.contains(search.as_str()))
                .add(Column::Description.contains(search.as_str())),
        );
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    if let Some(category_id) = query.category_id {
        condition = condition.add(Column::CategoryId.eq(category_id));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Title => Column::Title,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Products", ProductList { items }, Some(meta)))
}

/// Products owned by the caller, including inactive ones.
pub async fn list_user_products(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = pagination.normalize();
    let finder = Products::find()
        .filter(Column::UserId.eq(user.user_id))
        .order_by_desc(Column::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Products", ProductList { items }, Some(meta)))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let product = find_available(&state.orm, id).await?;
    Ok(ApiResponse::success("Product", product.into(), None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    validate_listing(Some(&payload.title), Some(payload.quantity), Some(payload.price))?;
    if let Some(category_id) = payload.category_id {
        find_active_category(&state.orm, category_id).await?;
    }

    let product = ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(payload.title),
        description: Set(payload.description),
        quantity: Set(payload.quantity),
        price: Set(payload.price),
        user_id: Set(user.user_id),
        category_id: Set(payload.category_id),
        status: Set(ProductStatus::Active),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        &state.orm,
        user.user_id,
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        product.into(),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    validate_listing(payload.title.as_deref(), payload.quantity, payload.price)?;
    let existing = find_owned(&state.orm, user, id).await?;

    let mut active: ActiveModel = existing.into();
    if let Some(title) = payload.title {
        active.title = Set(title);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(quantity) = payload.quantity {
        active.quantity = Set(quantity);
    }

    let product = active.update(&state.orm).await?;

    audit::record(
        &state.orm,
        user.user_id,
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        product.into(),
        Some(Meta::empty()),
    ))
}

/// Soft delete: the listing becomes `inactive` for good.
pub async fn deactivate_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let existing = find_owned(&state.orm, user, id).await?;

    let mut active: ActiveModel = existing.into();
    active.status = Set(ProductStatus::Inactive);
    active.update(&state.orm).await?;

    audit::record(
        &state.orm,
        user.user_id,
        "product_deactivate",
        "products",
        serde_json::json!({ "product_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn create_category(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be empty".to_string()));
    }

    let category = CategoryActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        status: Set(CategoryStatus::Active),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        &state.orm,
        user.user_id,
        "category_create",
        "categories",
        serde_json::json!({ "category_id": category.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Category created",
        category.into(),
        Some(Meta::empty()),
    ))
}

/// Rename an active category.
pub async fn update_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be empty".to_string()));
    }

    let existing = find_active_category(&state.orm, id).await?;
    let mut active: CategoryActive = existing.into();
    active.name = Set(name.to_string());
    let category = active.update(&state.orm).await?;

    audit::record(
        &state.orm,
        user.user_id,
        "category_update",
        "categories",
        serde_json::json!({ "category_id": category.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Category updated",
        category.into(),
        Some(Meta::empty()),
    ))
}

pub async fn list_categories(state: &AppState) -> AppResult<ApiResponse<CategoryList>> {
    let items: Vec<Category> = Categories::find()
        .filter(CategoryCol::Status.eq(CategoryStatus::Active))
        .order_by_asc(CategoryCol::Name)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Category::from)
        .collect();

    let meta = Meta::single_page(items.len());
    Ok(ApiResponse::success("Categories", CategoryList { items }, Some(meta)))
}

async fn find_active_category<C: ConnectionTrait>(conn: &C, id: Uuid) -> AppResult<CategoryModel> {
    Categories::find_by_id(id)
        .filter(CategoryCol::Status.eq(CategoryStatus::Active))
        .one(conn)
        .await?
        .ok_or(AppError::CategoryNotFound(id))
}

async fn find_owned<C: ConnectionTrait>(
    conn: &C,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ProductModel> {
    let product = find_available(conn, id).await?;
    if product.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }
    Ok(product)
}

fn validate_listing(
    title: Option<&str>,
    quantity: Option<i32>,
    price: Option<Decimal>,
) -> AppResult<()> {
    if title.is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::BadRequest("title must not be empty".to_string()));
    }
    if let Some(quantity) = quantity.filter(|q| *q < 0) {
        return Err(AppError::InvalidQuantity(quantity));
    }
    if let Some(price) = price {
        if price.is_sign_negative() {
            return Err(AppError::BadRequest("price must not be negative".to_string()));
        }
        // Must fit the `decimal(12, 2)` price column.
        if price >= Decimal::from(MAX_PRICE_EXCLUSIVE) || price.normalize().scale() > 2 {
            return Err(AppError::BadRequest(format!(
                "price must be below {MAX_PRICE_EXCLUSIVE} with at most 2 decimal places"
            )));
        }
    }
    Ok(())
}
