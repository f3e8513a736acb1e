use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{AddToCartRequest, CartItemDto, CartView, UpdateCartRequest},
        orders::{OrderList, OrderWithItems},
        products::{
            CategoryList, CreateCategoryRequest, CreateProductRequest, ProductList,
            UpdateCategoryRequest, UpdateProductRequest,
        },
    },
    entity::{
        carts::CartStatus, categories::CategoryStatus, products::ProductStatus,
        products_in_cart::LineItemStatus,
    },
    models::{Cart, Category, LineItem, Order, OrderItem, Product},
    response::{ApiResponse, Meta},
    routes::{cart, health, orders, params, products as product_routes},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        product_routes::list_products,
        product_routes::list_my_products,
        product_routes::create_product,
        product_routes::get_product,
        product_routes::update_product,
        product_routes::delete_product,
        product_routes::list_categories,
        product_routes::create_category,
        product_routes::update_category,
        cart::view_cart,
        cart::add_product,
        cart::update_cart,
        cart::remove_product,
        cart::purchase,
        orders::list_orders,
        orders::get_order
    ),
    components(
        schemas(
            Product,
            Category,
            Cart,
            LineItem,
            Order,
            OrderItem,
            ProductStatus,
            CategoryStatus,
            CartStatus,
            LineItemStatus,
            AddToCartRequest,
            UpdateCartRequest,
            CartView,
            CartItemDto,
            CreateProductRequest,
            UpdateProductRequest,
            CreateCategoryRequest,
            UpdateCategoryRequest,
            ProductList,
            CategoryList,
            OrderList,
            OrderWithItems,
            params::Pagination,
            params::SortOrder,
            params::ProductSortBy,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartView>,
            ApiResponse<LineItem>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Cart", description = "Cart and purchase endpoints"),
        (name = "Orders", description = "Order history endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
