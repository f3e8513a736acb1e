pub mod audit_logs;
pub mod carts;
pub mod categories;
pub mod orders;
pub mod products;
pub mod products_in_cart;

pub use audit_logs::Entity as AuditLogs;
pub use carts::Entity as Carts;
pub use categories::Entity as Categories;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
pub use products_in_cart::Entity as ProductsInCart;
