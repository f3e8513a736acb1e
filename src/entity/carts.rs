use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "purchased")]
    Purchased,
}

impl CartStatus {
    /// A cart only ever moves from active to purchased.
    pub fn can_transition_to(self, next: CartStatus) -> bool {
        match (self, next) {
            (CartStatus::Active, CartStatus::Purchased) => true,
            (CartStatus::Active, CartStatus::Active) => false,
            (CartStatus::Purchased, _) => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "carts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: CartStatus,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::products_in_cart::Entity")]
    ProductsInCart,
    #[sea_orm(has_one = "super::orders::Entity")]
    Orders,
}

impl Related<super::products_in_cart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductsInCart.def()
    }
}

impl Related<super::orders::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
