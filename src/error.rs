use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::response::{ApiResponse, Meta};

/// Broad classes callers can act on, independent of the concrete failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    PreconditionFailed,
    Unauthorized,
    Forbidden,
    Transient,
    Internal,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Category {0} not found")]
    CategoryNotFound(Uuid),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Line item {0} not found")]
    LineItemNotFound(Uuid),

    #[error("Product {0} is already in the cart")]
    AlreadyInCart(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("The cart is empty")]
    EmptyCart,

    #[error("No active cart")]
    NoActiveCart,

    #[error("Product {0} is not in the cart")]
    NotInCart(Uuid),

    #[error("Invalid quantity {0}")]
    InvalidQuantity(i32),

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Storage is busy, gave up after {attempts} attempts")]
    Transient { attempts: u32 },

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ProductNotFound(_)
            | AppError::CategoryNotFound(_)
            | AppError::OrderNotFound(_)
            | AppError::LineItemNotFound(_) => ErrorKind::NotFound,
            AppError::AlreadyInCart(_) | AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::InsufficientStock { .. }
            | AppError::EmptyCart
            | AppError::NoActiveCart
            | AppError::NotInCart(_)
            | AppError::InvalidQuantity(_)
            | AppError::BadRequest(_) => ErrorKind::PreconditionFailed,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::Forbidden => ErrorKind::Forbidden,
            AppError::Transient { .. } => ErrorKind::Transient,
            AppError::OrmError(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PreconditionFailed => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AppError::OrmError(err) => tracing::error!(error = %err, "orm error"),
            AppError::Internal(err) => tracing::error!(error = %err, "internal error"),
            _ => {}
        }

        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                error: self.to_string(),
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
