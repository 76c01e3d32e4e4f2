use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::response::{ApiResponse, Meta};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product {0} not found")]
    ProductNotFound(String),

    #[error("Insufficient stock for {name}. Available: {available}, Requested: {requested}")]
    InsufficientStock {
        name: String,
        available: i32,
        requested: i32,
    },

    #[error("Invalid size for {0}")]
    InvalidSize(String),

    #[error("User not found")]
    OwnerNotFound,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Cannot update order status. Payment not completed")]
    PaymentNotConfirmed,

    #[error("Cannot cancel paid orders. Please contact support")]
    CannotCancelPaidOrder,

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Could not confirm payment status. Try again later")]
    VerificationUnavailable,

    #[error("Stock update conflict. Try again later")]
    StockConflict,

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_)
            | AppError::EmptyCart
            | AppError::ProductNotFound(_)
            | AppError::InsufficientStock { .. }
            | AppError::InvalidSize(_)
            | AppError::OwnerNotFound
            | AppError::InvalidSignature
            | AppError::PaymentNotConfirmed
            | AppError::CannotCancelPaidOrder => StatusCode::BAD_REQUEST,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::VerificationUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::StockConflict
            | AppError::DbError(_)
            | AppError::OrmError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = self.to_string();
        let body = ApiResponse {
            message,
            data: Some(ErrorData {
                error: self.to_string(),
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
