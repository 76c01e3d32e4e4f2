use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
};

use crate::{
    dto::orders::PaymentVerification,
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::reconcile_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/verify/{reference}", get(verify_payment))
        .route("/webhook", post(webhook))
}

#[utoipa::path(
    get,
    path = "/api/payment/verify/{reference}",
    params(("reference" = String, Path, description = "Payment reference")),
    responses(
        (status = 200, description = "Final order state; safe to call repeatedly", body = ApiResponse<PaymentVerification>),
        (status = 404, description = "Order not found"),
        (status = 503, description = "Provider unreachable, retry later"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payment"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reference): Path<String>,
) -> AppResult<Json<ApiResponse<PaymentVerification>>> {
    let response = reconcile_service::verify_by_client(&state, &reference, &user).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/payment/webhook",
    request_body(content = String, description = "Raw webhook payload"),
    responses(
        (status = 200, description = "Webhook acknowledged", body = ApiResponse<serde_json::Value>),
        (status = 400, description = "Missing or invalid signature"),
    ),
    tag = "Payment"
)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let signature = headers
        .get("x-paystack-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing signature".into()))?;

    let response = reconcile_service::verify_by_webhook(&state, &body, signature).await?;
    Ok(Json(response))
}
