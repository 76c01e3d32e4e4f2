use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::checkout::{CheckoutData, CheckoutRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::checkout_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(checkout))
}

#[utoipa::path(
    post,
    path = "/api/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created and payment session opened", body = ApiResponse<CheckoutData>),
        (status = 400, description = "Validation failure"),
        (status = 502, description = "Payment provider rejected the session"),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<ApiResponse<CheckoutData>>> {
    let response = checkout_service::checkout(&state, &user, payload).await?;
    Ok(Json(response))
}
