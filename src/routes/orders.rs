use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};

use crate::{
    dto::orders::{OrderList, OrderWithItems, UpdateOrderStatusRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Order,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::order_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_orders)).route(
        "/{order_code}",
        get(get_order).patch(advance_status).delete(cancel_order),
    )
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by order status"),
    ),
    responses(
        (status = 200, description = "List orders for current user", body = ApiResponse<OrderList>),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let response = order_service::list_orders(&state, &user, query).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/orders/{order_code}",
    params(("order_code" = String, Path, description = "Order code")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_code): Path<String>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let response = order_service::get_order(&state, &user, &order_code).await?;
    Ok(Json(response))
}

#[utoipa::path(
    patch,
    path = "/api/orders/{order_code}",
    params(("order_code" = String, Path, description = "Order code")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order status updated", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Payment not confirmed or invalid status"),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn advance_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_code): Path<String>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let response = order_service::advance_status(&state, &user, &order_code, payload).await?;
    Ok(Json(response))
}

#[utoipa::path(
    delete,
    path = "/api/orders/{order_code}",
    params(("order_code" = String, Path, description = "Order code")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<Order>),
        (status = 400, description = "Paid orders cannot be cancelled"),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_code): Path<String>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let response = order_service::cancel_order(&state, &user, &order_code).await?;
    Ok(Json(response))
}
