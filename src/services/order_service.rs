use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{OrderList, OrderWithItems, UpdateOrderStatusRequest},
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems, Model as OrderItemModel},
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus, PaymentStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    order_code: &str,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_by_code(&state.orm, order_code, user.user_id).await?;

    let items = load_items(&state.orm, order.id).await?;
    let order = order_from_entity(order)?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn advance_status(
    state: &AppState,
    user: &AuthUser,
    order_code: &str,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let new_status: OrderStatus = payload.status.parse().map_err(AppError::BadRequest)?;
    if new_status == OrderStatus::Pending {
        return Err(AppError::BadRequest(
            "Order cannot move back to pending".to_string(),
        ));
    }

    let order = find_by_code(&state.orm, order_code, user.user_id).await?;

    // Fulfilment status only moves once money has been confirmed.
    if order.payment_status != PaymentStatus::Paid.as_str() {
        return Err(AppError::PaymentNotConfirmed);
    }

    let mut active: OrderActive = order.into();
    active.status = Set(new_status.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_status_updated",
        Some("orders"),
        Some(serde_json::json!({ "order_code": order_code, "status": new_status.as_str() })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let items = load_items(&state.orm, order.id).await?;
    let order = order_from_entity(order)?;

    Ok(ApiResponse::success(
        "Order status updated successfully",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    order_code: &str,
) -> AppResult<ApiResponse<Order>> {
    let order = find_by_code(&state.orm, order_code, user.user_id).await?;

    if order.payment_status == PaymentStatus::Paid.as_str() {
        return Err(AppError::CannotCancelPaidOrder);
    }

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_cancelled",
        Some("orders"),
        Some(serde_json::json!({ "order_code": order_code })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order cancelled successfully",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}

async fn find_by_code<C: ConnectionTrait>(
    conn: &C,
    order_code: &str,
    user_id: Uuid,
) -> AppResult<OrderModel> {
    Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::OrderCode.eq(order_code))
                .add(OrderCol::UserId.eq(user_id)),
        )
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<Vec<OrderItem>> {
    Ok(OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(conn)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect())
}

pub(crate) fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let payment_status = model
        .payment_status
        .parse::<PaymentStatus>()
        .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;
    let status = model
        .status
        .parse::<OrderStatus>()
        .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;
    let shipping_address = serde_json::from_str(&model.shipping_address)
        .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;

    Ok(Order {
        id: model.id,
        order_code: model.order_code,
        user_id: model.user_id,
        subtotal: model.subtotal,
        tax: model.tax,
        delivery_fee: model.delivery_fee,
        total_amount: model.total_amount,
        payment_reference: model.payment_reference,
        payment_status,
        status,
        shipping_address,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

pub(crate) fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_code: model.product_code,
        size_code: model.size_code,
        quantity: model.quantity,
        price: model.price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
