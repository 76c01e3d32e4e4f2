use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, TransactionTrait};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::PaymentVerification,
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{Column as OrderItemCol, Entity as OrderItems, Model as OrderItemModel},
        orders::{Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products},
        users::Entity as Users,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentStatus},
    notify::{ConfirmationItem, OrderConfirmation},
    payment::{self, VerifyOutcome},
    response::{ApiResponse, Meta},
    services::order_service::{load_items, order_from_entity},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub reference: Option<String>,
}

/// Client-side completion channel: the browser returned from the provider
/// and asks for the order to be settled. Authorized by the session owner.
pub async fn verify_by_client(
    state: &AppState,
    reference: &str,
    user: &AuthUser,
) -> AppResult<ApiResponse<PaymentVerification>> {
    reconcile(state, reference, Some(user.user_id)).await
}

/// Server-side completion channel: the provider pushed an event. Authorized
/// by the payload signature alone; a mismatch is rejected before any order
/// lookup or gateway call.
pub async fn verify_by_webhook(
    state: &AppState,
    raw_body: &[u8],
    signature: &str,
) -> AppResult<ApiResponse<serde_json::Value>> {
    if let Err(err) =
        payment::verify_webhook_signature(&state.config.payment_secret_key, raw_body, signature)
    {
        tracing::warn!("webhook rejected: signature mismatch");
        if let Err(audit_err) = log_audit(
            &state.pool,
            None,
            "webhook_signature_rejected",
            Some("orders"),
            None,
        )
        .await
        {
            tracing::warn!(error = %audit_err, "audit log failed");
        }
        return Err(err);
    }

    let payload: WebhookPayload = serde_json::from_slice(raw_body)
        .map_err(|err| AppError::BadRequest(format!("Invalid webhook payload: {err}")))?;

    match payload.event.as_str() {
        "charge.success" => {
            let reference = payload
                .data
                .and_then(|data| data.reference)
                .ok_or_else(|| AppError::BadRequest("Webhook payload missing reference".into()))?;

            reconcile(state, &reference, None).await?;

            Ok(ApiResponse::success(
                "Webhook processed successfully",
                serde_json::json!({}),
                Some(Meta::empty()),
            ))
        }
        other => {
            tracing::debug!(event = other, "unhandled webhook event acknowledged");
            Ok(ApiResponse::success(
                "Event not handled",
                serde_json::json!({}),
                Some(Meta::empty()),
            ))
        }
    }
}

/// Shared reconciliation routine behind both channels. Either converges the
/// order to a terminal state or leaves it pending for a later retry; the paid
/// side effects are applied at most once.
async fn reconcile(
    state: &AppState,
    reference: &str,
    owner: Option<Uuid>,
) -> AppResult<ApiResponse<PaymentVerification>> {
    let order = find_order(state, reference, owner).await?;

    // Duplicate completion signal: webhook retries and callback refreshes
    // both land here. Return the committed state, touch nothing.
    if order.payment_status == PaymentStatus::Paid.as_str() {
        return order_response(state, order).await;
    }

    // Gateway I/O happens outside any database transaction; only the final
    // commit takes one.
    let outcome = state.gateway.verify(reference).await?;

    match outcome {
        VerifyOutcome::AmbiguousTimeout => {
            // The charge may have settled server-side. The order stays
            // pending so either channel can retry.
            tracing::warn!(reference, "payment verification inconclusive, order left pending");
            Err(AppError::VerificationUnavailable)
        }
        VerifyOutcome::Pending => mark_failed(state, &order, "Payment not completed").await,
        VerifyOutcome::Failed { reason } => mark_failed(state, &order, &reason).await,
        VerifyOutcome::Success { .. } => settle(state, order).await,
    }
}

async fn settle(
    state: &AppState,
    order: OrderModel,
) -> AppResult<ApiResponse<PaymentVerification>> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?;

    let txn = state.orm.begin().await?;

    // Only one caller may move the order out of pending. Zero rows affected
    // means the other channel already applied the side effects.
    let transitioned = Orders::update_many()
        .col_expr(
            OrderCol::PaymentStatus,
            Expr::value(PaymentStatus::Paid.as_str()),
        )
        .col_expr(OrderCol::Status, Expr::value(OrderStatus::Processing.as_str()))
        .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now()))
        .filter(OrderCol::Id.eq(order.id))
        .filter(OrderCol::PaymentStatus.eq(PaymentStatus::Pending.as_str()))
        .exec(&txn)
        .await?;

    if transitioned.rows_affected == 0 {
        txn.rollback().await?;
        let current = find_order(state, &order.payment_reference, None).await?;
        return order_response(state, current).await;
    }

    for item in &items {
        // Guarded decrement keeps inventory non-negative; a miss aborts the
        // whole transaction and the order remains pending for a later retry.
        let updated = Products::update_many()
            .col_expr(
                ProdCol::Instock,
                Expr::col(ProdCol::Instock).sub(item.quantity),
            )
            .filter(ProdCol::ProductCode.eq(item.product_code.as_str()))
            .filter(ProdCol::Instock.gte(item.quantity))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            txn.rollback().await?;
            tracing::error!(
                order_code = %order.order_code,
                product_code = %item.product_code,
                "stock decrement conflict, settlement aborted"
            );
            return Err(AppError::StockConflict);
        }
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(order.user_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    // Post-commit only. A dispatch failure never unwinds the settlement.
    notify_owner(state, &order, &items).await;

    if let Err(err) = log_audit(
        &state.pool,
        Some(order.user_id),
        "payment_confirmed",
        Some("orders"),
        Some(serde_json::json!({
            "order_code": order.order_code,
            "reference": order.payment_reference,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let current = find_order(state, &order.payment_reference, None).await?;
    order_response(state, current).await
}

async fn mark_failed(
    state: &AppState,
    order: &OrderModel,
    reason: &str,
) -> AppResult<ApiResponse<PaymentVerification>> {
    // Never demotes a paid order; failed-on-failed is a no-op.
    Orders::update_many()
        .col_expr(
            OrderCol::PaymentStatus,
            Expr::value(PaymentStatus::Failed.as_str()),
        )
        .col_expr(OrderCol::Status, Expr::value(OrderStatus::Cancelled.as_str()))
        .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now()))
        .filter(OrderCol::Id.eq(order.id))
        .filter(OrderCol::PaymentStatus.ne(PaymentStatus::Paid.as_str()))
        .exec(&state.orm)
        .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(order.user_id),
        "payment_failed",
        Some("orders"),
        Some(serde_json::json!({
            "order_code": order.order_code,
            "reason": reason,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let current = find_order(state, &order.payment_reference, None).await?;
    order_response(state, current).await
}

async fn find_order(
    state: &AppState,
    reference: &str,
    owner: Option<Uuid>,
) -> AppResult<OrderModel> {
    let mut condition = Condition::all().add(OrderCol::PaymentReference.eq(reference));
    if let Some(owner) = owner {
        condition = condition.add(OrderCol::UserId.eq(owner));
    }
    Orders::find()
        .filter(condition)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)
}

async fn order_response(
    state: &AppState,
    model: OrderModel,
) -> AppResult<ApiResponse<PaymentVerification>> {
    let items = load_items(&state.orm, model.id).await?;
    let order = order_from_entity(model)?;
    let paid = order.payment_status == PaymentStatus::Paid;
    let message = if paid {
        "Payment verified successfully"
    } else if order.payment_status == PaymentStatus::Failed {
        "Payment verification failed or payment not successful"
    } else {
        "Payment pending"
    };

    Ok(ApiResponse::success(
        message,
        PaymentVerification { paid, order, items },
        Some(Meta::empty()),
    ))
}

async fn notify_owner(state: &AppState, order: &OrderModel, items: &[OrderItemModel]) {
    let owner = match Users::find_by_id(order.user_id).one(&state.orm).await {
        Ok(Some(owner)) => owner,
        Ok(None) => {
            tracing::warn!(order_code = %order.order_code, "owner missing, confirmation skipped");
            return;
        }
        Err(err) => {
            tracing::warn!(error = %err, "owner lookup failed, confirmation skipped");
            return;
        }
    };

    let shipping_address = match serde_json::from_str(&order.shipping_address) {
        Ok(address) => address,
        Err(err) => {
            tracing::warn!(error = %err, "stored shipping address unreadable, confirmation skipped");
            return;
        }
    };

    let confirmation = OrderConfirmation {
        email: owner.email,
        name: owner.name,
        order_code: order.order_code.clone(),
        order_date: order.created_at.with_timezone(&Utc),
        items: items
            .iter()
            .map(|item| ConfirmationItem {
                product_code: item.product_code.clone(),
                size_code: item.size_code.clone(),
                quantity: item.quantity,
                price: item.price,
            })
            .collect(),
        total_amount: order.total_amount,
        shipping_address,
    };

    state.notifier.enqueue_order_confirmation(confirmation);
}
