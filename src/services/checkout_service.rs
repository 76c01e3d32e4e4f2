use chrono::Utc;
use rand::RngCore;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::checkout::{CheckoutData, CheckoutRequest},
    entity::{
        order_items::ActiveModel as OrderItemActive,
        orders::{ActiveModel as OrderActive, Entity as Orders},
        users::Entity as Users,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentStatus},
    payment::PaymentMetadata,
    pricing,
    response::{ApiResponse, Meta},
    state::AppState,
};

pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<CheckoutData>> {
    validate_request(&payload)?;

    let owner = Users::find_by_id(user.user_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::OwnerNotFound)?;

    let priced =
        pricing::validate_and_price(&state.orm, &payload.items, &payload.shipping_address.state)
            .await?;

    let order_code = generate_order_code();
    let payment_reference = generate_payment_reference();

    let mut address = payload.shipping_address.clone();
    address.delivery_fee = Some(priced.delivery_fee);
    let address_json =
        serde_json::to_string(&address).map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;

    let txn = state.orm.begin().await?;

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        order_code: Set(order_code.clone()),
        user_id: Set(user.user_id),
        subtotal: Set(priced.subtotal),
        tax: Set(priced.tax),
        delivery_fee: Set(priced.delivery_fee),
        total_amount: Set(priced.total),
        payment_reference: Set(payment_reference.clone()),
        payment_status: Set(PaymentStatus::Pending.as_str().to_string()),
        status: Set(OrderStatus::Pending.as_str().to_string()),
        shipping_address: Set(address_json),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    for item in &priced.items {
        OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_code: Set(item.product.product_code.clone()),
            size_code: Set(item.size_code.clone()),
            quantity: Set(item.quantity),
            price: Set(item.unit_price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
    }

    txn.commit().await?;

    let metadata = PaymentMetadata {
        order_code: order_code.clone(),
        customer_name: owner.name.clone(),
        items_count: priced.items.len(),
    };

    // The provider bills in minor units.
    let initialized = match state
        .gateway
        .initialize(priced.total * 100, &owner.email, &payment_reference, &metadata)
        .await
    {
        Ok(initialized) => initialized,
        Err(err) => {
            // No order may outlive a failed payment session.
            if let Err(delete_err) = Orders::delete_by_id(order.id).exec(&state.orm).await {
                tracing::error!(
                    order_code = %order_code,
                    error = %delete_err,
                    "failed to roll back order after payment initialization error"
                );
            }
            return Err(err);
        }
    };

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({
            "order_code": order_code,
            "reference": payment_reference,
            "total_amount": priced.total,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order created successfully",
        CheckoutData {
            order_code,
            payment_reference,
            authorization_url: initialized.authorization_url,
            access_code: initialized.access_code,
            subtotal: priced.subtotal,
            tax: priced.tax,
            delivery_fee: priced.delivery_fee,
            total_amount: priced.total,
        },
        Some(Meta::empty()),
    ))
}

fn validate_request(payload: &CheckoutRequest) -> AppResult<()> {
    if payload.payment_method != "paystack" {
        return Err(AppError::BadRequest(
            "Invalid payment method. Only paystack is supported".to_string(),
        ));
    }

    let addr = &payload.shipping_address;
    for (field, value) in [
        ("name", &addr.name),
        ("phone", &addr.phone),
        ("address", &addr.address),
        ("city", &addr.city),
        ("state", &addr.state),
        ("country", &addr.country),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::BadRequest(format!("Shipping {field} is required")));
        }
    }

    Ok(())
}

fn generate_order_code() -> String {
    format!("ORD-{}-{}", base36_millis(), random_hex(4)).to_uppercase()
}

fn generate_payment_reference() -> String {
    format!("PMF-{}-{}", base36_millis(), random_hex(6)).to_uppercase()
}

fn base36_millis() -> String {
    let mut n = Utc::now().timestamp_millis() as u64;
    let mut out = String::new();
    while n > 0 {
        let digit = (n % 36) as u32;
        out.insert(0, char::from_digit(digit, 36).unwrap_or('0'));
        n /= 36;
    }
    if out.is_empty() {
        out.push('0');
    }
    out
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
