use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

use crate::{
    dto::checkout::CheckoutItem,
    entity::{
        product_sizes::{Column as SizeCol, Entity as ProductSizes},
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
};

pub const LOCAL_STATE: &str = "lagos";
pub const LOCAL_DELIVERY_FEE: i64 = 6_000;
pub const OTHER_STATES_DELIVERY_FEE: i64 = 8_000;
pub const FREE_SHIPPING_THRESHOLD: i64 = 60_000;

/// VAT rate, expressed per mille so money stays in integers.
pub const TAX_RATE_PER_MILLE: i64 = 75;

#[derive(Debug)]
pub struct ValidatedItem {
    pub product: ProductModel,
    pub quantity: i32,
    pub size_code: Option<String>,
    pub unit_price: i64,
    pub line_total: i64,
}

#[derive(Debug)]
pub struct PricedCart {
    pub subtotal: i64,
    pub tax: i64,
    pub delivery_fee: i64,
    pub total: i64,
    pub items: Vec<ValidatedItem>,
}

/// VAT on a subtotal, rounded half-up to the nearest whole currency unit.
pub fn tax_amount(subtotal: i64) -> i64 {
    (subtotal * TAX_RATE_PER_MILLE + 500) / 1_000
}

pub fn delivery_fee(state: &str, subtotal: i64) -> i64 {
    if subtotal >= FREE_SHIPPING_THRESHOLD {
        return 0;
    }
    if state.eq_ignore_ascii_case(LOCAL_STATE) {
        LOCAL_DELIVERY_FEE
    } else {
        OTHER_STATES_DELIVERY_FEE
    }
}

/// Validate every line against the current catalog and price the cart.
/// Read-only: performs no writes and is safe to retry.
pub async fn validate_and_price<C: ConnectionTrait>(
    conn: &C,
    items: &[CheckoutItem],
    shipping_state: &str,
) -> AppResult<PricedCart> {
    if items.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let mut validated = Vec::with_capacity(items.len());
    let mut subtotal: i64 = 0;

    for item in items {
        if item.quantity < 1 {
            return Err(AppError::BadRequest(
                "Item quantity must be at least 1".to_string(),
            ));
        }

        let product = Products::find()
            .filter(ProdCol::ProductCode.eq(item.product_code.as_str()))
            .one(conn)
            .await?
            .ok_or_else(|| AppError::ProductNotFound(item.product_code.clone()))?;

        if product.instock < item.quantity {
            return Err(AppError::InsufficientStock {
                name: product.name.clone(),
                available: product.instock,
                requested: item.quantity,
            });
        }

        if let Some(size_code) = item.size_code.as_deref() {
            let size = ProductSizes::find()
                .filter(SizeCol::ProductId.eq(product.id))
                .filter(SizeCol::SizeCode.eq(size_code))
                .one(conn)
                .await?;
            if size.is_none() {
                return Err(AppError::InvalidSize(product.name.clone()));
            }
        }

        let line_total = product.price * i64::from(item.quantity);
        subtotal += line_total;

        validated.push(ValidatedItem {
            quantity: item.quantity,
            size_code: item.size_code.clone(),
            unit_price: product.price,
            line_total,
            product,
        });
    }

    let tax = tax_amount(subtotal);
    let delivery_fee = delivery_fee(shipping_state, subtotal);

    Ok(PricedCart {
        subtotal,
        tax,
        delivery_fee,
        total: subtotal + tax + delivery_fee,
        items: validated,
    })
}
