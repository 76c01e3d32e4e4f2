use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::ShippingAddress;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutItem {
    pub product_code: String,
    pub quantity: i32,
    pub size_code: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutData {
    pub order_code: String,
    pub payment_reference: String,
    pub authorization_url: String,
    pub access_code: String,
    pub subtotal: i64,
    pub tax: i64,
    pub delivery_fee: i64,
    pub total_amount: i64,
}
