use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Order, OrderItem};

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

/// Final order state reported by either verification channel. `paid` is false
/// when the provider confirmed a non-success outcome; that is a normal
/// terminal state, not an error.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentVerification {
    pub paid: bool,
    pub order: Order,
    pub items: Vec<OrderItem>,
}
