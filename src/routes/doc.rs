use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        checkout::{CheckoutData, CheckoutItem, CheckoutRequest},
        orders::{OrderList, OrderWithItems, PaymentVerification, UpdateOrderStatusRequest},
    },
    models::{Order, OrderItem, OrderStatus, PaymentStatus, ShippingAddress},
    response::{ApiResponse, Meta},
    routes::{checkout, health, orders, params, payment},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        checkout::checkout,
        orders::list_orders,
        orders::get_order,
        orders::advance_status,
        orders::cancel_order,
        payment::verify_payment,
        payment::webhook,
    ),
    components(
        schemas(
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            ShippingAddress,
            CheckoutRequest,
            CheckoutItem,
            CheckoutData,
            OrderList,
            OrderWithItems,
            UpdateOrderStatusRequest,
            PaymentVerification,
            params::Pagination,
            params::OrderListQuery,
            Meta,
            ApiResponse<CheckoutData>,
            ApiResponse<OrderList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<PaymentVerification>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Checkout", description = "Checkout and order creation"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Payment", description = "Payment verification and webhooks"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
