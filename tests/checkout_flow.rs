use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use sha2::Sha512;
use uuid::Uuid;

use axum_checkout_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        checkout::{CheckoutItem, CheckoutRequest},
        orders::UpdateOrderStatusRequest,
    },
    entity::{
        cart_items::{ActiveModel as CartItemActive, Column as CartCol, Entity as CartItems},
        orders::{Column as OrderCol, Entity as Orders},
        product_sizes::ActiveModel as ProductSizeActive,
        products::{ActiveModel as ProductActive, Entity as Products},
        users::ActiveModel as UserActive,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentStatus, ShippingAddress},
    notify::{NotificationDispatcher, OrderConfirmation},
    payment::{InitializedPayment, PaymentGateway, PaymentMetadata, VerifyOutcome},
    services::{checkout_service, order_service, reconcile_service},
    state::AppState,
};

const WEBHOOK_SECRET: &str = "sk_test_webhook_secret";

// Concurrent CREATE TABLE IF NOT EXISTS can race in Postgres, so the schema
// is applied once per test process.
static MIGRATIONS: tokio::sync::OnceCell<()> = tokio::sync::OnceCell::const_new();

// Gateway double: scripted outcome plus call counters, so tests can assert
// how often the provider was actually hit.
struct StubGateway {
    fail_initialize: bool,
    outcome: VerifyOutcome,
    initialize_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    last_initialize_amount: Mutex<Option<i64>>,
}

impl StubGateway {
    fn with_outcome(outcome: VerifyOutcome) -> Arc<Self> {
        Arc::new(Self {
            fail_initialize: false,
            outcome,
            initialize_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            last_initialize_amount: Mutex::new(None),
        })
    }

    fn succeeding() -> Arc<Self> {
        Self::with_outcome(VerifyOutcome::Success {
            amount_minor: 0,
            raw_status: "success".to_string(),
        })
    }

    fn failing_initialize() -> Arc<Self> {
        Arc::new(Self {
            fail_initialize: true,
            outcome: VerifyOutcome::Pending,
            initialize_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            last_initialize_amount: Mutex::new(None),
        })
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn initialize(
        &self,
        amount_minor: i64,
        _email: &str,
        reference: &str,
        _metadata: &PaymentMetadata,
    ) -> AppResult<InitializedPayment> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_initialize_amount.lock().unwrap() = Some(amount_minor);
        if self.fail_initialize {
            return Err(AppError::Gateway("Declined by provider".to_string()));
        }
        Ok(InitializedPayment {
            authorization_url: format!("https://pay.example/{reference}"),
            access_code: "ACCESS".to_string(),
        })
    }

    async fn verify(&self, _reference: &str) -> AppResult<VerifyOutcome> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<OrderConfirmation>>,
}

impl RecordingNotifier {
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl NotificationDispatcher for RecordingNotifier {
    fn enqueue_order_confirmation(&self, confirmation: OrderConfirmation) {
        self.sent.lock().unwrap().push(confirmation);
    }
}

// Allow skipping when no DB is configured in the environment.
async fn setup_state(
    gateway: Arc<StubGateway>,
    notifier: Arc<RecordingNotifier>,
) -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
    MIGRATIONS
        .get_or_try_init(|| run_migrations(&orm))
        .await?;

    let config = AppConfig {
        database_url,
        host: "127.0.0.1".to_string(),
        port: 0,
        payment_secret_key: WEBHOOK_SECRET.to_string(),
        payment_base_url: "http://localhost:0".to_string(),
        app_url: "http://localhost:0".to_string(),
    };

    Ok(Some(AppState {
        pool,
        orm,
        gateway: gateway as Arc<dyn PaymentGateway>,
        notifier: notifier as Arc<dyn NotificationDispatcher>,
        config,
    }))
}

// Rows are namespaced per test with random codes and emails, so tests can
// run concurrently against one database without truncating.
async fn create_user(state: &AppState) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(format!("{}@example.com", Uuid::new_v4())),
        name: Set("Test Shopper".to_string()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(user.id)
}

async fn create_product(state: &AppState, price: i64, instock: i32) -> anyhow::Result<(Uuid, String)> {
    let code = format!("SKU-{}", Uuid::new_v4());
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        product_code: Set(code.clone()),
        name: Set("Test Widget".to_string()),
        description: Set(Some("A product for testing".to_string())),
        price: Set(price),
        instock: Set(instock),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok((product.id, code))
}

async fn add_size(state: &AppState, product_id: Uuid, size_code: &str) -> anyhow::Result<()> {
    ProductSizeActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        size_code: Set(size_code.to_string()),
    }
    .insert(&state.orm)
    .await?;
    Ok(())
}

async fn add_cart_item(state: &AppState, user_id: Uuid, product_id: Uuid) -> anyhow::Result<()> {
    CartItemActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        product_id: Set(product_id),
        quantity: Set(1),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(())
}

fn shipping_address(state: &str) -> ShippingAddress {
    ShippingAddress {
        name: "Ada".to_string(),
        phone: "0800000000".to_string(),
        address: "1 Marina Rd".to_string(),
        city: "Ikeja".to_string(),
        state: state.to_string(),
        country: "Nigeria".to_string(),
        delivery_fee: None,
    }
}

fn checkout_request(product_code: &str, quantity: i32, state: &str) -> CheckoutRequest {
    CheckoutRequest {
        items: vec![CheckoutItem {
            product_code: product_code.to_string(),
            quantity,
            size_code: None,
        }],
        shipping_address: shipping_address(state),
        payment_method: "paystack".to_string(),
    }
}

fn sign_payload(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn charge_success_body(reference: &str) -> Vec<u8> {
    serde_json::json!({
        "event": "charge.success",
        "data": { "reference": reference },
    })
    .to_string()
    .into_bytes()
}

async fn order_count(state: &AppState, user_id: Uuid) -> anyhow::Result<u64> {
    Ok(Orders::find()
        .filter(OrderCol::UserId.eq(user_id))
        .count(&state.orm)
        .await?)
}

async fn product_stock(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product row");
    Ok(product.instock)
}

#[tokio::test]
async fn checkout_prices_non_local_delivery() -> anyhow::Result<()> {
    let gateway = StubGateway::succeeding();
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway.clone(), notifier).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (_, code) = create_product(&state, 25_000, 10).await?;
    let auth = AuthUser { user_id };

    let response =
        checkout_service::checkout(&state, &auth, checkout_request(&code, 2, "Enugu")).await?;
    let data = response.data.expect("checkout data");

    assert_eq!(data.subtotal, 50_000);
    assert_eq!(data.tax, 3_750);
    assert_eq!(data.delivery_fee, 8_000);
    assert_eq!(data.total_amount, 61_750);
    assert!(data.order_code.starts_with("ORD-"));
    assert!(data.payment_reference.starts_with("PMF-"));

    // The provider is billed in minor units.
    assert_eq!(gateway.initialize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *gateway.last_initialize_amount.lock().unwrap(),
        Some(6_175_000)
    );

    let order = Orders::find()
        .filter(OrderCol::PaymentReference.eq(data.payment_reference.clone()))
        .one(&state.orm)
        .await?
        .expect("order row");
    assert_eq!(order.payment_status, PaymentStatus::Pending.as_str());
    assert_eq!(order.status, OrderStatus::Pending.as_str());
    assert_eq!(order.total_amount, 61_750);

    Ok(())
}

#[tokio::test]
async fn checkout_free_shipping_above_threshold() -> anyhow::Result<()> {
    let gateway = StubGateway::succeeding();
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway, notifier).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (_, code) = create_product(&state, 60_000, 5).await?;
    let auth = AuthUser { user_id };

    let response =
        checkout_service::checkout(&state, &auth, checkout_request(&code, 1, "Kano")).await?;
    let data = response.data.expect("checkout data");

    assert_eq!(data.delivery_fee, 0);
    assert_eq!(data.tax, 4_500);
    assert_eq!(data.total_amount, 64_500);

    Ok(())
}

#[tokio::test]
async fn insufficient_stock_creates_no_order() -> anyhow::Result<()> {
    let gateway = StubGateway::succeeding();
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway.clone(), notifier).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (_, code) = create_product(&state, 10_000, 1).await?;
    let auth = AuthUser { user_id };

    let err = checkout_service::checkout(&state, &auth, checkout_request(&code, 3, "Lagos"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { .. }));

    assert_eq!(order_count(&state, user_id).await?, 0);
    assert_eq!(gateway.initialize_calls.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn invalid_size_is_rejected() -> anyhow::Result<()> {
    let gateway = StubGateway::succeeding();
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway, notifier).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (product_id, code) = create_product(&state, 10_000, 10).await?;
    add_size(&state, product_id, "M").await?;
    let auth = AuthUser { user_id };

    let mut request = checkout_request(&code, 1, "Lagos");
    request.items[0].size_code = Some("XXL".to_string());
    let err = checkout_service::checkout(&state, &auth, request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidSize(_)));
    assert_eq!(order_count(&state, user_id).await?, 0);

    let mut request = checkout_request(&code, 1, "Lagos");
    request.items[0].size_code = Some("M".to_string());
    assert!(checkout_service::checkout(&state, &auth, request).await.is_ok());

    Ok(())
}

#[tokio::test]
async fn gateway_failure_rolls_back_order() -> anyhow::Result<()> {
    let gateway = StubGateway::failing_initialize();
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway.clone(), notifier).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (_, code) = create_product(&state, 10_000, 10).await?;
    let auth = AuthUser { user_id };

    let before = order_count(&state, user_id).await?;
    let err = checkout_service::checkout(&state, &auth, checkout_request(&code, 1, "Lagos"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Gateway(_)));
    assert_eq!(gateway.initialize_calls.load(Ordering::SeqCst), 1);

    // Created-then-deleted: the row count is unchanged.
    assert_eq!(order_count(&state, user_id).await?, before);

    Ok(())
}

#[tokio::test]
async fn verify_by_client_is_idempotent() -> anyhow::Result<()> {
    let gateway = StubGateway::succeeding();
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway.clone(), notifier.clone()).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (product_id, code) = create_product(&state, 20_000, 5).await?;
    add_cart_item(&state, user_id, product_id).await?;
    let auth = AuthUser { user_id };

    let checkout =
        checkout_service::checkout(&state, &auth, checkout_request(&code, 2, "Lagos")).await?;
    let reference = checkout.data.expect("checkout data").payment_reference;

    let first = reconcile_service::verify_by_client(&state, &reference, &auth).await?;
    let first_data = first.data.expect("verification data");
    assert!(first_data.paid);
    assert_eq!(first_data.order.payment_status, PaymentStatus::Paid);
    assert_eq!(first_data.order.status, OrderStatus::Processing);

    // Side effects applied exactly once.
    assert_eq!(product_stock(&state, product_id).await?, 3);
    assert_eq!(notifier.count(), 1);
    let cart_left = CartItems::find()
        .filter(CartCol::UserId.eq(user_id))
        .count(&state.orm)
        .await?;
    assert_eq!(cart_left, 0);

    // Repeats short-circuit on the persisted paid state: identical output,
    // no second gateway call, no second decrement, no second notification.
    let second = reconcile_service::verify_by_client(&state, &reference, &auth).await?;
    let third = reconcile_service::verify_by_client(&state, &reference, &auth).await?;
    assert_eq!(second.message, third.message);
    let second_data = second.data.expect("verification data");
    let third_data = third.data.expect("verification data");
    assert_eq!(
        serde_json::to_value(&second_data)?,
        serde_json::to_value(&third_data)?
    );
    assert!(second_data.paid);

    assert_eq!(gateway.verify_calls.load(Ordering::SeqCst), 1);
    assert_eq!(product_stock(&state, product_id).await?, 3);
    assert_eq!(notifier.count(), 1);

    Ok(())
}

#[tokio::test]
async fn client_and_webhook_race_settles_once() -> anyhow::Result<()> {
    let gateway = StubGateway::succeeding();
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway, notifier.clone()).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (product_id, code) = create_product(&state, 15_000, 10).await?;
    add_cart_item(&state, user_id, product_id).await?;
    let auth = AuthUser { user_id };

    let checkout =
        checkout_service::checkout(&state, &auth, checkout_request(&code, 4, "Lagos")).await?;
    let reference = checkout.data.expect("checkout data").payment_reference;

    let body = charge_success_body(&reference);
    let signature = sign_payload(&body, WEBHOOK_SECRET);

    let (client_result, webhook_result) = tokio::join!(
        reconcile_service::verify_by_client(&state, &reference, &auth),
        reconcile_service::verify_by_webhook(&state, &body, &signature),
    );

    let client_data = client_result?.data.expect("verification data");
    assert!(client_data.paid);
    webhook_result?;

    // Exactly one winner: stock decremented once, one notification, order
    // settled at paid/processing.
    assert_eq!(product_stock(&state, product_id).await?, 6);
    assert_eq!(notifier.count(), 1);

    let order = Orders::find()
        .filter(OrderCol::PaymentReference.eq(reference))
        .one(&state.orm)
        .await?
        .expect("order row");
    assert_eq!(order.payment_status, PaymentStatus::Paid.as_str());
    assert_eq!(order.status, OrderStatus::Processing.as_str());

    Ok(())
}

#[tokio::test]
async fn tampered_webhook_is_rejected_before_any_processing() -> anyhow::Result<()> {
    let gateway = StubGateway::succeeding();
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway.clone(), notifier).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (product_id, code) = create_product(&state, 10_000, 5).await?;
    let auth = AuthUser { user_id };

    let checkout =
        checkout_service::checkout(&state, &auth, checkout_request(&code, 1, "Lagos")).await?;
    let reference = checkout.data.expect("checkout data").payment_reference;

    let body = charge_success_body(&reference);
    let forged = sign_payload(&body, "some_other_secret");

    let err = reconcile_service::verify_by_webhook(&state, &body, &forged)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidSignature));

    // Rejected before any order lookup or gateway call.
    assert_eq!(gateway.verify_calls.load(Ordering::SeqCst), 0);
    assert_eq!(product_stock(&state, product_id).await?, 5);

    let order = Orders::find()
        .filter(OrderCol::PaymentReference.eq(reference))
        .one(&state.orm)
        .await?
        .expect("order row");
    assert_eq!(order.payment_status, PaymentStatus::Pending.as_str());

    Ok(())
}

#[tokio::test]
async fn webhook_acknowledges_unhandled_events() -> anyhow::Result<()> {
    let gateway = StubGateway::succeeding();
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway.clone(), notifier).await? else {
        return Ok(());
    };

    let body = serde_json::json!({ "event": "charge.dispute.create", "data": {} })
        .to_string()
        .into_bytes();
    let signature = sign_payload(&body, WEBHOOK_SECRET);

    let response = reconcile_service::verify_by_webhook(&state, &body, &signature).await?;
    assert_eq!(response.message, "Event not handled");
    assert_eq!(gateway.verify_calls.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn failed_verification_cancels_order() -> anyhow::Result<()> {
    let gateway = StubGateway::with_outcome(VerifyOutcome::Failed {
        reason: "Transaction status: abandoned".to_string(),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway, notifier.clone()).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (product_id, code) = create_product(&state, 10_000, 5).await?;
    let auth = AuthUser { user_id };

    let checkout =
        checkout_service::checkout(&state, &auth, checkout_request(&code, 1, "Lagos")).await?;
    let reference = checkout.data.expect("checkout data").payment_reference;

    // A confirmed non-success is a normal terminal state, not an error.
    let response = reconcile_service::verify_by_client(&state, &reference, &auth).await?;
    let data = response.data.expect("verification data");
    assert!(!data.paid);
    assert_eq!(data.order.payment_status, PaymentStatus::Failed);
    assert_eq!(data.order.status, OrderStatus::Cancelled);

    assert_eq!(product_stock(&state, product_id).await?, 5);
    assert_eq!(notifier.count(), 0);

    Ok(())
}

#[tokio::test]
async fn ambiguous_timeout_leaves_order_pending() -> anyhow::Result<()> {
    let gateway = StubGateway::with_outcome(VerifyOutcome::AmbiguousTimeout);
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway, notifier).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (product_id, code) = create_product(&state, 10_000, 5).await?;
    let auth = AuthUser { user_id };

    let checkout =
        checkout_service::checkout(&state, &auth, checkout_request(&code, 1, "Lagos")).await?;
    let reference = checkout.data.expect("checkout data").payment_reference;

    let err = reconcile_service::verify_by_client(&state, &reference, &auth)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::VerificationUnavailable));

    // The charge may have settled server-side: nothing moves.
    let order = Orders::find()
        .filter(OrderCol::PaymentReference.eq(reference))
        .one(&state.orm)
        .await?
        .expect("order row");
    assert_eq!(order.payment_status, PaymentStatus::Pending.as_str());
    assert_eq!(order.status, OrderStatus::Pending.as_str());
    assert_eq!(product_stock(&state, product_id).await?, 5);

    Ok(())
}

#[tokio::test]
async fn advance_status_requires_confirmed_payment() -> anyhow::Result<()> {
    let gateway = StubGateway::succeeding();
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway, notifier).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (_, code) = create_product(&state, 10_000, 5).await?;
    let auth = AuthUser { user_id };

    let checkout =
        checkout_service::checkout(&state, &auth, checkout_request(&code, 1, "Lagos")).await?;
    let order_code = checkout.data.expect("checkout data").order_code;

    let err = order_service::advance_status(
        &state,
        &auth,
        &order_code,
        UpdateOrderStatusRequest {
            status: "shipped".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::PaymentNotConfirmed));

    let order = Orders::find()
        .filter(OrderCol::OrderCode.eq(order_code))
        .one(&state.orm)
        .await?
        .expect("order row");
    assert_eq!(order.status, OrderStatus::Pending.as_str());

    Ok(())
}

#[tokio::test]
async fn cancel_rules_follow_payment_state() -> anyhow::Result<()> {
    let gateway = StubGateway::succeeding();
    let notifier = Arc::new(RecordingNotifier::default());
    let Some(state) = setup_state(gateway, notifier).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let (_, code) = create_product(&state, 10_000, 10).await?;
    let auth = AuthUser { user_id };

    // Pending orders may be cancelled.
    let pending =
        checkout_service::checkout(&state, &auth, checkout_request(&code, 1, "Lagos")).await?;
    let pending_code = pending.data.expect("checkout data").order_code;
    let cancelled = order_service::cancel_order(&state, &auth, &pending_code).await?;
    assert_eq!(
        cancelled.data.expect("order").status,
        OrderStatus::Cancelled
    );

    // Paid orders may not.
    let paid =
        checkout_service::checkout(&state, &auth, checkout_request(&code, 1, "Lagos")).await?;
    let paid_data = paid.data.expect("checkout data");
    reconcile_service::verify_by_client(&state, &paid_data.payment_reference, &auth).await?;

    let err = order_service::cancel_order(&state, &auth, &paid_data.order_code)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CannotCancelPaidOrder));

    // But a paid order may advance.
    let advanced = order_service::advance_status(
        &state,
        &auth,
        &paid_data.order_code,
        UpdateOrderStatusRequest {
            status: "shipped".to_string(),
        },
    )
    .await?;
    assert_eq!(
        advanced.data.expect("order").order.status,
        OrderStatus::Shipped
    );

    Ok(())
}
