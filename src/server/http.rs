use super::http_errors::{map_checkout_error, map_gate_error, map_ledger_error};
use super::state::AppState;
use crate::application::{CheckoutError, CheckoutService, Completion};
use crate::domain::{Order, Plan, PLANS};
use crate::infrastructure::{AccountRepository, FeatureKind, OrderRepository, WebhookVerifier};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::HeaderValue, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

/// Header carrying the hex HMAC-SHA256 of the raw webhook body.
const SIGNATURE_HEADER: &str = "x-razorpay-signature";

pub fn router(state: AppState) -> Router {
    let cors = match state.frontend_url.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE]),
        Err(_) => {
            warn!(frontend_url = %state.frontend_url, "Invalid frontend origin, CORS disabled");
            CorsLayer::new()
        }
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/plans", get(list_plans))
        .route("/accounts/:id/credits", get(get_balance))
        .route("/accounts/:id/credits/deduct", post(deduct_credit))
        .route("/accounts/:id/features/:feature", post(invoke_feature))
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/complete", post(complete_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/fail", post(fail_order))
        .route("/webhook", post(webhook))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        list_plans,
        get_balance,
        deduct_credit,
        invoke_feature,
        create_order,
        get_order,
        complete_order,
        cancel_order,
        fail_order,
        webhook,
    ),
    components(
        schemas(
            HealthResponse,
            PlanResponse,
            BalanceResponse,
            FeatureRequest,
            FeatureResponse,
            CreateOrderRequest,
            CompleteOrderRequest,
            FailOrderRequest,
            OrderResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Ledger", description = "Credit balance endpoints"),
        (name = "Features", description = "Gated AI feature invocation"),
        (name = "Orders", description = "Checkout and payment reconciliation endpoints"),
        (name = "Webhooks", description = "Payment provider callbacks"),
    ),
    info(
        title = "Content Ledger API",
        version = "0.1.0",
        description = "Credit ledger and payment reconciliation for Content AI",
        license(name = "MIT")
    )
)]
struct ApiDoc;

/// Health check response
#[derive(Serialize, ToSchema)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// Verifies database connectivity and returns service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    )
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed: DB connectivity issue");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    error: Some("Database connectivity failed".to_string()),
                }),
            )
        }
    }
}

#[derive(Serialize, ToSchema)]
struct PlanResponse {
    id: String,
    name: String,
    /// Price in minor currency units (paise).
    price: i64,
    credits: i32,
}

impl From<&Plan> for PlanResponse {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id.to_string(),
            name: plan.name.to_string(),
            price: plan.price,
            credits: plan.credits,
        }
    }
}

/// Static plan catalog
#[utoipa::path(
    get,
    path = "/plans",
    tag = "Orders",
    responses((status = 200, description = "Available plans", body = [PlanResponse]))
)]
async fn list_plans() -> impl IntoResponse {
    let plans: Vec<PlanResponse> = PLANS.iter().map(Into::into).collect();
    (StatusCode::OK, Json(serde_json::json!(plans)))
}

#[derive(Serialize, ToSchema)]
struct BalanceResponse {
    credits: i64,
}

/// Current balance, initializing new accounts with the free grant
#[utoipa::path(
    get,
    path = "/accounts/{id}/credits",
    tag = "Ledger",
    params(("id" = String, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Current balance", body = BalanceResponse),
        (status = 500, description = "Failed to read balance", body = Object)
    )
)]
async fn get_balance(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.ledger.get_balance(&id).await {
        Ok(credits) => (StatusCode::OK, Json(serde_json::json!(BalanceResponse { credits }))),
        Err(e) => {
            error!(error = %e, account_id = %id, "Failed to read balance");
            let (status, body) = map_ledger_error(&e);
            (status, Json(body))
        }
    }
}

/// Deduct one credit via the store's atomic conditional decrement
#[utoipa::path(
    post,
    path = "/accounts/{id}/credits/deduct",
    tag = "Ledger",
    params(("id" = String, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Remaining balance", body = BalanceResponse),
        (status = 402, description = "Insufficient credits", body = Object),
        (status = 500, description = "Failed to deduct", body = Object)
    )
)]
async fn deduct_credit(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.ledger.deduct_one(&id).await {
        Ok(credits) => (StatusCode::OK, Json(serde_json::json!(BalanceResponse { credits }))),
        Err(e) => {
            let (status, body) = map_ledger_error(&e);
            (status, Json(body))
        }
    }
}

#[derive(Deserialize, ToSchema)]
struct FeatureRequest {
    #[schema(example = "Write a blog post about espresso")]
    input: String,
}

#[derive(Serialize, ToSchema)]
struct FeatureResponse {
    output: String,
    credits: i64,
}

/// Invoke a gated AI feature (generate, grammar, seo)
///
/// Checks the balance, calls the provider, and deducts one credit on
/// success. Provider failures deduct nothing.
#[utoipa::path(
    post,
    path = "/accounts/{id}/features/{feature}",
    tag = "Features",
    params(
        ("id" = String, Path, description = "Account ID"),
        ("feature" = String, Path, description = "One of: generate, grammar, seo")
    ),
    request_body = FeatureRequest,
    responses(
        (status = 200, description = "Feature output and remaining balance", body = FeatureResponse),
        (status = 400, description = "Unknown feature", body = Object),
        (status = 402, description = "Insufficient credits", body = Object),
        (status = 502, description = "Provider call failed", body = Object)
    )
)]
async fn invoke_feature(
    State(state): State<AppState>,
    Path((id, feature)): Path<(String, String)>,
    Json(req): Json<FeatureRequest>,
) -> impl IntoResponse {
    let feature = match FeatureKind::from_str(&feature) {
        Ok(f) => f,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "Unknown feature",
                    "allowed": ["generate", "grammar", "seo"]
                })),
            );
        }
    };

    match state.gate.invoke(&id, feature, &req.input).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!(FeatureResponse {
                output: outcome.output,
                credits: outcome.remaining,
            })),
        ),
        Err(e) => {
            let (status, body) = map_gate_error(&e);
            (status, Json(body))
        }
    }
}

#[derive(Deserialize, ToSchema)]
struct CreateOrderRequest {
    #[schema(example = "user-123")]
    account_id: String,
    #[schema(example = "professional")]
    plan_id: String,
}

#[derive(Serialize, ToSchema)]
struct OrderResponse {
    id: Uuid,
    account_id: String,
    plan_id: String,
    amount: i64,
    currency: String,
    status: String,
    credits: i32,
    payment_id: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            account_id: order.account_id,
            plan_id: order.plan_id,
            amount: order.amount,
            currency: order.currency,
            status: order.status.to_string(),
            credits: order.credits,
            payment_id: order.payment_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Create an order for a catalog plan ahead of the checkout redirect
#[utoipa::path(
    post,
    path = "/orders",
    tag = "Orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderResponse),
        (status = 400, description = "Unknown plan", body = Object),
        (status = 500, description = "Failed to create order", body = Object)
    )
)]
async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> impl IntoResponse {
    match state.checkout.create_order(&req.account_id, &req.plan_id).await {
        Ok(order) => (StatusCode::CREATED, Json(serde_json::json!(OrderResponse::from(order)))),
        Err(e) => {
            let (status, body) = map_checkout_error(&e);
            (status, Json(body))
        }
    }
}

/// Order lookup for UI polling
#[utoipa::path(
    get,
    path = "/orders/{id}",
    tag = "Orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 404, description = "Order not found", body = Object)
    )
)]
async fn get_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.checkout.get_order(id).await {
        Ok(order) => (StatusCode::OK, Json(serde_json::json!(OrderResponse::from(order)))),
        Err(e) => {
            let (status, body) = map_checkout_error(&e);
            (status, Json(body))
        }
    }
}

#[derive(Deserialize, ToSchema)]
struct CompleteOrderRequest {
    #[schema(example = "pay_NXh2jrLWdMJzAB")]
    payment_id: String,
}

/// Client-side success callback
///
/// Races the provider webhook against the same order; whichever wins
/// the status transition applies the credit grant, the other is a
/// no-op.
#[utoipa::path(
    post,
    path = "/orders/{id}/complete",
    tag = "Orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = CompleteOrderRequest,
    responses(
        (status = 200, description = "Order completed (or already was)", body = Object),
        (status = 404, description = "Order not found", body = Object),
        (status = 500, description = "Reconciliation failed", body = Object)
    )
)]
async fn complete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteOrderRequest>,
) -> impl IntoResponse {
    match state.checkout.complete_order(id, &req.payment_id).await {
        Ok(Completion::Credited { balance, .. }) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ok", "credits": balance})),
        ),
        Ok(Completion::AlreadyCompleted { .. }) => {
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
        }
        Err(e) => {
            error!(error = %e, order_id = %id, "Client-side completion failed");
            let (status, body) = map_checkout_error(&e);
            (status, Json(body))
        }
    }
}

/// Client-side modal dismiss
#[utoipa::path(
    post,
    path = "/orders/{id}/cancel",
    tag = "Orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled", body = OrderResponse),
        (status = 404, description = "Order not found", body = Object),
        (status = 409, description = "Order already terminal", body = Object)
    )
)]
async fn cancel_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.checkout.cancel_order(id).await {
        Ok(order) => (StatusCode::OK, Json(serde_json::json!(OrderResponse::from(order)))),
        Err(e) => {
            let (status, body) = map_checkout_error(&e);
            (status, Json(body))
        }
    }
}

#[derive(Deserialize, ToSchema)]
struct FailOrderRequest {
    #[schema(example = "Payment declined by issuing bank")]
    reason: String,
}

/// Client-side provider failure callback
#[utoipa::path(
    post,
    path = "/orders/{id}/fail",
    tag = "Orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = FailOrderRequest,
    responses(
        (status = 200, description = "Order marked failed", body = OrderResponse),
        (status = 404, description = "Order not found", body = Object),
        (status = 409, description = "Order already terminal", body = Object)
    )
)]
async fn fail_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailOrderRequest>,
) -> impl IntoResponse {
    match state.checkout.fail_order(id, &req.reason).await {
        Ok(order) => (StatusCode::OK, Json(serde_json::json!(OrderResponse::from(order)))),
        Err(e) => {
            let (status, body) = map_checkout_error(&e);
            (status, Json(body))
        }
    }
}

#[derive(Deserialize)]
struct WebhookEnvelope {
    payload: WebhookPayload,
}

#[derive(Deserialize)]
struct WebhookPayload {
    payment: WebhookPayment,
}

#[derive(Deserialize)]
struct WebhookPayment {
    entity: PaymentEntity,
}

#[derive(Deserialize)]
struct PaymentEntity {
    id: String,
    notes: PaymentNotes,
}

#[derive(Deserialize)]
struct PaymentNotes {
    #[serde(rename = "orderId")]
    order_id: String,
}

/// Payment provider webhook
///
/// Verifies the HMAC signature over the raw body before touching any
/// state, then runs the same reconciliation path as the client
/// callback. Non-2xx responses trigger the provider's retry policy.
#[utoipa::path(
    post,
    path = "/webhook",
    tag = "Webhooks",
    responses(
        (status = 200, description = "Webhook processed", body = Object),
        (status = 400, description = "Invalid signature", body = Object),
        (status = 500, description = "Reconciliation failed", body = Object)
    )
)]
async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let (status, response) = handle_webhook(
        &state.verifier,
        state.webhook_timeout,
        state.checkout.as_ref(),
        signature,
        &body,
    )
    .await;
    (status, Json(response))
}

///// Webhook handling behind the axum extractors: verify the signature
/// over the exact raw bytes before touching any state, then run the
/// reconciliation under the configured deadline.
async fn handle_webhook<A, O>(
    verifier: &WebhookVerifier,
    deadline: Duration,
    checkout: &CheckoutService<A, O>,
    signature: &str,
    body: &[u8],
) -> (StatusCode, serde_json::Value)
where
    A: AccountRepository,
    O: OrderRepository,
{
    if !verifier.verify(body, signature) {
        warn!("Webhook rejected: invalid signature");
        return (
            StatusCode::BAD_REQUEST,
            serde_json::json!({"error": "Invalid signature"}),
        );
    }

    match tokio::time::timeout(deadline, process_webhook(checkout, body)).await {
        Ok(Ok(response)) => (StatusCode::OK, response),
        Ok(Err((status, message))) => {
            error!(%status, detail = %message, "Webhook processing failed");
            (
                status,
                serde_json::json!({
                    "error": "Internal server error",
                    "message": message
                }),
            )
        }
        Err(_) => {
            error!("Webhook processing timed out, provider will retry");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "error": "Internal server error",
                    "message": "Webhook processing timed out"
                }),
            )
        }
    }
}

async fn process_webhook<A, O>(
    checkout: &CheckoutService<A, O>,
    body: &[u8],
) -> Result<serde_json::Value, (StatusCode, String)>
where
    A: AccountRepository,
    O: OrderRepository,
{
    let envelope: WebhookEnvelope = serde_json::from_slice(body)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Malformed payload: {}", e)))?;

    let payment = envelope.payload.payment.entity;
    let order_id = Uuid::parse_str(&payment.notes.order_id).map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Order not found: {}", payment.notes.order_id),
        )
    })?;

    info!(%order_id, payment_id = %payment.id, "Processing payment webhook");

    match checkout.complete_order(order_id, &payment.id).await {
        Ok(Completion::Credited { order, balance }) => {
            info!(%order_id, account_id = %order.account_id, balance, "Webhook credited order");
            Ok(serde_json::json!({"status": "ok"}))
        }
        Ok(Completion::AlreadyCompleted { .. }) => Ok(serde_json::json!({"status": "ok"})),
        Err(CheckoutError::OrderNotFound(id)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Order not found: {}", id),
        )),
        Err(CheckoutError::AccountNotFound(id)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("User not found: {}", id),
        )),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, OrderStatus};
    use crate::infrastructure::RepositoryError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubAccounts;

    #[async_trait]
    impl AccountRepository for StubAccounts {
        async fn get_or_create(&self, account_id: &str) -> Result<Account, RepositoryError> {
            Ok(Account::new(account_id.to_string()))
        }

        async fn get_by_id(&self, account_id: &str) -> Result<Account, RepositoryError> {
            Err(RepositoryError::NotFound(format!("Account {}", account_id)))
        }

        async fn try_deduct_one(&self, _account_id: &str) -> Result<Option<i64>, RepositoryError> {
            Ok(None)
        }

        async fn grant_credits(
            &self,
            account_id: &str,
            _amount: i32,
            _plan_id: &str,
        ) -> Result<i64, RepositoryError> {
            Err(RepositoryError::NotFound(format!("Account {}", account_id)))
        }
    }

    /// Order repository that counts reconciliation attempts and can
    /// stall long enough to trip the webhook deadline.
    struct StallingOrders {
        completions: AtomicUsize,
        delay: Duration,
    }

    impl StallingOrders {
        fn new(delay: Duration) -> Self {
            Self {
                completions: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl OrderRepository for StallingOrders {
        async fn create(&self, _order: &Order) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn get_by_id(&self, id: Uuid) -> Result<Order, RepositoryError> {
            Err(RepositoryError::NotFound(format!("Order {}", id)))
        }

        async fn complete_and_grant(
            &self,
            _id: Uuid,
            _payment_id: &str,
        ) -> Result<Option<(Order, i64)>, RepositoryError> {
            self.completions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(None)
        }

        async fn finish_if_created(
            &self,
            _id: Uuid,
            _status: OrderStatus,
            _error: Option<&str>,
        ) -> Result<bool, RepositoryError> {
            Ok(false)
        }
    }

    fn checkout_with(
        orders: Arc<StallingOrders>,
    ) -> CheckoutService<StubAccounts, StallingOrders> {
        CheckoutService::new(Arc::new(StubAccounts), orders)
    }

    fn signed_payment_body(verifier: &WebhookVerifier, order_id: Uuid) -> (String, String) {
        let body = serde_json::json!({
            "payload": {"payment": {"entity": {
                "id": "pay_1",
                "notes": {"orderId": order_id.to_string()}
            }}}
        })
        .to_string();
        let signature = verifier.sign(body.as_bytes());
        (body, signature)
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_is_rejected_before_reconciliation() {
        let verifier = WebhookVerifier::new("whsec_ledger");
        let orders = Arc::new(StallingOrders::new(Duration::ZERO));
        let checkout = checkout_with(orders.clone());
        let (body, _) = signed_payment_body(&verifier, Uuid::new_v4());

        let (status, response) = handle_webhook(
            &verifier,
            Duration::from_secs(5),
            &checkout,
            "deadbeef",
            body.as_bytes(),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response, serde_json::json!({"error": "Invalid signature"}));
        assert_eq!(orders.completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn webhook_with_tampered_body_is_rejected() {
        let verifier = WebhookVerifier::new("whsec_ledger");
        let orders = Arc::new(StallingOrders::new(Duration::ZERO));
        let checkout = checkout_with(orders.clone());
        let (body, signature) = signed_payment_body(&verifier, Uuid::new_v4());
        let tampered = body.replace("pay_1", "pay_2");

        let (status, _) = handle_webhook(
            &verifier,
            Duration::from_secs(5),
            &checkout,
            &signature,
            tampered.as_bytes(),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(orders.completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn webhook_returns_500_when_processing_exceeds_deadline() {
        let verifier = WebhookVerifier::new("whsec_ledger");
        let orders = Arc::new(StallingOrders::new(Duration::from_secs(5)));
        let checkout = checkout_with(orders.clone());
        let (body, signature) = signed_payment_body(&verifier, Uuid::new_v4());

        let (status, response) = handle_webhook(
            &verifier,
            Duration::from_millis(20),
            &checkout,
            &signature,
            body.as_bytes(),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response["error"], "Internal server error");
        assert_eq!(orders.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn webhook_payload_extracts_order_reference() {
        let body = serde_json::json!({
            "event": "payment.captured",
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_abc123",
                        "amount": 49900,
                        "notes": {"orderId": "d3b7f9e2-8a1c-4f5d-9e6b-2c4a8f1d7e30"}
                    }
                }
            }
        });

        let envelope: WebhookEnvelope = serde_json::from_value(body).unwrap();
        let payment = envelope.payload.payment.entity;
        assert_eq!(payment.id, "pay_abc123");
        assert_eq!(
            payment.notes.order_id,
            "d3b7f9e2-8a1c-4f5d-9e6b-2c4a8f1d7e30"
        );
    }

    #[test]
    fn webhook_payload_without_order_reference_fails_parse() {
        let body = serde_json::json!({
            "payload": {"payment": {"entity": {"id": "pay_abc123", "notes": {}}}}
        });

        assert!(serde_json::from_value::<WebhookEnvelope>(body).is_err());
    }
}
