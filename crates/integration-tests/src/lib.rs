//! Integration test harness for the rental storefront.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p rental-integration-tests
//! ```
//!
//! Every test starts its own stub backend and storefront on ephemeral ports,
//! so tests need no external services and can run in parallel.
//!
//! - [`StubBackend`] - In-process stand-in for the hosted backend's REST insert
//! - [`TestContext`] - A running storefront plus a cookie-keeping client

#![allow(clippy::expect_used, clippy::missing_panics_doc)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use rental_core::CurrencyCode;
use rental_storefront::config::{BackendConfig, StorefrontConfig};
use rental_storefront::state::AppState;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;
use uuid::Uuid;

/// API key the storefront under test sends to the stub.
pub const TEST_API_KEY: &str = "sk_test_Qm9vayBhIHJlbnRhbCBjYXI";

/// How the stub backend behaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubOptions {
    /// Number of inserts answered with `503` before succeeding.
    pub failures: u32,
    /// Delay before answering each insert.
    pub delay: Duration,
}

/// One insert request as seen by the stub.
#[derive(Debug, Clone)]
pub struct ReceivedInsert {
    pub api_key: Option<String>,
    pub authorization: Option<String>,
    pub prefer: Option<String>,
    pub body: Value,
}

/// In-process stand-in for the hosted backend.
#[derive(Clone)]
pub struct StubBackend {
    inner: Arc<StubInner>,
}

struct StubInner {
    options: StubOptions,
    failures_left: AtomicU32,
    received: Mutex<Vec<ReceivedInsert>>,
    checkout_session_id: Uuid,
    driver_id: Uuid,
    url: Url,
}

impl StubBackend {
    /// Start a stub backend on an ephemeral port.
    pub async fn spawn(options: StubOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stub backend");
        let addr = listener.local_addr().expect("Stub backend has no address");

        let stub = Self {
            inner: Arc::new(StubInner {
                options,
                failures_left: AtomicU32::new(options.failures),
                received: Mutex::new(Vec::new()),
                checkout_session_id: Uuid::new_v4(),
                driver_id: Uuid::new_v4(),
                url: base_url(addr),
            }),
        };

        let app = Router::new()
            .route("/rest/v1/checkout_sessions", post(insert_checkout_session))
            .with_state(stub.clone());
        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Stub backend crashed");
        });

        stub
    }

    /// Base URL the storefront should be configured with.
    #[must_use]
    pub fn url(&self) -> Url {
        self.inner.url.clone()
    }

    /// Id returned for every successful insert.
    #[must_use]
    pub fn checkout_session_id(&self) -> Uuid {
        self.inner.checkout_session_id
    }

    /// Driver id returned for every successful insert.
    #[must_use]
    pub fn driver_id(&self) -> Uuid {
        self.inner.driver_id
    }

    /// Every insert received so far, including failed ones.
    #[must_use]
    pub fn received(&self) -> Vec<ReceivedInsert> {
        self.inner
            .received
            .lock()
            .expect("Stub mutex poisoned")
            .clone()
    }
}

async fn insert_checkout_session(
    State(stub): State<StubBackend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    stub.inner
        .received
        .lock()
        .expect("Stub mutex poisoned")
        .push(ReceivedInsert {
            api_key: header("apikey"),
            authorization: header("authorization"),
            prefer: header("prefer"),
            body,
        });

    if !stub.inner.options.delay.is_zero() {
        tokio::time::sleep(stub.inner.options.delay).await;
    }

    let failed = stub
        .inner
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failed {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "message": "database is starting up" })),
        )
            .into_response();
    }

    (
        StatusCode::CREATED,
        Json(json!([{
            "id": stub.inner.checkout_session_id,
            "driver_id": stub.inner.driver_id,
            "status": "pending",
        }])),
    )
        .into_response()
}

/// A running storefront wired to a stub backend.
pub struct TestContext {
    /// Client with a cookie store, so it keeps one session across requests.
    pub client: reqwest::Client,
    pub base_url: String,
    pub backend: StubBackend,
}

impl TestContext {
    /// Start a stub backend with default behaviour and a storefront.
    pub async fn start() -> Self {
        Self::with_backend(StubOptions::default()).await
    }

    /// Start a stub backend with `options` and a storefront pointed at it.
    pub async fn with_backend(options: StubOptions) -> Self {
        let backend = StubBackend::spawn(options).await;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind storefront");
        let addr = listener.local_addr().expect("Storefront has no address");

        let config = StorefrontConfig {
            host: addr.ip(),
            port: addr.port(),
            base_url: base_url(addr).to_string(),
            currency: CurrencyCode::BRL,
            session_capacity: 1_000,
            backend: BackendConfig {
                url: backend.url(),
                api_key: SecretString::from(TEST_API_KEY),
                table: "checkout_sessions".to_string(),
                timeout: Duration::from_secs(5),
            },
            sentry_dsn: None,
            sentry_environment: None,
        };
        let state = AppState::new(config).expect("Failed to build storefront state");
        let app = rental_storefront::app(state);
        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Storefront crashed");
        });

        Self {
            client: new_client(),
            base_url: base_url(addr).as_str().trim_end_matches('/').to_string(),
            backend,
        }
    }

    /// A second client with its own (empty) session.
    #[must_use]
    pub fn other_client(&self) -> reqwest::Client {
        new_client()
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `GET` a JSON resource.
    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("GET failed");
        into_parts(response).await
    }

    /// `POST` a JSON body.
    pub async fn post(&self, path: &str, body: &Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("POST failed");
        into_parts(response).await
    }

    /// `DELETE` a resource.
    pub async fn delete(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .expect("DELETE failed");
        into_parts(response).await
    }

    /// Post valid input for the first four steps.
    pub async fn complete_steps_through_driver(&self) {
        for (path, body) in [
            ("/checkout/vehicle", vehicle_form()),
            ("/checkout/optionals", json!({ "items": [] })),
            ("/checkout/insurance", insurance_form()),
            ("/checkout/driver", driver_form()),
        ] {
            let (status, body) = self.post(path, &body).await;
            assert_eq!(status, StatusCode::OK, "{path} failed: {body}");
        }
    }
}

fn new_client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .expect("Failed to create HTTP client")
}

fn base_url(addr: SocketAddr) -> Url {
    Url::parse(&format!("http://{addr}")).expect("Socket address is a valid URL")
}

async fn into_parts(response: reqwest::Response) -> (StatusCode, Value) {
    let status = StatusCode::from_u16(response.status().as_u16()).expect("Valid status code");
    let text = response.text().await.expect("Failed to read body");
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    (status, body)
}

// =============================================================================
// Form fixtures
// =============================================================================

/// Daily plan for one day at 246.00.
#[must_use]
pub fn vehicle_form() -> Value {
    json!({
        "vehicle_id": "onix-2024",
        "vehicle_name": "Chevrolet Onix",
        "category": "Compact",
        "plan_id": "plan-onix-daily",
        "plan_name": "Daily",
        "period": "daily",
        "period_count": 1,
        "unit_price": "246.00"
    })
}

/// Basic insurance at 75.00.
#[must_use]
pub fn insurance_form() -> Value {
    json!({
        "id": "ins-basic",
        "name": "Basic protection",
        "unit_price": "75.00"
    })
}

#[must_use]
pub fn driver_form() -> Value {
    json!({
        "full_name": "Maria Silva",
        "email": "maria@example.com",
        "phone": "+55 11 91234-5678",
        "birth_date": "1990-05-20",
        "document_number": "123.456.789-09",
        "license_number": "AB1234567",
        "license_expiry": "2040-01-01"
    })
}

#[must_use]
pub fn pix_payment() -> Value {
    json!({ "method": "pix" })
}
