//! Hosted backend REST client for checkout submission.
//!
//! The backend exposes a `PostgREST`-style insert endpoint:
//!
//! ```text
//! POST {url}/rest/v1/{table}
//! apikey: <key>
//! Authorization: Bearer <key>
//! Prefer: return=representation
//!
//! -> 201 [{"id": "<uuid>", "driver_id": "<uuid>", ...}]
//! -> 4xx/5xx {"error": "..."} or {"message": "..."}
//! ```
//!
//! One submission is one insert; the backend creates the driver record and
//! the checkout session together, so there is nothing to roll back here.

use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use rental_core::{
    BackendError, CartItem, CheckoutBackend, CheckoutReceipt, CheckoutSessionId,
    CheckoutSubmission, DriverId, PaymentMethod,
};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::BackendConfig;

/// Longest error body we keep when the backend does not send JSON.
const MAX_RAW_ERROR_LEN: usize = 200;

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum BackendClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Client could not be built from configuration.
    #[error("Invalid backend configuration: {0}")]
    Config(String),
}

impl From<BackendClientError> for BackendError {
    fn from(err: BackendClientError) -> Self {
        match err {
            BackendClientError::Http(e) if e.is_decode() => Self::Unexpected(e.to_string()),
            BackendClientError::Http(e) => Self::Unavailable(e.to_string()),
            BackendClientError::Api { status, message } => Self::Rejected { status, message },
            BackendClientError::Parse(msg) | BackendClientError::Config(msg) => {
                Self::Unexpected(msg)
            }
        }
    }
}

/// Backend REST client.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl BackendClient {
    /// Create a new backend client.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is not a valid header value, the endpoint
    /// URL cannot be built, or the HTTP client fails to build.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendClientError> {
        let key = config.api_key.expose_secret();
        let mut headers = HeaderMap::new();

        let mut api_key = HeaderValue::from_str(key)
            .map_err(|e| BackendClientError::Config(format!("Invalid API key format: {e}")))?;
        api_key.set_sensitive(true);
        headers.insert("apikey", api_key);

        let mut bearer = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|e| BackendClientError::Config(format!("Invalid API key format: {e}")))?;
        bearer.set_sensitive(true);
        headers.insert("Authorization", bearer);

        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: table_endpoint(&config.url, &config.table)?,
        })
    }

    /// The insert endpoint this client posts to.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Insert one checkout session row.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails, the backend answers non-2xx, or
    /// the returned row lacks the ids.
    #[instrument(skip(self, submission), fields(reference = %submission.reference))]
    pub async fn insert_checkout_session(
        &self,
        submission: &CheckoutSubmission,
    ) -> Result<CheckoutReceipt, BackendClientError> {
        let row = CheckoutSessionRow::from_submission(submission);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&row)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body);
            warn!(status = status.as_u16(), %message, "Backend rejected checkout session");
            return Err(BackendClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let rows: Vec<CreatedRow> = response
            .json()
            .await
            .map_err(|e| BackendClientError::Parse(e.to_string()))?;
        let receipt = receipt_from_rows(rows)?;

        debug!(
            checkout_session_id = %receipt.checkout_session_id,
            driver_id = %receipt.driver_id,
            "Checkout session created"
        );
        Ok(receipt)
    }
}

impl CheckoutBackend for BackendClient {
    async fn create_checkout_session(
        &self,
        submission: &CheckoutSubmission,
    ) -> Result<CheckoutReceipt, BackendError> {
        self.insert_checkout_session(submission)
            .await
            .map_err(BackendError::from)
    }
}

/// `{url}/rest/v1/{table}`, keeping any path prefix on `url`.
fn table_endpoint(base: &Url, table: &str) -> Result<Url, BackendClientError> {
    let raw = format!(
        "{}/rest/v1/{}",
        base.as_str().trim_end_matches('/'),
        table.trim_matches('/')
    );
    Url::parse(&raw).map_err(|e| BackendClientError::Config(format!("{raw}: {e}")))
}

/// Pull the message out of a backend error body.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<String>,
        message: Option<String>,
    }

    serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.error.or(e.message))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "no error details".to_string()
            } else {
                trimmed.chars().take(MAX_RAW_ERROR_LEN).collect()
            }
        })
}

fn receipt_from_rows(rows: Vec<CreatedRow>) -> Result<CheckoutReceipt, BackendClientError> {
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| BackendClientError::Parse("insert returned no rows".to_string()))?;
    let driver_id = row
        .driver_id
        .ok_or_else(|| BackendClientError::Parse("inserted row has no driver_id".to_string()))?;

    Ok(CheckoutReceipt {
        checkout_session_id: CheckoutSessionId::new(row.id),
        driver_id: DriverId::new(driver_id),
    })
}

// =============================================================================
// Wire types
// =============================================================================

/// Row returned by the insert.
#[derive(Debug, Deserialize)]
struct CreatedRow {
    id: Uuid,
    #[serde(default)]
    driver_id: Option<Uuid>,
}

/// Row posted to the checkout sessions table.
#[derive(Debug, Serialize)]
struct CheckoutSessionRow<'a> {
    reference: Uuid,
    status: &'static str,
    currency: &'static str,
    total_amount: Decimal,
    vehicle_id: &'a str,
    vehicle_name: &'a str,
    vehicle_category: Option<&'a str>,
    plan_id: &'a str,
    plan_name: &'a str,
    rental_period: rental_core::RentalPeriod,
    period_count: u32,
    insurance_id: &'a str,
    payment_method: &'static str,
    installments: Option<u8>,
    driver: DriverRow<'a>,
    items: Vec<ItemRow<'a>>,
}

#[derive(Debug, Serialize)]
struct DriverRow<'a> {
    full_name: &'a str,
    email: &'a str,
    phone: &'a str,
    birth_date: NaiveDate,
    document_number: &'a str,
    license_number: &'a str,
    license_expiry: NaiveDate,
}

#[derive(Debug, Serialize)]
struct ItemRow<'a> {
    id: &'a str,
    kind: &'static str,
    name: &'a str,
    quantity: u32,
    unit_price: Decimal,
    total_price: Decimal,
}

impl<'a> ItemRow<'a> {
    fn from_item(item: &'a CartItem) -> Self {
        Self {
            id: item.id().as_str(),
            kind: item.kind().as_str(),
            name: item.name(),
            quantity: item.quantity().get(),
            unit_price: item.unit_price().amount,
            total_price: item.total_price().amount,
        }
    }
}

impl<'a> CheckoutSessionRow<'a> {
    fn from_submission(submission: &'a CheckoutSubmission) -> Self {
        let (payment_method, installments) = match submission.payment {
            PaymentMethod::CreditCard { installments } => ("credit_card", Some(installments)),
            PaymentMethod::Pix => ("pix", None),
            PaymentMethod::BankSlip => ("bank_slip", None),
        };
        let vehicle = &submission.vehicle;
        let driver = &submission.driver;

        Self {
            reference: submission.reference,
            status: "pending",
            currency: submission.currency.code(),
            total_amount: submission.total.amount,
            vehicle_id: &vehicle.vehicle_id,
            vehicle_name: &vehicle.vehicle_name,
            vehicle_category: vehicle.category.as_deref(),
            plan_id: vehicle.plan_id.as_str(),
            plan_name: &vehicle.plan_name,
            rental_period: vehicle.period,
            period_count: vehicle.period_count.get(),
            insurance_id: submission.insurance.id.as_str(),
            payment_method,
            installments,
            driver: DriverRow {
                full_name: &driver.full_name,
                email: driver.email.as_str(),
                phone: &driver.phone,
                birth_date: driver.birth_date,
                document_number: &driver.document_number,
                license_number: &driver.license_number,
                license_expiry: driver.license_expiry,
            },
            items: submission.items.iter().map(ItemRow::from_item).collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use rental_core::{
        Advance, CheckoutFlow, CurrencyCode, DriverForm, InsuranceForm, OptionalsForm,
        PaymentForm, PaymentMethodKind, RentalPeriod, StepInput, ValidationContext, VehicleForm,
    };
    use secrecy::SecretString;

    use super::*;

    fn submission(method: PaymentMethodKind, installments: Option<i64>) -> CheckoutSubmission {
        let ctx = ValidationContext::new(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        let mut flow = CheckoutFlow::new(CurrencyCode::BRL);
        let steps = [
            StepInput::Vehicle(VehicleForm {
                vehicle_id: "onix-2024".to_string(),
                vehicle_name: "Chevrolet Onix".to_string(),
                category: Some("Compact".to_string()),
                plan_id: "plan-onix-daily".to_string(),
                plan_name: "Daily".to_string(),
                period: Some(RentalPeriod::Daily),
                period_count: 1,
                unit_price: Some(Decimal::new(24_600, 2)),
            }),
            StepInput::Optionals(OptionalsForm::default()),
            StepInput::Insurance(InsuranceForm {
                id: "ins-basic".to_string(),
                name: "Basic protection".to_string(),
                unit_price: Some(Decimal::new(7_500, 2)),
            }),
            StepInput::Driver(DriverForm {
                full_name: "Maria Silva".to_string(),
                email: "Maria@Example.com".to_string(),
                phone: "(11) 91234-5678".to_string(),
                birth_date: "1990-05-20".to_string(),
                document_number: "123.456.789-09".to_string(),
                license_number: "ab1234567".to_string(),
                license_expiry: "2030-01-01".to_string(),
            }),
        ];
        for step in steps {
            flow.advance(step, &ctx).unwrap();
        }
        let payment = StepInput::Payment(PaymentForm {
            method: Some(method),
            installments,
        });
        match flow.advance(payment, &ctx).unwrap() {
            Advance::Submit(submission) => *submission,
            Advance::Moved(step) => panic!("expected submission, moved to {step}"),
        }
    }

    #[test]
    fn test_table_endpoint() {
        let base = Url::parse("https://abc.backend.test").unwrap();
        assert_eq!(
            table_endpoint(&base, "checkout_sessions").unwrap().as_str(),
            "https://abc.backend.test/rest/v1/checkout_sessions"
        );

        let prefixed = Url::parse("http://127.0.0.1:8080/project/").unwrap();
        assert_eq!(
            table_endpoint(&prefixed, "/checkout_sessions/").unwrap().as_str(),
            "http://127.0.0.1:8080/project/rest/v1/checkout_sessions"
        );
    }

    #[test]
    fn test_client_builds_from_config() {
        let client = BackendClient::new(&BackendConfig {
            url: Url::parse("https://abc.backend.test").unwrap(),
            api_key: SecretString::from("k3y-Zq8!vN2#pR5"),
            table: "checkout_sessions".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "https://abc.backend.test/rest/v1/checkout_sessions"
        );
    }

    #[test]
    fn test_client_rejects_key_with_newline() {
        let result = BackendClient::new(&BackendConfig {
            url: Url::parse("https://abc.backend.test").unwrap(),
            api_key: SecretString::from("bad\nkey"),
            table: "checkout_sessions".to_string(),
            timeout: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(BackendClientError::Config(_))));
    }

    #[test]
    fn test_error_message_prefers_error_then_message() {
        assert_eq!(error_message(r#"{"error":"duplicate key"}"#), "duplicate key");
        assert_eq!(
            error_message(r#"{"message":"permission denied","code":"42501"}"#),
            "permission denied"
        );
        assert_eq!(error_message("  upstream timeout  "), "upstream timeout");
        assert_eq!(error_message(""), "no error details");
        assert_eq!(error_message(&"x".repeat(500)).len(), MAX_RAW_ERROR_LEN);
    }

    #[test]
    fn test_receipt_from_rows() {
        let id = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let rows: Vec<CreatedRow> = serde_json::from_value(serde_json::json!([
            {"id": id, "driver_id": driver, "status": "pending"}
        ]))
        .unwrap();

        let receipt = receipt_from_rows(rows).unwrap();
        assert_eq!(receipt.checkout_session_id.as_uuid(), id);
        assert_eq!(receipt.driver_id.as_uuid(), driver);
    }

    #[test]
    fn test_receipt_requires_row_and_driver() {
        assert!(matches!(
            receipt_from_rows(Vec::new()),
            Err(BackendClientError::Parse(_))
        ));

        let rows: Vec<CreatedRow> =
            serde_json::from_value(serde_json::json!([{ "id": Uuid::new_v4() }])).unwrap();
        assert!(matches!(
            receipt_from_rows(rows),
            Err(BackendClientError::Parse(_))
        ));
    }

    #[test]
    fn test_row_carries_order_and_driver() {
        let submission = submission(PaymentMethodKind::CreditCard, Some(3));
        let row = serde_json::to_value(CheckoutSessionRow::from_submission(&submission)).unwrap();

        assert_eq!(row["reference"], submission.reference.to_string());
        assert_eq!(row["status"], "pending");
        assert_eq!(row["currency"], "BRL");
        assert_eq!(row["total_amount"], "321.00");
        assert_eq!(row["plan_id"], "plan-onix-daily");
        assert_eq!(row["rental_period"], "daily");
        assert_eq!(row["insurance_id"], "ins-basic");
        assert_eq!(row["payment_method"], "credit_card");
        assert_eq!(row["installments"], 3);
        assert_eq!(row["driver"]["email"], "maria@example.com");
        assert_eq!(row["driver"]["phone"], "11912345678");
        assert_eq!(row["driver"]["license_number"], "AB1234567");
        assert_eq!(row["driver"]["birth_date"], "1990-05-20");

        let items = row["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["kind"], "vehicle-plan");
        assert_eq!(items[0]["name"], "Chevrolet Onix - Daily");
        assert_eq!(items[1]["total_price"], "75.00");
    }

    #[test]
    fn test_row_without_installments_for_pix() {
        let submission = submission(PaymentMethodKind::Pix, None);
        let row = serde_json::to_value(CheckoutSessionRow::from_submission(&submission)).unwrap();
        assert_eq!(row["payment_method"], "pix");
        assert!(row["installments"].is_null());
    }

    #[test]
    fn test_client_error_maps_to_backend_error() {
        let rejected: BackendError = BackendClientError::Api {
            status: 409,
            message: "duplicate reference".to_string(),
        }
        .into();
        assert_eq!(
            rejected,
            BackendError::Rejected {
                status: 409,
                message: "duplicate reference".to_string()
            }
        );

        let parse: BackendError = BackendClientError::Parse("no rows".to_string()).into();
        assert!(matches!(parse, BackendError::Unexpected(_)));
    }
}
