//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//!
//! Error bodies are JSON: `{"error": "...", "fields": [{"field", "message"}]}`.
//! `fields` is only non-empty for validation failures.

use axum::{
    Json,
    extract::{FromRequest, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rental_core::{CartError, CheckoutError, FieldError};
use serde::Serialize;
use thiserror::Error;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// A cart or wizard operation was refused.
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    /// Session store operation failed.
    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// Request body was not the expected JSON.
    #[error(transparent)]
    Json(#[from] JsonRejection),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CartError> for AppError {
    fn from(err: CartError) -> Self {
        Self::Checkout(CheckoutError::Cart(err))
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub fields: Vec<FieldError>,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Checkout(err) => match err {
                CheckoutError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CheckoutError::Cart(CartError::ItemNotFound(_)) => StatusCode::NOT_FOUND,
                CheckoutError::Cart(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CheckoutError::WrongStep { .. }
                | CheckoutError::SubmissionInProgress
                | CheckoutError::Closed(_)
                | CheckoutError::AwaitingRetry
                | CheckoutError::NothingToRetry
                | CheckoutError::NotSubmitting
                | CheckoutError::Incomplete(_) => StatusCode::CONFLICT,
                CheckoutError::Backend(_) => StatusCode::BAD_GATEWAY,
            },
            Self::Json(rejection) => rejection.status(),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Session(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent to the client. Internal details are never exposed.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        let (error, fields) = match self {
            Self::Checkout(CheckoutError::Validation(errors)) => {
                ("Validation failed".to_string(), errors.fields().to_vec())
            }
            Self::Checkout(CheckoutError::Cart(err)) => {
                let fields = cart_error_field(err)
                    .map(|field| {
                        vec![FieldError {
                            field: field.to_string(),
                            message: err.to_string(),
                        }]
                    })
                    .unwrap_or_default();
                (err.to_string(), fields)
            }
            Self::Checkout(CheckoutError::Backend(err)) => (err.user_message(), Vec::new()),
            Self::Checkout(err) => (err.to_string(), Vec::new()),
            Self::Json(rejection) => (rejection.body_text(), Vec::new()),
            Self::BadRequest(msg) => (msg.clone(), Vec::new()),
            Self::Session(_) | Self::Internal(_) => {
                ("Internal server error".to_string(), Vec::new())
            }
        };
        ErrorBody { error, fields }
    }
}

/// Form field a cart error is about, if any.
const fn cart_error_field(err: &CartError) -> Option<&'static str> {
    match err {
        CartError::InvalidQuantity(_)
        | CartError::QuantityTooLarge(_)
        | CartError::AmountOverflow => Some("quantity"),
        CartError::CurrencyMismatch { .. } => Some("currency"),
        CartError::NegativePrice => Some("unit_price"),
        CartError::EmptyId => Some("id"),
        CartError::EmptyName => Some("name"),
        CartError::ItemNotFound(_) => None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if matches!(
            self,
            Self::Session(_) | Self::Internal(_) | Self::Checkout(CheckoutError::Backend(_))
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        (self.status(), Json(self.body())).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// `Json` extractor whose rejection is an [`AppError`], so malformed bodies
/// get the same JSON error shape as every other failure.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("checkout", "Advanced to driver step", Some(&[("step", "driver")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
