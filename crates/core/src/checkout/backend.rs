//! Seam between the wizard and the hosted backend.

use core::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CheckoutSessionId, DriverId};

use super::wizard::CheckoutSubmission;

/// Records the backend created for a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub checkout_session_id: CheckoutSessionId,
    pub driver_id: DriverId,
}

/// Failures of the final submission call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend answered with a non-2xx status.
    #[error("backend rejected the checkout ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request never got an answer (connect error, timeout).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered 2xx with a body we could not use.
    #[error("unexpected backend response: {0}")]
    Unexpected(String),
}

impl BackendError {
    /// Message safe to show to the customer.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { status, message } if (400..500).contains(status) => {
                format!("Your reservation could not be saved: {message}")
            }
            Self::Rejected { .. } | Self::Unavailable(_) => {
                "We could not reach our reservation system. Please try again.".to_string()
            }
            Self::Unexpected(_) => {
                "Something went wrong while saving your reservation. Please try again."
                    .to_string()
            }
        }
    }
}

/// Persists a checkout submission as one atomic insert.
///
/// Implementations must not commit partial state: either the whole
/// submission is stored and a receipt returned, or nothing is.
pub trait CheckoutBackend {
    /// Create the checkout session (and its driver record) for `submission`.
    fn create_checkout_session(
        &self,
        submission: &CheckoutSubmission,
    ) -> impl Future<Output = Result<CheckoutReceipt, BackendError>> + Send;
}
