//! External services used by the storefront.
//!
//! - [`backend`] - Hosted backend REST client; implements
//!   [`rental_core::CheckoutBackend`] for the final checkout submission

pub mod backend;

pub use backend::{BackendClient, BackendClientError};
