//! Session-related types.
//!
//! Each browser session owns one [`CheckoutFlow`]: the cart and the checkout
//! wizard. It is stored as a single value so both always change together.

use rental_core::{CheckoutFlow, CurrencyCode};
use tower_sessions::Session;

/// Session keys for checkout data.
pub mod keys {
    /// Key for the session's cart and checkout wizard.
    pub const CHECKOUT_FLOW: &str = "checkout_flow";
}

/// Load the session's flow, starting a fresh one priced in `currency` when
/// the session has none yet.
///
/// # Errors
///
/// Returns error if the session store fails or the stored value no longer
/// deserializes.
pub async fn load_flow(
    session: &Session,
    currency: CurrencyCode,
) -> Result<CheckoutFlow, tower_sessions::session::Error> {
    Ok(session
        .get::<CheckoutFlow>(keys::CHECKOUT_FLOW)
        .await?
        .unwrap_or_else(|| CheckoutFlow::new(currency)))
}

/// Store the flow back into the session.
///
/// # Errors
///
/// Returns error if the flow cannot be serialized into the session.
pub async fn save_flow(
    session: &Session,
    flow: &CheckoutFlow,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(keys::CHECKOUT_FLOW, flow).await
}
