//! Session middleware configuration.
//!
//! Sessions live in a bounded moka cache. Records expire with their cookie,
//! and once the store is full the least recently used sessions are evicted.
//! The cart and checkout wizard live only in the session until the final
//! submission.

use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_moka_store::MokaStore;

use crate::config::StorefrontConfig;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "rental_session";

/// Session expiry time in seconds (24 hours).
const SESSION_EXPIRY_SECONDS: i64 = 24 * 60 * 60;

/// Build the in-memory session store, capped at the configured capacity.
#[must_use]
pub fn create_session_store(config: &StorefrontConfig) -> MokaStore {
    MokaStore::new(Some(config.session_capacity))
}

/// Create the session layer over `store`.
#[must_use]
pub fn create_session_layer(
    config: &StorefrontConfig,
    store: MokaStore,
) -> SessionManagerLayer<MokaStore> {
    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY_SECONDS),
        ))
        .with_secure(config.is_secure())
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}
