//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                    - Health check
//!
//! # Cart
//! GET    /cart                      - Cart with totals
//! POST   /cart/items                - Add item (replaces an item with the same id)
//! POST   /cart/items/{id}/quantity  - Update quantity
//! DELETE /cart/items/{id}           - Remove item (no-op when absent)
//! DELETE /cart                      - Remove every item
//!
//! # Checkout wizard
//! GET    /checkout                  - Wizard state, entered data and cart
//! POST   /checkout/vehicle          - Step 1: vehicle and plan
//! POST   /checkout/optionals        - Step 2: optional add-ons
//! POST   /checkout/insurance        - Step 3: insurance
//! POST   /checkout/driver           - Step 4: driver details
//! POST   /checkout/payment          - Step 5: payment method, submits the order
//! POST   /checkout/retry            - Resend a failed submission
//! POST   /checkout/back             - Go back one step
//! POST   /checkout/cancel           - Abandon the checkout
//! POST   /checkout/restart          - Start over with an empty cart
//! ```

pub mod cart;
pub mod checkout;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show).delete(cart::clear))
        .route("/items", post(cart::add))
        .route("/items/{id}", delete(cart::remove))
        .route("/items/{id}/quantity", post(cart::update_quantity))
}

/// Create the checkout routes router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(checkout::show))
        .route("/vehicle", post(checkout::vehicle))
        .route("/optionals", post(checkout::optionals))
        .route("/insurance", post(checkout::insurance))
        .route("/driver", post(checkout::driver))
        .route("/payment", post(checkout::payment))
        .route("/retry", post(checkout::retry))
        .route("/back", post(checkout::back))
        .route("/cancel", post(checkout::cancel))
        .route("/restart", post(checkout::restart))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/cart", cart_routes())
        .nest("/checkout", checkout_routes())
}
