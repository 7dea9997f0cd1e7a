//! Cart route handlers.
//!
//! The cart lives in the session's [`CheckoutFlow`](rental_core::CheckoutFlow)
//! and every edit goes through the flow, so cart changes are refused while a
//! checkout submission is in flight or after the order is closed.

use axum::{
    Json,
    extract::{Path, State},
};
use rental_core::{
    Cart, CartAction, CartError, CartItem, CartItemId, CartItemKind, CheckoutSessionId,
    CurrencyCode, DriverId, Price, Quantity, RentalPeriod,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use crate::error::{AppError, AppJson, Result};
use crate::models::{load_flow, save_flow};
use crate::state::AppState;

/// Cart line item as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct CartItemView {
    pub id: String,
    pub kind: CartItemKind,
    pub name: String,
    pub category: Option<String>,
    pub period: Option<RentalPeriod>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    /// Formatted line total (e.g. "R$ 246.00").
    pub total_display: String,
}

/// Cart as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub currency: CurrencyCode,
    pub items: Vec<CartItemView>,
    pub total: Decimal,
    pub total_display: String,
    pub item_count: u64,
    pub checkout_session_id: Option<CheckoutSessionId>,
    pub driver_id: Option<DriverId>,
}

impl From<&CartItem> for CartItemView {
    fn from(item: &CartItem) -> Self {
        Self {
            id: item.id().to_string(),
            kind: item.kind(),
            name: item.name().to_string(),
            category: item.category().map(String::from),
            period: item.period(),
            quantity: item.quantity().get(),
            unit_price: item.unit_price().amount,
            total_price: item.total_price().amount,
            total_display: item.total_price().display(),
        }
    }
}

impl From<&Cart> for CartView {
    fn from(cart: &Cart) -> Self {
        let total = cart.total();
        Self {
            currency: cart.currency(),
            items: cart.items().iter().map(CartItemView::from).collect(),
            total: total.amount,
            total_display: total.display(),
            item_count: cart.item_count(),
            checkout_session_id: cart.checkout_session_id(),
            driver_id: cart.driver_id(),
        }
    }
}

/// Add-to-cart request body.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub id: String,
    pub kind: CartItemKind,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub period: Option<RentalPeriod>,
    pub unit_price: Decimal,
    /// Defaults to the cart's currency.
    #[serde(default)]
    pub currency: Option<CurrencyCode>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

const fn default_quantity() -> i64 {
    1
}

impl AddItemRequest {
    /// Build the line item, priced in `cart_currency` unless the request
    /// names a currency.
    fn into_item(self, cart_currency: CurrencyCode) -> std::result::Result<CartItem, CartError> {
        let id = CartItemId::new(&self.id).ok_or(CartError::EmptyId)?;
        let currency = self.currency.unwrap_or(cart_currency);
        let mut item = CartItem::new(
            id,
            self.kind,
            self.name,
            Price::new(self.unit_price, currency),
            Quantity::new(self.quantity)?,
        )?;
        if let Some(category) = self.category {
            item = item.with_category(category);
        }
        if let Some(period) = self.period {
            item = item.with_period(period);
        }
        Ok(item)
    }
}

/// Quantity update request body.
#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i64,
}

fn item_id(raw: &str) -> Result<CartItemId> {
    CartItemId::new(raw).ok_or_else(|| AppError::BadRequest("item id cannot be empty".to_string()))
}

/// Apply one cart action to the session's flow and return the new cart.
async fn apply(state: &AppState, session: &Session, action: CartAction) -> Result<Json<CartView>> {
    let mut flow = load_flow(session, state.config().currency).await?;
    flow.update_cart(action)?;
    save_flow(session, &flow).await?;
    Ok(Json(CartView::from(&flow.cart)))
}

/// Show the cart.
#[instrument(skip(state, session))]
pub async fn show(State(state): State<AppState>, session: Session) -> Result<Json<CartView>> {
    let flow = load_flow(&session, state.config().currency).await?;
    Ok(Json(CartView::from(&flow.cart)))
}

/// Add an item, replacing any item with the same id.
#[instrument(skip(state, session, request), fields(item_id = %request.id))]
pub async fn add(
    State(state): State<AppState>,
    session: Session,
    AppJson(request): AppJson<AddItemRequest>,
) -> Result<Json<CartView>> {
    let currency = load_flow(&session, state.config().currency)
        .await?
        .cart
        .currency();
    let item = request.into_item(currency)?;
    apply(&state, &session, CartAction::Add(item)).await
}

/// Change an item's quantity.
#[instrument(skip(state, session))]
pub async fn update_quantity(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
    AppJson(request): AppJson<UpdateQuantityRequest>,
) -> Result<Json<CartView>> {
    let action = CartAction::UpdateQuantity {
        id: item_id(&id)?,
        quantity: request.quantity,
    };
    apply(&state, &session, action).await
}

/// Remove an item. Unknown ids are ignored.
#[instrument(skip(state, session))]
pub async fn remove(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<Json<CartView>> {
    apply(&state, &session, CartAction::Remove(item_id(&id)?)).await
}

/// Remove every item.
#[instrument(skip(state, session))]
pub async fn clear(State(state): State<AppState>, session: Session) -> Result<Json<CartView>> {
    apply(&state, &session, CartAction::Clear).await
}
