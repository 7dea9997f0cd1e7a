//! Cart store.
//!
//! The cart holds the line items a customer selected (vehicle plan, optional
//! add-ons, insurance) and derives the order total from them. Every mutation
//! is one of the [`CartAction`] variants: [`Cart::dispatch`] applies an action
//! value, the named methods (`add`, `remove`, ...) apply a single variant.
//!
//! # Invariants
//!
//! - Item ids are unique. Adding an item whose id is already present replaces
//!   the existing item in place instead of appending a duplicate.
//! - `total_price == unit_price × quantity` for every item. Both fields are
//!   private and recomputed on construction, quantity change and
//!   deserialization.
//! - Every item is priced in the cart's currency.
//! - The sum of item totals fits a `Decimal`; an action that would overflow
//!   it is refused with [`CartError::AmountOverflow`].
//! - A failed action leaves the cart untouched.

use std::num::NonZeroU32;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CartItemId, CheckoutSessionId, CurrencyCode, DriverId, Price};

/// Errors produced by cart actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// Quantity below one.
    #[error("quantity must be at least 1 (got {0})")]
    InvalidQuantity(i64),

    /// Quantity does not fit the supported range.
    #[error("quantity {0} is too large")]
    QuantityTooLarge(i64),

    /// No item with this id.
    #[error("no cart item with id '{0}'")]
    ItemNotFound(CartItemId),

    /// Item priced in a different currency than the cart.
    #[error("item is priced in {found}, but the cart uses {expected}")]
    CurrencyMismatch {
        expected: CurrencyCode,
        found: CurrencyCode,
    },

    /// Negative unit price.
    #[error("price cannot be negative")]
    NegativePrice,

    /// Blank item id.
    #[error("item id cannot be empty")]
    EmptyId,

    /// Blank item name.
    #[error("item name cannot be empty")]
    EmptyName,

    /// An item total or the cart total overflowed.
    #[error("amount is too large")]
    AmountOverflow,
}

/// What kind of billable thing a line item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CartItemKind {
    VehiclePlan,
    Optional,
    Insurance,
}

impl CartItemKind {
    /// Stable label used in logs and the backend payload.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::VehiclePlan => "vehicle-plan",
            Self::Optional => "optional",
            Self::Insurance => "insurance",
        }
    }
}

/// Billing period of a rental plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalPeriod {
    Daily,
    Weekly,
    Monthly,
}

/// A line item quantity, always at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(NonZeroU32);

impl Quantity {
    /// A quantity of one.
    pub const ONE: Self = Self(NonZeroU32::MIN);

    /// Validate a raw quantity.
    ///
    /// Takes an `i64` so that zero and negative input coming from forms can be
    /// reported rather than silently wrapped.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::InvalidQuantity`] when `value < 1` and
    /// [`CartError::QuantityTooLarge`] when it exceeds `u32::MAX`.
    pub fn new(value: i64) -> Result<Self, CartError> {
        if value < 1 {
            return Err(CartError::InvalidQuantity(value));
        }
        u32::try_from(value)
            .ok()
            .and_then(NonZeroU32::new)
            .map(Self)
            .ok_or(CartError::QuantityTooLarge(value))
    }

    /// The quantity as a plain integer.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

/// One selected line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CartItemRecord")]
pub struct CartItem {
    id: CartItemId,
    kind: CartItemKind,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    period: Option<RentalPeriod>,
    quantity: Quantity,
    unit_price: Price,
    total_price: Price,
}

/// Serialized shape of a [`CartItem`]; `total_price` is ignored on input and
/// recomputed.
#[derive(Deserialize)]
struct CartItemRecord {
    id: CartItemId,
    kind: CartItemKind,
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    period: Option<RentalPeriod>,
    quantity: Quantity,
    unit_price: Price,
}

impl TryFrom<CartItemRecord> for CartItem {
    type Error = CartError;

    fn try_from(record: CartItemRecord) -> Result<Self, Self::Error> {
        let mut item = Self::new(
            record.id,
            record.kind,
            record.name,
            record.unit_price,
            record.quantity,
        )?;
        item.category = record.category;
        item.period = record.period;
        Ok(item)
    }
}

impl CartItem {
    /// Build a line item, computing its total.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank, the unit price is negative, or
    /// the total overflows.
    pub fn new(
        id: CartItemId,
        kind: CartItemKind,
        name: impl Into<String>,
        unit_price: Price,
        quantity: Quantity,
    ) -> Result<Self, CartError> {
        let name = name.into().trim().to_owned();
        if name.is_empty() {
            return Err(CartError::EmptyName);
        }
        if unit_price.is_negative() {
            return Err(CartError::NegativePrice);
        }
        let total_price = unit_price
            .checked_times(quantity.get())
            .ok_or(CartError::AmountOverflow)?;

        Ok(Self {
            id,
            kind,
            name,
            category: None,
            period: None,
            quantity,
            unit_price,
            total_price,
        })
    }

    /// Attach a descriptive category (e.g. the vehicle group).
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        self.category = (!category.trim().is_empty()).then_some(category);
        self
    }

    /// Attach the billing period for plan items.
    #[must_use]
    pub fn with_period(mut self, period: RentalPeriod) -> Self {
        self.period = Some(period);
        self
    }

    #[must_use]
    pub const fn id(&self) -> &CartItemId {
        &self.id
    }

    #[must_use]
    pub const fn kind(&self) -> CartItemKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    #[must_use]
    pub const fn period(&self) -> Option<RentalPeriod> {
        self.period
    }

    #[must_use]
    pub const fn quantity(&self) -> Quantity {
        self.quantity
    }

    #[must_use]
    pub const fn unit_price(&self) -> Price {
        self.unit_price
    }

    /// `unit_price × quantity`.
    #[must_use]
    pub const fn total_price(&self) -> Price {
        self.total_price
    }

    fn with_quantity(&self, quantity: Quantity) -> Result<Self, CartError> {
        let total_price = self
            .unit_price
            .checked_times(quantity.get())
            .ok_or(CartError::AmountOverflow)?;
        Ok(Self {
            quantity,
            total_price,
            ..self.clone()
        })
    }
}

/// The fixed set of cart mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartAction {
    /// Insert an item, replacing any item with the same id.
    Add(CartItem),
    /// Remove an item; absent ids are ignored.
    Remove(CartItemId),
    /// Remove every item of a kind; used when a wizard step replaces a group.
    RemoveKind(CartItemKind),
    /// Change an item's quantity.
    UpdateQuantity { id: CartItemId, quantity: i64 },
    /// Attach the backend checkout session id.
    SetCheckoutSession(CheckoutSessionId),
    /// Attach the backend driver id.
    SetDriverId(DriverId),
    /// Drop every line item.
    Clear,
}

/// The customer's cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CartRecord")]
pub struct Cart {
    currency: CurrencyCode,
    items: Vec<CartItem>,
    checkout_session_id: Option<CheckoutSessionId>,
    driver_id: Option<DriverId>,
}

/// Serialized shape of a [`Cart`]; checked against the cart invariants on
/// input.
#[derive(Deserialize)]
struct CartRecord {
    currency: CurrencyCode,
    items: Vec<CartItem>,
    #[serde(default)]
    checkout_session_id: Option<CheckoutSessionId>,
    #[serde(default)]
    driver_id: Option<DriverId>,
}

impl TryFrom<CartRecord> for Cart {
    type Error = CartError;

    fn try_from(record: CartRecord) -> Result<Self, Self::Error> {
        let mut cart = Self::new(record.currency);
        for item in record.items {
            cart.add(item)?;
        }
        cart.checkout_session_id = record.checkout_session_id;
        cart.driver_id = record.driver_id;
        Ok(cart)
    }
}

/// Sum of item totals, `None` on overflow.
fn sum_totals(items: &[CartItem]) -> Option<Decimal> {
    items
        .iter()
        .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.total_price.amount))
}

impl Cart {
    /// Create an empty cart priced in `currency`.
    #[must_use]
    pub const fn new(currency: CurrencyCode) -> Self {
        Self {
            currency,
            items: Vec::new(),
            checkout_session_id: None,
            driver_id: None,
        }
    }

    /// Apply one action.
    ///
    /// # Errors
    ///
    /// Returns a [`CartError`] when the action is invalid; the cart is left
    /// unchanged in that case.
    pub fn dispatch(&mut self, action: CartAction) -> Result<(), CartError> {
        match action {
            CartAction::Add(item) => {
                if item.unit_price.currency_code != self.currency {
                    return Err(CartError::CurrencyMismatch {
                        expected: self.currency,
                        found: item.unit_price.currency_code,
                    });
                }
                let mut items = self.items.clone();
                match items.iter_mut().find(|existing| existing.id == item.id) {
                    Some(slot) => *slot = item,
                    None => items.push(item),
                }
                self.replace_items(items)?;
            }
            CartAction::Remove(id) => self.remove(&id),
            CartAction::RemoveKind(kind) => self.remove_kind(kind),
            CartAction::UpdateQuantity { id, quantity } => {
                let quantity = Quantity::new(quantity)?;
                let mut items = self.items.clone();
                let slot = items
                    .iter_mut()
                    .find(|item| item.id == id)
                    .ok_or(CartError::ItemNotFound(id))?;
                *slot = slot.with_quantity(quantity)?;
                self.replace_items(items)?;
            }
            CartAction::SetCheckoutSession(id) => self.set_checkout_session(id),
            CartAction::SetDriverId(id) => self.set_driver_id(id),
            CartAction::Clear => self.clear(),
        }
        Ok(())
    }

    /// Add or replace an item.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::CurrencyMismatch`] if the item uses another currency.
    pub fn add(&mut self, item: CartItem) -> Result<(), CartError> {
        self.dispatch(CartAction::Add(item))
    }

    /// Remove an item if present.
    pub fn remove(&mut self, id: &CartItemId) {
        self.items.retain(|item| &item.id != id);
    }

    /// Remove every item of `kind`.
    pub fn remove_kind(&mut self, kind: CartItemKind) {
        self.items.retain(|item| item.kind != kind);
    }

    /// Change the quantity of an existing item.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::InvalidQuantity`] for `quantity < 1` and
    /// [`CartError::ItemNotFound`] for unknown ids.
    pub fn update_quantity(&mut self, id: &CartItemId, quantity: i64) -> Result<(), CartError> {
        self.dispatch(CartAction::UpdateQuantity {
            id: id.clone(),
            quantity,
        })
    }

    /// Attach the checkout session created by the backend.
    pub const fn set_checkout_session(&mut self, id: CheckoutSessionId) {
        self.checkout_session_id = Some(id);
    }

    /// Attach the driver record created by the backend.
    pub const fn set_driver_id(&mut self, id: DriverId) {
        self.driver_id = Some(id);
    }

    /// Drop every line item. Correlation ids are kept.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Sum of every item's total, computed on each call.
    ///
    /// Actions whose sum would overflow are refused, so the sum always fits.
    #[must_use]
    pub fn total(&self) -> Price {
        let amount = sum_totals(&self.items).unwrap_or(Decimal::MAX);
        Price::new(amount, self.currency)
    }

    /// Sum of quantities across items.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.items
            .iter()
            .map(|item| u64::from(item.quantity.get()))
            .sum()
    }

    /// Items in display order.
    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Items of one kind, in display order.
    pub fn items_of_kind(&self, kind: CartItemKind) -> impl Iterator<Item = &CartItem> {
        self.items.iter().filter(move |item| item.kind == kind)
    }

    /// Look up an item by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id == id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub const fn currency(&self) -> CurrencyCode {
        self.currency
    }

    #[must_use]
    pub const fn checkout_session_id(&self) -> Option<CheckoutSessionId> {
        self.checkout_session_id
    }

    #[must_use]
    pub const fn driver_id(&self) -> Option<DriverId> {
        self.driver_id
    }

    fn replace_items(&mut self, items: Vec<CartItem>) -> Result<(), CartError> {
        sum_totals(&items).ok_or(CartError::AmountOverflow)?;
        self.items = items;
        Ok(())
    }
}
