//! Rental Core - cart store, checkout wizard and shared types.
//!
//! This crate holds everything the storefront needs to model a customer's
//! rental order before it is persisted:
//!
//! - [`types`] - Newtype wrappers for ids, prices and email addresses
//! - [`cart`] - The cart store: line items, the action set and derived totals
//! - [`checkout`] - Step forms, validation and the checkout wizard state machine
//!
//! # Architecture
//!
//! The core crate contains only types, pure state transitions and traits - no
//! HTTP clients and no session storage. The final submission goes through the
//! [`checkout::CheckoutBackend`] trait, which the storefront implements.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod checkout;
pub mod types;

pub use cart::{Cart, CartAction, CartError, CartItem, CartItemKind, Quantity, RentalPeriod};
pub use checkout::{
    Advance, BackendError, CheckoutBackend, CheckoutError, CheckoutFlow, CheckoutReceipt,
    CheckoutState, CheckoutStep, CheckoutSubmission, CheckoutWizard, DriverDetails, DriverForm,
    FieldError, InsuranceForm, InsuranceSelection, OptionalForm, OptionalSelection,
    OptionalsForm, PaymentForm, PaymentMethod, PaymentMethodKind, StepInput, ValidationContext,
    ValidationErrors, VehicleForm, VehicleSelection,
};
pub use types::*;
