//! Checkout wizard state machine.
//!
//! ```text
//! SelectingVehicle -> SelectingOptionals -> SelectingInsurance
//!     -> EnteringDriverDetails -> SelectingPayment -> Submitting
//!                                                      |-> Completed
//!                                                      '-> Error -> (retry) Submitting
//! any in-progress step -> Cancelled
//! ```
//!
//! Forward moves require the current step's form to validate; a failed
//! validation mutates neither the wizard nor the cart. Backward moves never
//! require validation and never discard data already entered. While
//! `Submitting`, every transition except [`CheckoutWizard::complete`] is
//! refused, which is what prevents a double submission.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cart::{Cart, CartAction, CartError, CartItem, CartItemKind, Quantity};
use crate::types::{CartItemId, CurrencyCode, Price};

use super::backend::{BackendError, CheckoutReceipt};
use super::forms::{
    DriverDetails, DriverForm, InsuranceForm, InsuranceSelection, OptionalSelection,
    OptionalsForm, PaymentForm, PaymentMethod, StepForm, ValidationContext, ValidationErrors,
    VehicleForm, VehicleSelection,
};

/// The five data-entry steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    Vehicle,
    Optionals,
    Insurance,
    Driver,
    Payment,
}

impl CheckoutStep {
    /// Every step in wizard order.
    pub const ALL: [Self; 5] = [
        Self::Vehicle,
        Self::Optionals,
        Self::Insurance,
        Self::Driver,
        Self::Payment,
    ];

    /// Number of data-entry steps.
    pub const TOTAL: usize = Self::ALL.len();

    /// 1-based position of the step.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Vehicle => 1,
            Self::Optionals => 2,
            Self::Insurance => 3,
            Self::Driver => 4,
            Self::Payment => 5,
        }
    }

    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::Vehicle => Some(Self::Optionals),
            Self::Optionals => Some(Self::Insurance),
            Self::Insurance => Some(Self::Driver),
            Self::Driver => Some(Self::Payment),
            Self::Payment => None,
        }
    }

    #[must_use]
    pub const fn previous(&self) -> Option<Self> {
        match self {
            Self::Vehicle => None,
            Self::Optionals => Some(Self::Vehicle),
            Self::Insurance => Some(Self::Optionals),
            Self::Driver => Some(Self::Insurance),
            Self::Payment => Some(Self::Driver),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Vehicle => "vehicle",
            Self::Optionals => "optionals",
            Self::Insurance => "insurance",
            Self::Driver => "driver",
            Self::Payment => "payment",
        }
    }
}

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the wizard currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckoutState {
    SelectingVehicle,
    SelectingOptionals,
    SelectingInsurance,
    EnteringDriverDetails,
    SelectingPayment,
    /// The backend call is in flight.
    Submitting,
    Completed {
        receipt: CheckoutReceipt,
    },
    /// The last submission failed; data is retained for a retry.
    Error {
        message: String,
    },
    /// The customer abandoned the checkout.
    Cancelled,
}

impl CheckoutState {
    /// The in-progress state for `step`.
    #[must_use]
    pub const fn at(step: CheckoutStep) -> Self {
        match step {
            CheckoutStep::Vehicle => Self::SelectingVehicle,
            CheckoutStep::Optionals => Self::SelectingOptionals,
            CheckoutStep::Insurance => Self::SelectingInsurance,
            CheckoutStep::Driver => Self::EnteringDriverDetails,
            CheckoutStep::Payment => Self::SelectingPayment,
        }
    }

    /// The data-entry step, if the wizard is on one.
    #[must_use]
    pub const fn step(&self) -> Option<CheckoutStep> {
        match self {
            Self::SelectingVehicle => Some(CheckoutStep::Vehicle),
            Self::SelectingOptionals => Some(CheckoutStep::Optionals),
            Self::SelectingInsurance => Some(CheckoutStep::Insurance),
            Self::EnteringDriverDetails => Some(CheckoutStep::Driver),
            Self::SelectingPayment => Some(CheckoutStep::Payment),
            Self::Submitting | Self::Completed { .. } | Self::Error { .. } | Self::Cancelled => {
                None
            }
        }
    }

    /// Completed or cancelled.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Cancelled)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SelectingVehicle => "selecting_vehicle",
            Self::SelectingOptionals => "selecting_optionals",
            Self::SelectingInsurance => "selecting_insurance",
            Self::EnteringDriverDetails => "entering_driver_details",
            Self::SelectingPayment => "selecting_payment",
            Self::Submitting => "submitting",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors returned by wizard transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    /// The step's form failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// The step's cart update was refused.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// Input posted for a step other than the current one.
    #[error("expected {expected} step input, got {received}")]
    WrongStep {
        expected: CheckoutStep,
        received: CheckoutStep,
    },

    /// A submission is in flight.
    #[error("a submission is already in progress")]
    SubmissionInProgress,

    /// The wizard is completed or cancelled.
    #[error("checkout is already {0}")]
    Closed(&'static str),

    /// Input posted after a failed submission.
    #[error("the last submission failed; retry it or go back to edit")]
    AwaitingRetry,

    /// Retry requested without a failed submission.
    #[error("there is no failed submission to retry")]
    NothingToRetry,

    /// `complete` called outside `Submitting`.
    #[error("no submission is in progress")]
    NotSubmitting,

    /// A step's data is missing when building the submission.
    #[error("the {0} step has not been completed")]
    Incomplete(CheckoutStep),

    /// The backend refused or failed the submission.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Input for one data-entry step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepInput {
    Vehicle(VehicleForm),
    Optionals(OptionalsForm),
    Insurance(InsuranceForm),
    Driver(DriverForm),
    Payment(PaymentForm),
}

impl StepInput {
    /// The step this input belongs to.
    #[must_use]
    pub const fn step(&self) -> CheckoutStep {
        match self {
            Self::Vehicle(_) => VehicleForm::STEP,
            Self::Optionals(_) => OptionalsForm::STEP,
            Self::Insurance(_) => InsuranceForm::STEP,
            Self::Driver(_) => DriverForm::STEP,
            Self::Payment(_) => PaymentForm::STEP,
        }
    }
}

/// Result of a successful [`CheckoutWizard::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Moved to the given step.
    Moved(CheckoutStep),
    /// The payment step confirmed the order; send this to the backend.
    Submit(Box<CheckoutSubmission>),
}

/// Everything the backend needs to persist the order, captured at
/// confirmation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSubmission {
    /// Stable across retries so the backend can recognise a resend.
    pub reference: Uuid,
    pub currency: CurrencyCode,
    pub items: Vec<CartItem>,
    pub total: Price,
    pub vehicle: VehicleSelection,
    pub optionals: Vec<OptionalSelection>,
    pub insurance: InsuranceSelection,
    pub driver: DriverDetails,
    pub payment: PaymentMethod,
}

/// The checkout wizard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutWizard {
    state: CheckoutState,
    vehicle: Option<VehicleSelection>,
    optionals: Option<Vec<OptionalSelection>>,
    insurance: Option<InsuranceSelection>,
    driver: Option<DriverDetails>,
    payment: Option<PaymentMethod>,
    reference: Option<Uuid>,
    attempts: u32,
}

impl Default for CheckoutWizard {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckoutWizard {
    /// Total number of data-entry steps.
    pub const TOTAL_STEPS: usize = CheckoutStep::TOTAL;

    /// A wizard on its first step.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: CheckoutState::SelectingVehicle,
            vehicle: None,
            optionals: None,
            insurance: None,
            driver: None,
            payment: None,
            reference: None,
            attempts: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &CheckoutState {
        &self.state
    }

    /// 1-based index of the current step; steps past data entry report the
    /// last step.
    #[must_use]
    pub const fn step_index(&self) -> usize {
        match self.state.step() {
            Some(step) => step.index(),
            None => Self::TOTAL_STEPS,
        }
    }

    /// Message of the last failed submission, if the wizard is in `Error`.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        match &self.state {
            CheckoutState::Error { message } => Some(message),
            _ => None,
        }
    }

    /// Number of submissions started so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn vehicle(&self) -> Option<&VehicleSelection> {
        self.vehicle.as_ref()
    }

    #[must_use]
    pub fn optionals(&self) -> Option<&[OptionalSelection]> {
        self.optionals.as_deref()
    }

    #[must_use]
    pub const fn insurance(&self) -> Option<&InsuranceSelection> {
        self.insurance.as_ref()
    }

    #[must_use]
    pub const fn driver(&self) -> Option<&DriverDetails> {
        self.driver.as_ref()
    }

    #[must_use]
    pub const fn payment(&self) -> Option<&PaymentMethod> {
        self.payment.as_ref()
    }

    /// Order reference sent with every submission of this checkout. Assigned
    /// once the driver step is complete.
    #[must_use]
    pub const fn reference(&self) -> Option<Uuid> {
        self.reference
    }

    /// Validate `input` for the current step and move forward.
    ///
    /// The cart is updated with the step's line items. The payment step is
    /// the confirmation action: on success the wizard enters `Submitting` and
    /// the submission snapshot is returned.
    ///
    /// # Errors
    ///
    /// Returns the validation errors, a cart error, or a transition error.
    /// Neither the wizard nor the cart change on error.
    pub fn advance(
        &mut self,
        input: StepInput,
        cart: &mut Cart,
        ctx: &ValidationContext,
    ) -> Result<Advance, CheckoutError> {
        let current = self.current_step()?;
        let received = input.step();
        if received != current {
            return Err(CheckoutError::WrongStep {
                expected: current,
                received,
            });
        }

        let mut staged = cart.clone();
        let currency = staged.currency();

        match input {
            StepInput::Vehicle(form) => {
                let selection = form.validate(ctx)?;
                ensure_ids_free(
                    cart,
                    CartItemKind::VehiclePlan,
                    [("plan_id".to_string(), &selection.plan_id)],
                )?;
                staged.dispatch(CartAction::RemoveKind(CartItemKind::VehiclePlan))?;
                staged.dispatch(CartAction::Add(plan_item(&selection, currency)?))?;
                *cart = staged;
                self.vehicle = Some(selection);
            }
            StepInput::Optionals(form) => {
                let selections = form.validate(ctx)?;
                ensure_ids_free(
                    cart,
                    CartItemKind::Optional,
                    selections
                        .iter()
                        .enumerate()
                        .map(|(index, selection)| (format!("items.{index}.id"), &selection.id)),
                )?;
                staged.dispatch(CartAction::RemoveKind(CartItemKind::Optional))?;
                for selection in &selections {
                    staged.dispatch(CartAction::Add(optional_item(selection, currency)?))?;
                }
                *cart = staged;
                self.optionals = Some(selections);
            }
            StepInput::Insurance(form) => {
                let selection = form.validate(ctx)?;
                ensure_ids_free(
                    cart,
                    CartItemKind::Insurance,
                    [("id".to_string(), &selection.id)],
                )?;
                staged.dispatch(CartAction::RemoveKind(CartItemKind::Insurance))?;
                staged.dispatch(CartAction::Add(insurance_item(&selection, currency)?))?;
                *cart = staged;
                self.insurance = Some(selection);
            }
            StepInput::Driver(form) => {
                self.driver = Some(form.validate(ctx)?);
                // Fixed before confirmation so concurrent confirms share one reference.
                self.reference.get_or_insert_with(Uuid::new_v4);
            }
            StepInput::Payment(form) => {
                let payment = form.validate(ctx)?;
                let reference = self.reference.unwrap_or_else(Uuid::new_v4);
                let submission = self.snapshot(cart, payment, reference)?;
                self.payment = Some(payment);
                self.reference = Some(reference);
                self.begin_submitting();
                return Ok(Advance::Submit(Box::new(submission)));
            }
        }

        let next = current.next().unwrap_or(current);
        self.state = CheckoutState::at(next);
        Ok(Advance::Moved(next))
    }

    /// Go back one step without validation.
    ///
    /// A no-op on the first step. From `Error` it returns to the payment step
    /// so the customer can edit before retrying.
    ///
    /// # Errors
    ///
    /// Refused while submitting and once completed or cancelled.
    pub fn retreat(&mut self) -> Result<CheckoutStep, CheckoutError> {
        let target = match &self.state {
            CheckoutState::Submitting => return Err(CheckoutError::SubmissionInProgress),
            state @ (CheckoutState::Completed { .. } | CheckoutState::Cancelled) => {
                return Err(CheckoutError::Closed(state.name()));
            }
            CheckoutState::Error { .. } => CheckoutStep::Payment,
            state => {
                let step = state.step().unwrap_or(CheckoutStep::Vehicle);
                step.previous().unwrap_or(step)
            }
        };
        self.state = CheckoutState::at(target);
        Ok(target)
    }

    /// Re-enter `Submitting` after a failed submission.
    ///
    /// The snapshot is rebuilt from the retained data and keeps the original
    /// reference.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NothingToRetry`] unless the wizard is in
    /// `Error`.
    pub fn begin_retry(&mut self, cart: &Cart) -> Result<CheckoutSubmission, CheckoutError> {
        if !matches!(self.state, CheckoutState::Error { .. }) {
            return Err(match &self.state {
                CheckoutState::Submitting => CheckoutError::SubmissionInProgress,
                _ => CheckoutError::NothingToRetry,
            });
        }
        let payment = self
            .payment
            .ok_or(CheckoutError::Incomplete(CheckoutStep::Payment))?;
        let reference = self.reference.unwrap_or_else(Uuid::new_v4);
        let submission = self.snapshot(cart, payment, reference)?;
        self.reference = Some(reference);
        self.begin_submitting();
        Ok(submission)
    }

    /// Record the outcome of the backend call.
    ///
    /// On success the correlation ids are attached to the cart, the cart is
    /// cleared and the wizard completes. On failure the wizard moves to
    /// `Error` and keeps every entered value.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NotSubmitting`] outside `Submitting`.
    pub fn complete(
        &mut self,
        outcome: Result<CheckoutReceipt, BackendError>,
        cart: &mut Cart,
    ) -> Result<(), CheckoutError> {
        if self.state != CheckoutState::Submitting {
            return Err(CheckoutError::NotSubmitting);
        }
        self.state = match outcome {
            Ok(receipt) => {
                cart.dispatch(CartAction::SetCheckoutSession(receipt.checkout_session_id))?;
                cart.dispatch(CartAction::SetDriverId(receipt.driver_id))?;
                cart.dispatch(CartAction::Clear)?;
                CheckoutState::Completed { receipt }
            }
            Err(error) => CheckoutState::Error {
                message: error.user_message(),
            },
        };
        Ok(())
    }

    /// Abandon the checkout.
    ///
    /// # Errors
    ///
    /// Refused while submitting and once completed or cancelled.
    pub fn cancel(&mut self) -> Result<(), CheckoutError> {
        match &self.state {
            CheckoutState::Submitting => Err(CheckoutError::SubmissionInProgress),
            state @ (CheckoutState::Completed { .. } | CheckoutState::Cancelled) => {
                Err(CheckoutError::Closed(state.name()))
            }
            _ => {
                self.state = CheckoutState::Cancelled;
                Ok(())
            }
        }
    }

    /// Refuse cart edits that would race a submission or touch a closed order.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::cancel`].
    pub fn ensure_editable(&self) -> Result<(), CheckoutError> {
        match &self.state {
            CheckoutState::Submitting => Err(CheckoutError::SubmissionInProgress),
            state @ (CheckoutState::Completed { .. } | CheckoutState::Cancelled) => {
                Err(CheckoutError::Closed(state.name()))
            }
            _ => Ok(()),
        }
    }

    fn current_step(&self) -> Result<CheckoutStep, CheckoutError> {
        match &self.state {
            CheckoutState::Submitting => Err(CheckoutError::SubmissionInProgress),
            CheckoutState::Error { .. } => Err(CheckoutError::AwaitingRetry),
            state @ (CheckoutState::Completed { .. } | CheckoutState::Cancelled) => {
                Err(CheckoutError::Closed(state.name()))
            }
            state => state
                .step()
                .ok_or(CheckoutError::Closed("unavailable")),
        }
    }

    fn begin_submitting(&mut self) {
        self.state = CheckoutState::Submitting;
        self.attempts = self.attempts.saturating_add(1);
    }

    fn snapshot(
        &self,
        cart: &Cart,
        payment: PaymentMethod,
        reference: Uuid,
    ) -> Result<CheckoutSubmission, CheckoutError> {
        let vehicle = self
            .vehicle
            .clone()
            .ok_or(CheckoutError::Incomplete(CheckoutStep::Vehicle))?;
        let optionals = self
            .optionals
            .clone()
            .ok_or(CheckoutError::Incomplete(CheckoutStep::Optionals))?;
        let insurance = self
            .insurance
            .clone()
            .ok_or(CheckoutError::Incomplete(CheckoutStep::Insurance))?;
        let driver = self
            .driver
            .clone()
            .ok_or(CheckoutError::Incomplete(CheckoutStep::Driver))?;

        // Cart page edits can drop or change a step's lines after the step.
        if !has_line(
            cart,
            CartItemKind::VehiclePlan,
            &vehicle.plan_id,
            vehicle.unit_price,
            vehicle.period_count,
        ) {
            return Err(CheckoutError::Incomplete(CheckoutStep::Vehicle));
        }
        if !optionals.iter().all(|optional| {
            has_line(
                cart,
                CartItemKind::Optional,
                &optional.id,
                optional.unit_price,
                optional.quantity,
            )
        }) {
            return Err(CheckoutError::Incomplete(CheckoutStep::Optionals));
        }
        if !has_line(
            cart,
            CartItemKind::Insurance,
            &insurance.id,
            insurance.unit_price,
            Quantity::ONE,
        ) {
            return Err(CheckoutError::Incomplete(CheckoutStep::Insurance));
        }

        Ok(CheckoutSubmission {
            reference,
            currency: cart.currency(),
            items: cart.items().to_vec(),
            total: cart.total(),
            vehicle,
            optionals,
            insurance,
            driver,
            payment,
        })
    }
}

/// Refuse ids already taken by another kind of line; adding them would
/// replace that line.
fn ensure_ids_free<'a>(
    cart: &Cart,
    kind: CartItemKind,
    ids: impl IntoIterator<Item = (String, &'a CartItemId)>,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    for (field, id) in ids {
        if let Some(existing) = cart.get(id.as_str()).filter(|item| item.kind() != kind) {
            let kind = existing.kind().as_str();
            errors.push(field, format!("is already used by the {kind} item in the cart"));
        }
    }
    errors.into_result(())
}

/// The cart holds `id` as a `kind` line at this price and quantity.
fn has_line(
    cart: &Cart,
    kind: CartItemKind,
    id: &CartItemId,
    unit_price: Decimal,
    quantity: Quantity,
) -> bool {
    cart.get(id.as_str()).is_some_and(|item| {
        item.kind() == kind
            && item.unit_price().amount == unit_price
            && item.quantity() == quantity
    })
}

fn plan_item(selection: &VehicleSelection, currency: CurrencyCode) -> Result<CartItem, CartError> {
    let mut item = CartItem::new(
        selection.plan_id.clone(),
        CartItemKind::VehiclePlan,
        format!("{} - {}", selection.vehicle_name, selection.plan_name),
        Price::new(selection.unit_price, currency),
        selection.period_count,
    )?
    .with_period(selection.period);
    if let Some(category) = &selection.category {
        item = item.with_category(category.clone());
    }
    Ok(item)
}

fn optional_item(
    selection: &OptionalSelection,
    currency: CurrencyCode,
) -> Result<CartItem, CartError> {
    CartItem::new(
        selection.id.clone(),
        CartItemKind::Optional,
        selection.name.clone(),
        Price::new(selection.unit_price, currency),
        selection.quantity,
    )
}

fn insurance_item(
    selection: &InsuranceSelection,
    currency: CurrencyCode,
) -> Result<CartItem, CartError> {
    CartItem::new(
        selection.id.clone(),
        CartItemKind::Insurance,
        selection.name.clone(),
        Price::new(selection.unit_price, currency),
        Quantity::ONE,
    )
}
