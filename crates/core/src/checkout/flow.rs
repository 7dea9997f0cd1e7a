//! A customer's cart paired with their checkout wizard.

use serde::{Deserialize, Serialize};

use crate::cart::{Cart, CartAction};
use crate::types::CurrencyCode;

use super::backend::{CheckoutBackend, CheckoutReceipt};
use super::forms::ValidationContext;
use super::wizard::{Advance, CheckoutError, CheckoutSubmission, CheckoutWizard, StepInput};

/// The cart and wizard owned by one customer session.
///
/// The wizard is the only writer of the cart during checkout; direct cart
/// edits go through [`CheckoutFlow::update_cart`], which refuses them while a
/// submission is in flight or after the order is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutFlow {
    pub cart: Cart,
    pub wizard: CheckoutWizard,
}

impl CheckoutFlow {
    /// A fresh flow with an empty cart in `currency`.
    #[must_use]
    pub const fn new(currency: CurrencyCode) -> Self {
        Self {
            cart: Cart::new(currency),
            wizard: CheckoutWizard::new(),
        }
    }

    /// Apply a cart action outside the wizard (cart page edits).
    ///
    /// # Errors
    ///
    /// Returns a transition error while submitting or once closed, or the
    /// cart's own error.
    pub fn update_cart(&mut self, action: CartAction) -> Result<(), CheckoutError> {
        self.wizard.ensure_editable()?;
        self.cart.dispatch(action)?;
        Ok(())
    }

    /// See [`CheckoutWizard::advance`].
    ///
    /// # Errors
    ///
    /// Same as [`CheckoutWizard::advance`].
    pub fn advance(
        &mut self,
        input: StepInput,
        ctx: &ValidationContext,
    ) -> Result<Advance, CheckoutError> {
        self.wizard.advance(input, &mut self.cart, ctx)
    }

    /// See [`CheckoutWizard::begin_retry`].
    ///
    /// # Errors
    ///
    /// Same as [`CheckoutWizard::begin_retry`].
    pub fn begin_retry(&mut self) -> Result<CheckoutSubmission, CheckoutError> {
        self.wizard.begin_retry(&self.cart)
    }

    /// Send `submission` through `backend` and record the outcome.
    ///
    /// The flow must already be `Submitting` (after the payment step or
    /// [`Self::begin_retry`]). On failure the flow is left in `Error` with all
    /// data intact and the backend error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NotSubmitting`] or [`CheckoutError::Backend`].
    pub async fn submit<B: CheckoutBackend>(
        &mut self,
        submission: &CheckoutSubmission,
        backend: &B,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        if self.wizard.state() != &super::CheckoutState::Submitting {
            return Err(CheckoutError::NotSubmitting);
        }
        let outcome = backend.create_checkout_session(submission).await;
        self.wizard.complete(outcome.clone(), &mut self.cart)?;
        outcome.map_err(CheckoutError::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::cart::{CartItemKind, RentalPeriod};
    use crate::checkout::forms::{
        DriverForm, InsuranceForm, OptionalForm, OptionalsForm, PaymentForm, PaymentMethodKind,
        VehicleForm,
    };
    use crate::checkout::{BackendError, CheckoutState, CheckoutStep};
    use crate::types::{CartItemId, CheckoutSessionId, DriverId, Price};

    /// Backend stub that fails a configured number of times before succeeding.
    struct FlakyBackend {
        failures_left: Mutex<u32>,
        received: Mutex<Vec<CheckoutSubmission>>,
        receipt: CheckoutReceipt,
    }

    impl FlakyBackend {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: Mutex::new(failures),
                received: Mutex::new(Vec::new()),
                receipt: CheckoutReceipt {
                    checkout_session_id: CheckoutSessionId::new(uuid::Uuid::new_v4()),
                    driver_id: DriverId::new(uuid::Uuid::new_v4()),
                },
            }
        }
    }

    impl CheckoutBackend for FlakyBackend {
        async fn create_checkout_session(
            &self,
            submission: &CheckoutSubmission,
        ) -> Result<CheckoutReceipt, BackendError> {
            self.received.lock().unwrap().push(submission.clone());
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(BackendError::Unavailable("connection reset".to_string()));
            }
            Ok(self.receipt)
        }
    }

    fn ctx() -> ValidationContext {
        ValidationContext::new(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap())
    }

    fn brl(cents: i64) -> Price {
        Price::new(Decimal::new(cents, 2), CurrencyCode::BRL)
    }

    fn vehicle() -> StepInput {
        StepInput::Vehicle(VehicleForm {
            vehicle_id: "onix-2024".to_string(),
            vehicle_name: "Chevrolet Onix".to_string(),
            category: Some("Compact".to_string()),
            plan_id: "plan-onix-daily".to_string(),
            plan_name: "Daily".to_string(),
            period: Some(RentalPeriod::Daily),
            period_count: 1,
            unit_price: Some(Decimal::new(24_600, 2)),
        })
    }

    fn no_optionals() -> StepInput {
        StepInput::Optionals(OptionalsForm::default())
    }

    fn insurance() -> StepInput {
        StepInput::Insurance(InsuranceForm {
            id: "ins-basic".to_string(),
            name: "Basic protection".to_string(),
            unit_price: Some(Decimal::new(7_500, 2)),
        })
    }

    fn driver_form() -> DriverForm {
        DriverForm {
            full_name: "Maria Silva".to_string(),
            email: "maria@example.com".to_string(),
            phone: "11912345678".to_string(),
            birth_date: "1990-05-20".to_string(),
            document_number: "12345678909".to_string(),
            license_number: "AB1234567".to_string(),
            license_expiry: "2030-01-01".to_string(),
        }
    }

    fn payment() -> StepInput {
        StepInput::Payment(PaymentForm {
            method: Some(PaymentMethodKind::Pix),
            installments: None,
        })
    }

    /// Walk the first four steps with valid input.
    fn through_driver(flow: &mut CheckoutFlow) {
        flow.advance(vehicle(), &ctx()).unwrap();
        flow.advance(no_optionals(), &ctx()).unwrap();
        flow.advance(insurance(), &ctx()).unwrap();
        flow.advance(StepInput::Driver(driver_form()), &ctx())
            .unwrap();
    }

    fn confirm(flow: &mut CheckoutFlow) -> CheckoutSubmission {
        match flow.advance(payment(), &ctx()).unwrap() {
            Advance::Submit(submission) => *submission,
            other @ Advance::Moved(_) => panic!("expected submission, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_checkout_completes_and_clears_cart() {
        let mut flow = CheckoutFlow::default();
        assert_eq!(flow.wizard.step_index(), 1);

        through_driver(&mut flow);
        assert_eq!(flow.cart.total(), brl(32_100));
        assert_eq!(flow.wizard.step_index(), 5);

        let submission = confirm(&mut flow);
        assert_eq!(flow.wizard.state(), &CheckoutState::Submitting);
        assert_eq!(submission.total, brl(32_100));
        assert_eq!(submission.items.len(), 2);

        let backend = FlakyBackend::new(0);
        let receipt = flow.submit(&submission, &backend).await.unwrap();

        assert_eq!(
            flow.wizard.state(),
            &CheckoutState::Completed { receipt }
        );
        assert!(flow.cart.is_empty());
        assert_eq!(flow.cart.total(), brl(0));
        assert_eq!(
            flow.cart.checkout_session_id(),
            Some(receipt.checkout_session_id)
        );
        assert_eq!(flow.cart.driver_id(), Some(receipt.driver_id));
    }

    #[tokio::test]
    async fn test_retry_after_failure_reaches_completed() {
        let mut flow = CheckoutFlow::default();
        through_driver(&mut flow);
        let first = confirm(&mut flow);
        let backend = FlakyBackend::new(1);

        let err = flow.submit(&first, &backend).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Backend(_)));
        assert!(matches!(flow.wizard.state(), CheckoutState::Error { .. }));
        assert!(flow.wizard.last_error().is_some());
        assert_eq!(
            flow.wizard.driver().unwrap().email.as_str(),
            "maria@example.com"
        );
        assert_eq!(flow.cart.total(), brl(32_100));

        let retry = flow.begin_retry().unwrap();
        assert_eq!(retry, first);
        flow.submit(&retry, &backend).await.unwrap();

        assert!(matches!(flow.wizard.state(), CheckoutState::Completed { .. }));
        assert!(flow.cart.is_empty());
        assert_eq!(flow.wizard.attempts(), 2);

        let received = backend.received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].reference, received[1].reference);
    }

    #[test]
    fn test_malformed_email_blocks_driver_step() {
        let mut flow = CheckoutFlow::default();
        flow.advance(vehicle(), &ctx()).unwrap();
        flow.advance(no_optionals(), &ctx()).unwrap();
        flow.advance(insurance(), &ctx()).unwrap();
        let before = flow.clone();

        let form = DriverForm {
            email: "not-an-email".to_string(),
            ..driver_form()
        };
        let err = flow.advance(StepInput::Driver(form), &ctx()).unwrap_err();

        match err {
            CheckoutError::Validation(errors) => assert!(errors.contains("email")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(flow.wizard.state(), &CheckoutState::EnteringDriverDetails);
        assert_eq!(flow, before);
    }

    #[test]
    fn test_wrong_step_input_rejected() {
        let mut flow = CheckoutFlow::default();
        let err = flow.advance(insurance(), &ctx()).unwrap_err();
        assert_eq!(
            err,
            CheckoutError::WrongStep {
                expected: CheckoutStep::Vehicle,
                received: CheckoutStep::Insurance,
            }
        );
        assert!(flow.cart.is_empty());
    }

    #[test]
    fn test_retreat_keeps_entered_data() {
        let mut flow = CheckoutFlow::default();
        through_driver(&mut flow);

        assert_eq!(flow.wizard.retreat().unwrap(), CheckoutStep::Driver);
        assert_eq!(flow.wizard.retreat().unwrap(), CheckoutStep::Insurance);
        assert_eq!(flow.wizard.state(), &CheckoutState::SelectingInsurance);
        assert!(flow.wizard.driver().is_some());
        assert!(flow.wizard.insurance().is_some());
        assert_eq!(flow.cart.len(), 2);

        // Going forward again re-validates the step being left.
        flow.advance(insurance(), &ctx()).unwrap();
        assert_eq!(flow.wizard.state(), &CheckoutState::EnteringDriverDetails);
        assert_eq!(flow.cart.len(), 2);
    }

    #[test]
    fn test_retreat_on_first_step_is_noop() {
        let mut flow = CheckoutFlow::default();
        assert_eq!(flow.wizard.retreat().unwrap(), CheckoutStep::Vehicle);
        assert_eq!(flow.wizard.state(), &CheckoutState::SelectingVehicle);
    }

    #[test]
    fn test_reselecting_plan_replaces_plan_line() {
        let mut flow = CheckoutFlow::default();
        flow.advance(vehicle(), &ctx()).unwrap();
        flow.wizard.retreat().unwrap();

        let weekly = StepInput::Vehicle(VehicleForm {
            vehicle_id: "onix-2024".to_string(),
            vehicle_name: "Chevrolet Onix".to_string(),
            category: None,
            plan_id: "plan-onix-weekly".to_string(),
            plan_name: "Weekly".to_string(),
            period: Some(RentalPeriod::Weekly),
            period_count: 2,
            unit_price: Some(Decimal::new(150_000, 2)),
        });
        flow.advance(weekly, &ctx()).unwrap();

        let plans: Vec<_> = flow.cart.items_of_kind(CartItemKind::VehiclePlan).collect();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].id().as_str(), "plan-onix-weekly");
        assert_eq!(flow.cart.total(), brl(300_000));
    }

    #[test]
    fn test_optionals_replace_previous_set() {
        let mut flow = CheckoutFlow::default();
        flow.advance(vehicle(), &ctx()).unwrap();
        let two = StepInput::Optionals(OptionalsForm {
            items: vec![
                OptionalForm {
                    id: "gps".to_string(),
                    name: "GPS".to_string(),
                    unit_price: Some(Decimal::new(1_500, 2)),
                    quantity: 1,
                },
                OptionalForm {
                    id: "seat".to_string(),
                    name: "Child seat".to_string(),
                    unit_price: Some(Decimal::new(2_000, 2)),
                    quantity: 2,
                },
            ],
        });
        flow.advance(two, &ctx()).unwrap();
        assert_eq!(flow.cart.items_of_kind(CartItemKind::Optional).count(), 2);
        assert_eq!(flow.cart.total(), brl(24_600 + 1_500 + 4_000));

        flow.wizard.retreat().unwrap();
        flow.advance(no_optionals(), &ctx()).unwrap();
        assert_eq!(flow.cart.items_of_kind(CartItemKind::Optional).count(), 0);
        assert_eq!(flow.cart.total(), brl(24_600));
    }

    #[test]
    fn test_no_transitions_while_submitting() {
        let mut flow = CheckoutFlow::default();
        through_driver(&mut flow);
        confirm(&mut flow);

        assert_eq!(
            flow.advance(payment(), &ctx()).unwrap_err(),
            CheckoutError::SubmissionInProgress
        );
        assert_eq!(
            flow.wizard.retreat().unwrap_err(),
            CheckoutError::SubmissionInProgress
        );
        assert_eq!(
            flow.wizard.cancel().unwrap_err(),
            CheckoutError::SubmissionInProgress
        );
        assert_eq!(
            flow.begin_retry().unwrap_err(),
            CheckoutError::SubmissionInProgress
        );
        assert_eq!(
            flow.update_cart(CartAction::Clear).unwrap_err(),
            CheckoutError::SubmissionInProgress
        );
        assert_eq!(flow.cart.len(), 2);
    }

    #[test]
    fn test_error_state_requires_retry_or_back() {
        let mut flow = CheckoutFlow::default();
        through_driver(&mut flow);
        confirm(&mut flow);
        flow.wizard
            .complete(
                Err(BackendError::Rejected {
                    status: 409,
                    message: "duplicate reservation".to_string(),
                }),
                &mut flow.cart,
            )
            .unwrap();

        assert_eq!(
            flow.advance(payment(), &ctx()).unwrap_err(),
            CheckoutError::AwaitingRetry
        );
        assert_eq!(flow.wizard.retreat().unwrap(), CheckoutStep::Payment);
        assert!(matches!(
            flow.advance(payment(), &ctx()).unwrap(),
            Advance::Submit(_)
        ));
    }

    #[test]
    fn test_cancel_is_terminal() {
        let mut flow = CheckoutFlow::default();
        flow.advance(vehicle(), &ctx()).unwrap();
        flow.wizard.cancel().unwrap();

        assert_eq!(flow.wizard.state(), &CheckoutState::Cancelled);
        assert_eq!(
            flow.wizard.cancel().unwrap_err(),
            CheckoutError::Closed("cancelled")
        );
        assert_eq!(
            flow.advance(no_optionals(), &ctx()).unwrap_err(),
            CheckoutError::Closed("cancelled")
        );
        assert!(flow.wizard.state().is_terminal());
    }

    #[test]
    fn test_retry_without_failure_rejected() {
        let mut flow = CheckoutFlow::default();
        assert_eq!(
            flow.begin_retry().unwrap_err(),
            CheckoutError::NothingToRetry
        );
    }

    #[test]
    fn test_complete_outside_submitting_rejected() {
        let mut flow = CheckoutFlow::default();
        let receipt = FlakyBackend::new(0).receipt;
        assert_eq!(
            flow.wizard.complete(Ok(receipt), &mut flow.cart).unwrap_err(),
            CheckoutError::NotSubmitting
        );
    }

    #[test]
    fn test_confirm_requires_plan_in_cart() {
        let mut flow = CheckoutFlow::default();
        through_driver(&mut flow);
        flow.update_cart(CartAction::Remove(
            CartItemId::new("plan-onix-daily").unwrap(),
        ))
        .unwrap();

        assert_eq!(
            flow.advance(payment(), &ctx()).unwrap_err(),
            CheckoutError::Incomplete(CheckoutStep::Vehicle)
        );
        assert_eq!(flow.wizard.state(), &CheckoutState::SelectingPayment);
    }

    fn gps(unit_cents: i64) -> StepInput {
        StepInput::Optionals(OptionalsForm {
            items: vec![OptionalForm {
                id: "gps".to_string(),
                name: "GPS".to_string(),
                unit_price: Some(Decimal::new(unit_cents, 2)),
                quantity: 1,
            }],
        })
    }

    #[test]
    fn test_insurance_id_taken_by_optional_rejected() {
        let mut flow = CheckoutFlow::default();
        flow.advance(vehicle(), &ctx()).unwrap();
        flow.advance(gps(1_000), &ctx()).unwrap();
        let before = flow.clone();

        let clashing = StepInput::Insurance(InsuranceForm {
            id: "gps".to_string(),
            name: "Basic protection".to_string(),
            unit_price: Some(Decimal::new(7_500, 2)),
        });
        match flow.advance(clashing, &ctx()).unwrap_err() {
            CheckoutError::Validation(errors) => assert!(errors.contains("id")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(flow, before);
        assert_eq!(flow.cart.total(), brl(24_600 + 1_000));
    }

    #[test]
    fn test_optional_id_taken_by_plan_rejected() {
        let mut flow = CheckoutFlow::default();
        flow.advance(vehicle(), &ctx()).unwrap();

        let clashing = StepInput::Optionals(OptionalsForm {
            items: vec![OptionalForm {
                id: "plan-onix-daily".to_string(),
                name: "Extra day".to_string(),
                unit_price: Some(Decimal::new(1_000, 2)),
                quantity: 1,
            }],
        });
        match flow.advance(clashing, &ctx()).unwrap_err() {
            CheckoutError::Validation(errors) => assert!(errors.contains("items.0.id")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(flow.cart.items_of_kind(CartItemKind::VehiclePlan).count(), 1);
    }

    #[test]
    fn test_confirm_requires_insurance_line() {
        let mut flow = CheckoutFlow::default();
        through_driver(&mut flow);
        flow.update_cart(CartAction::Remove(CartItemId::new("ins-basic").unwrap()))
            .unwrap();

        assert_eq!(
            flow.advance(payment(), &ctx()).unwrap_err(),
            CheckoutError::Incomplete(CheckoutStep::Insurance)
        );
        assert_eq!(flow.wizard.state(), &CheckoutState::SelectingPayment);
    }

    #[test]
    fn test_confirm_requires_optionals_as_selected() {
        let mut flow = CheckoutFlow::default();
        flow.advance(vehicle(), &ctx()).unwrap();
        flow.advance(gps(1_500), &ctx()).unwrap();
        flow.advance(insurance(), &ctx()).unwrap();
        flow.advance(StepInput::Driver(driver_form()), &ctx()).unwrap();
        flow.update_cart(CartAction::UpdateQuantity {
            id: CartItemId::new("gps").unwrap(),
            quantity: 3,
        })
        .unwrap();

        assert_eq!(
            flow.advance(payment(), &ctx()).unwrap_err(),
            CheckoutError::Incomplete(CheckoutStep::Optionals)
        );

        flow.update_cart(CartAction::UpdateQuantity {
            id: CartItemId::new("gps").unwrap(),
            quantity: 1,
        })
        .unwrap();
        let submission = confirm(&mut flow);
        assert_eq!(submission.total, brl(24_600 + 1_500 + 7_500));
    }

    #[test]
    fn test_reference_fixed_once_driver_step_completes() {
        let mut flow = CheckoutFlow::default();
        flow.advance(vehicle(), &ctx()).unwrap();
        flow.advance(no_optionals(), &ctx()).unwrap();
        flow.advance(insurance(), &ctx()).unwrap();
        assert_eq!(flow.wizard.reference(), None);

        flow.advance(StepInput::Driver(driver_form()), &ctx()).unwrap();
        let reference = flow.wizard.reference().unwrap();

        // Editing the driver again keeps the reference.
        flow.wizard.retreat().unwrap();
        flow.advance(StepInput::Driver(driver_form()), &ctx()).unwrap();
        assert_eq!(flow.wizard.reference(), Some(reference));
        assert_eq!(confirm(&mut flow).reference, reference);
    }

    #[test]
    fn test_flow_survives_serde_roundtrip() {
        let mut flow = CheckoutFlow::default();
        through_driver(&mut flow);
        let json = serde_json::to_string(&flow).unwrap();
        let restored: CheckoutFlow = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, flow);
    }
}
