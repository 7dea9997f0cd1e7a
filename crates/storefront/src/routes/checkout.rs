//! Checkout wizard route handlers.
//!
//! Each step posts its form as JSON. A successful step returns the updated
//! [`CheckoutView`]; a failed validation returns `422` with the failing
//! fields and changes nothing.
//!
//! Posting the payment step confirms the order: the flow enters `Submitting`,
//! is written to the session store, and only then is the backend called.
//! Requests of one session are serialized, so a second submit waits for the
//! first and then gets `409` from the completed or failed flow. A submit that
//! outlives its client still leaves `Submitting` in the store for others to
//! see.

use axum::{Json, extract::State};
use rental_core::{
    Advance, CheckoutError, CheckoutFlow, CheckoutReceipt, CheckoutState, CheckoutStep,
    CheckoutSubmission, CheckoutWizard, DriverDetails, DriverForm, InsuranceForm,
    InsuranceSelection, OptionalSelection, OptionalsForm, PaymentForm, PaymentMethod,
    StepInput, ValidationContext, VehicleForm, VehicleSelection,
};
use serde::Serialize;
use tower_sessions::Session;
use tracing::{info, instrument, warn};

use crate::error::{AppError, AppJson, Result, add_breadcrumb};
use crate::models::{load_flow, save_flow};
use crate::routes::cart::CartView;
use crate::state::AppState;

/// Wizard progress and entered data as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutView {
    /// Tagged with `status` (`selecting_vehicle`, ..., `completed`).
    pub state: CheckoutState,
    pub step: Option<CheckoutStep>,
    pub step_index: usize,
    pub total_steps: usize,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub cart: CartView,
    pub vehicle: Option<VehicleSelection>,
    pub optionals: Option<Vec<OptionalSelection>>,
    pub insurance: Option<InsuranceSelection>,
    pub driver: Option<DriverDetails>,
    pub payment: Option<PaymentMethod>,
}

impl From<&CheckoutFlow> for CheckoutView {
    fn from(flow: &CheckoutFlow) -> Self {
        let wizard = &flow.wizard;
        Self {
            state: wizard.state().clone(),
            step: wizard.state().step(),
            step_index: wizard.step_index(),
            total_steps: CheckoutWizard::TOTAL_STEPS,
            attempts: wizard.attempts(),
            last_error: wizard.last_error().map(String::from),
            cart: CartView::from(&flow.cart),
            vehicle: wizard.vehicle().cloned(),
            optionals: wizard.optionals().map(<[OptionalSelection]>::to_vec),
            insurance: wizard.insurance().cloned(),
            driver: wizard.driver().cloned(),
            payment: wizard.payment().copied(),
        }
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Validate one step and move forward, submitting when it was the last one.
async fn advance_step(
    state: &AppState,
    session: &Session,
    input: StepInput,
) -> Result<Json<CheckoutView>> {
    let mut flow = load_flow(session, state.config().currency).await?;
    let step = input.step();

    match flow.advance(input, &ValidationContext::current())? {
        Advance::Moved(next) => {
            add_breadcrumb(
                "checkout",
                "Completed checkout step",
                Some(&[("step", step.as_str()), ("next", next.as_str())]),
            );
            save_flow(session, &flow).await?;
            Ok(Json(CheckoutView::from(&flow)))
        }
        Advance::Submit(submission) => submit(state, session, flow, *submission).await,
    }
}

/// Send a submission to the backend and record the outcome in the session.
///
/// The backend call runs on its own task so a dropped request cannot leave
/// the flow stuck in `Submitting`.
async fn submit(
    state: &AppState,
    session: &Session,
    mut flow: CheckoutFlow,
    submission: CheckoutSubmission,
) -> Result<Json<CheckoutView>> {
    save_flow(session, &flow).await?;
    session.save().await?;

    let reference = submission.reference.to_string();
    add_breadcrumb(
        "checkout",
        "Submitting checkout",
        Some(&[("reference", reference.as_str())]),
    );

    let backend = state.backend().clone();
    let task_session = session.clone();
    let (flow, outcome) = tokio::spawn(async move {
        let outcome = flow.submit(&submission, &backend).await;
        save_flow(&task_session, &flow).await?;
        task_session.save().await?;
        Ok::<_, tower_sessions::session::Error>((flow, outcome))
    })
    .await
    .map_err(|e| AppError::Internal(format!("checkout submission task failed: {e}")))??;

    match outcome {
        Ok(receipt) => {
            log_completed(&receipt);
            Ok(Json(CheckoutView::from(&flow)))
        }
        Err(err) => {
            warn!(error = %err, attempts = flow.wizard.attempts(), "Checkout submission failed");
            Err(err.into())
        }
    }
}

fn log_completed(receipt: &CheckoutReceipt) {
    info!(
        checkout_session_id = %receipt.checkout_session_id,
        driver_id = %receipt.driver_id,
        "Checkout completed"
    );
    let checkout_session_id = receipt.checkout_session_id.to_string();
    add_breadcrumb(
        "checkout",
        "Checkout completed",
        Some(&[("checkout_session_id", checkout_session_id.as_str())]),
    );
}

// =============================================================================
// Handlers
// =============================================================================

/// Show the wizard and the cart.
#[instrument(skip(state, session))]
pub async fn show(State(state): State<AppState>, session: Session) -> Result<Json<CheckoutView>> {
    let flow = load_flow(&session, state.config().currency).await?;
    Ok(Json(CheckoutView::from(&flow)))
}

/// Step 1: vehicle and plan.
#[instrument(skip(state, session, form), fields(plan_id = %form.plan_id))]
pub async fn vehicle(
    State(state): State<AppState>,
    session: Session,
    AppJson(form): AppJson<VehicleForm>,
) -> Result<Json<CheckoutView>> {
    advance_step(&state, &session, StepInput::Vehicle(form)).await
}

/// Step 2: optional add-ons.
#[instrument(skip(state, session, form), fields(count = form.items.len()))]
pub async fn optionals(
    State(state): State<AppState>,
    session: Session,
    AppJson(form): AppJson<OptionalsForm>,
) -> Result<Json<CheckoutView>> {
    advance_step(&state, &session, StepInput::Optionals(form)).await
}

/// Step 3: insurance.
#[instrument(skip(state, session, form), fields(insurance_id = %form.id))]
pub async fn insurance(
    State(state): State<AppState>,
    session: Session,
    AppJson(form): AppJson<InsuranceForm>,
) -> Result<Json<CheckoutView>> {
    advance_step(&state, &session, StepInput::Insurance(form)).await
}

/// Step 4: driver details.
#[instrument(skip(state, session, form))]
pub async fn driver(
    State(state): State<AppState>,
    session: Session,
    AppJson(form): AppJson<DriverForm>,
) -> Result<Json<CheckoutView>> {
    advance_step(&state, &session, StepInput::Driver(form)).await
}

/// Step 5: payment method. Confirms and submits the order.
#[instrument(skip(state, session, form))]
pub async fn payment(
    State(state): State<AppState>,
    session: Session,
    AppJson(form): AppJson<PaymentForm>,
) -> Result<Json<CheckoutView>> {
    advance_step(&state, &session, StepInput::Payment(form)).await
}

/// Resend a failed submission.
#[instrument(skip(state, session))]
pub async fn retry(State(state): State<AppState>, session: Session) -> Result<Json<CheckoutView>> {
    let mut flow = load_flow(&session, state.config().currency).await?;
    let submission = flow.begin_retry()?;
    submit(&state, &session, flow, submission).await
}

/// Go back one step.
#[instrument(skip(state, session))]
pub async fn back(State(state): State<AppState>, session: Session) -> Result<Json<CheckoutView>> {
    let mut flow = load_flow(&session, state.config().currency).await?;
    let step = flow.wizard.retreat()?;
    add_breadcrumb("checkout", "Went back", Some(&[("step", step.as_str())]));
    save_flow(&session, &flow).await?;
    Ok(Json(CheckoutView::from(&flow)))
}

/// Abandon the checkout.
#[instrument(skip(state, session))]
pub async fn cancel(State(state): State<AppState>, session: Session) -> Result<Json<CheckoutView>> {
    let mut flow = load_flow(&session, state.config().currency).await?;
    flow.wizard.cancel()?;
    add_breadcrumb("checkout", "Cancelled checkout", None);
    save_flow(&session, &flow).await?;
    Ok(Json(CheckoutView::from(&flow)))
}

/// Discard the session's flow and start over with an empty cart.
#[instrument(skip(state, session))]
pub async fn restart(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<CheckoutView>> {
    let flow = load_flow(&session, state.config().currency).await?;
    if flow.wizard.state() == &CheckoutState::Submitting {
        return Err(CheckoutError::SubmissionInProgress.into());
    }

    let fresh = CheckoutFlow::new(state.config().currency);
    save_flow(&session, &fresh).await?;
    Ok(Json(CheckoutView::from(&fresh)))
}
