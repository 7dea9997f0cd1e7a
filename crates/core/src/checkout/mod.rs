//! Checkout: step forms, the wizard state machine and the backend seam.
//!
//! # Modules
//!
//! - [`forms`] - Per-step form structs, typed payloads and validation
//! - [`wizard`] - [`CheckoutWizard`], its states and transition errors
//! - [`flow`] - [`CheckoutFlow`], the cart + wizard pair held per session
//! - [`backend`] - [`CheckoutBackend`], implemented by the storefront

pub mod backend;
pub mod flow;
pub mod forms;
pub mod wizard;

pub use backend::{BackendError, CheckoutBackend, CheckoutReceipt};
pub use flow::CheckoutFlow;
pub use forms::{
    DriverDetails, DriverForm, FieldError, InsuranceForm, InsuranceSelection, OptionalForm,
    OptionalSelection, OptionalsForm, PaymentForm, PaymentMethod, PaymentMethodKind, StepForm,
    ValidationContext, ValidationErrors, VehicleForm, VehicleSelection,
};
pub use wizard::{
    Advance, CheckoutError, CheckoutState, CheckoutStep, CheckoutSubmission, CheckoutWizard,
    StepInput,
};
