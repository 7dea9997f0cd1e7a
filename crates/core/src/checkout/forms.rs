//! Checkout step forms and their validation.
//!
//! Each wizard step receives a plain form struct (what the browser posts) and
//! validates it into a typed payload. Validation collects every failing field
//! instead of stopping at the first one, so the storefront can show all
//! messages at once.

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cart::{CartError, Quantity, RentalPeriod};
use crate::types::{CartItemId, Email};

use super::wizard::CheckoutStep;

/// Minimum driver age, in whole years, at the validation date.
pub const MIN_DRIVER_AGE: u32 = 21;

/// Minimum number of digits in a driver's document (CPF has 11).
pub const MIN_DOCUMENT_DIGITS: usize = 11;

/// Minimum length of a driver's licence number.
pub const MIN_LICENSE_LENGTH: usize = 9;

/// Accepted phone number length in digits, country code included.
pub const PHONE_DIGITS: core::ops::RangeInclusive<usize> = 10..=15;

/// Credit card installment range.
pub const INSTALLMENTS: core::ops::RangeInclusive<u8> = 1..=12;

/// Date format used by every date field.
const DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Validation errors
// =============================================================================

/// One field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Form field name, dotted for nested fields (`items.0.quantity`).
    pub field: String,
    /// Human-readable message.
    pub message: String,
}

/// Every field-level failure of one form submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("invalid {}", field_names(.fields))]
pub struct ValidationErrors {
    fields: Vec<FieldError>,
}

fn field_names(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| f.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ValidationErrors {
    /// An empty error set.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// A single-field error.
    #[must_use]
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    /// Record a failing field.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldError] {
        &self.fields
    }

    /// Returns true if `field` has at least one error.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }

    /// `Ok(value)` when no error was recorded.
    ///
    /// # Errors
    ///
    /// Returns `self` when any field failed.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

/// Inputs that validation depends on besides the form itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    /// Date used for age and licence-expiry checks.
    pub today: NaiveDate,
}

impl ValidationContext {
    #[must_use]
    pub const fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// Context for the current UTC date.
    #[must_use]
    pub fn current() -> Self {
        Self::new(Utc::now().date_naive())
    }
}

/// A form that validates into the payload of one checkout step.
pub trait StepForm {
    /// Validated payload.
    type Output;

    /// The step this form belongs to.
    const STEP: CheckoutStep;

    /// Validate the form.
    ///
    /// # Errors
    ///
    /// Returns every failing field.
    fn validate(&self, ctx: &ValidationContext) -> Result<Self::Output, ValidationErrors>;
}

// =============================================================================
// Field helpers
// =============================================================================

fn required_text(errors: &mut ValidationErrors, field: &str, value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.push(field, "is required");
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn required_id(errors: &mut ValidationErrors, field: &str, value: &str) -> Option<CartItemId> {
    let id = CartItemId::new(value);
    if id.is_none() {
        errors.push(field, CartError::EmptyId.to_string());
    }
    id
}

fn price(errors: &mut ValidationErrors, field: &str, value: Option<Decimal>) -> Option<Decimal> {
    match value {
        None => {
            errors.push(field, "is required");
            None
        }
        Some(value) if value.is_sign_negative() && !value.is_zero() => {
            errors.push(field, CartError::NegativePrice.to_string());
            None
        }
        Some(value) => Some(value),
    }
}

fn quantity(errors: &mut ValidationErrors, field: &str, value: i64) -> Option<Quantity> {
    Quantity::new(value)
        .map_err(|e| errors.push(field, e.to_string()))
        .ok()
}

fn date(errors: &mut ValidationErrors, field: &str, value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| errors.push(field, "must be a date in YYYY-MM-DD format"))
        .ok()
}

fn digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Whole years between `birth` and `today`.
fn age_on(birth: NaiveDate, today: NaiveDate) -> Option<u32> {
    let mut years = today.year().checked_sub(birth.year())?;
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

// =============================================================================
// Step 1: vehicle and plan
// =============================================================================

/// Vehicle and rental plan selected by the customer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleForm {
    pub vehicle_id: String,
    pub vehicle_name: String,
    pub category: Option<String>,
    pub plan_id: String,
    pub plan_name: String,
    pub period: Option<RentalPeriod>,
    /// Number of periods rented (days, weeks or months).
    pub period_count: i64,
    /// Price of a single period.
    pub unit_price: Option<Decimal>,
}

/// Validated vehicle step payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSelection {
    pub vehicle_id: String,
    pub vehicle_name: String,
    pub category: Option<String>,
    pub plan_id: CartItemId,
    pub plan_name: String,
    pub period: RentalPeriod,
    pub period_count: Quantity,
    pub unit_price: Decimal,
}

impl StepForm for VehicleForm {
    type Output = VehicleSelection;
    const STEP: CheckoutStep = CheckoutStep::Vehicle;

    fn validate(&self, _ctx: &ValidationContext) -> Result<VehicleSelection, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let vehicle_id = required_text(&mut errors, "vehicle_id", &self.vehicle_id);
        let vehicle_name = required_text(&mut errors, "vehicle_name", &self.vehicle_name);
        let plan_id = required_id(&mut errors, "plan_id", &self.plan_id);
        let plan_name = required_text(&mut errors, "plan_name", &self.plan_name);
        let period = self.period;
        if period.is_none() {
            errors.push("period", "is required");
        }
        let period_count = quantity(&mut errors, "period_count", self.period_count);
        let unit_price = price(&mut errors, "unit_price", self.unit_price);

        match (
            vehicle_id,
            vehicle_name,
            plan_id,
            plan_name,
            period,
            period_count,
            unit_price,
        ) {
            (
                Some(vehicle_id),
                Some(vehicle_name),
                Some(plan_id),
                Some(plan_name),
                Some(period),
                Some(period_count),
                Some(unit_price),
            ) if errors.is_empty() => Ok(VehicleSelection {
                vehicle_id,
                vehicle_name,
                category: self
                    .category
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_owned),
                plan_id,
                plan_name,
                period,
                period_count,
                unit_price,
            }),
            _ => Err(errors),
        }
    }
}

// =============================================================================
// Step 2: optionals
// =============================================================================

/// One optional add-on line (child seat, GPS, extra driver, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionalForm {
    pub id: String,
    pub name: String,
    pub unit_price: Option<Decimal>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

const fn default_quantity() -> i64 {
    1
}

/// Optional add-ons; an empty list means none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionalsForm {
    pub items: Vec<OptionalForm>,
}

/// Validated optional add-on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalSelection {
    pub id: CartItemId,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: Quantity,
}

impl StepForm for OptionalsForm {
    type Output = Vec<OptionalSelection>;
    const STEP: CheckoutStep = CheckoutStep::Optionals;

    fn validate(
        &self,
        _ctx: &ValidationContext,
    ) -> Result<Vec<OptionalSelection>, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let mut selections = Vec::with_capacity(self.items.len());

        for (index, item) in self.items.iter().enumerate() {
            let id = required_id(&mut errors, &format!("items.{index}.id"), &item.id);
            let name = required_text(&mut errors, &format!("items.{index}.name"), &item.name);
            let unit_price = price(
                &mut errors,
                &format!("items.{index}.unit_price"),
                item.unit_price,
            );
            let qty = quantity(
                &mut errors,
                &format!("items.{index}.quantity"),
                item.quantity,
            );

            let duplicate = id
                .as_ref()
                .is_some_and(|id| selections.iter().any(|s: &OptionalSelection| &s.id == id));
            if duplicate {
                errors.push(format!("items.{index}.id"), "is selected more than once");
            }

            if let (Some(id), Some(name), Some(unit_price), Some(quantity)) =
                (id, name, unit_price, qty)
            {
                selections.push(OptionalSelection {
                    id,
                    name,
                    unit_price,
                    quantity,
                });
            }
        }

        errors.into_result(selections)
    }
}

// =============================================================================
// Step 3: insurance
// =============================================================================

/// Insurance product chosen for the rental.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsuranceForm {
    pub id: String,
    pub name: String,
    pub unit_price: Option<Decimal>,
}

/// Validated insurance choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceSelection {
    pub id: CartItemId,
    pub name: String,
    pub unit_price: Decimal,
}

impl StepForm for InsuranceForm {
    type Output = InsuranceSelection;
    const STEP: CheckoutStep = CheckoutStep::Insurance;

    fn validate(&self, _ctx: &ValidationContext) -> Result<InsuranceSelection, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let id = required_id(&mut errors, "id", &self.id);
        let name = required_text(&mut errors, "name", &self.name);
        let unit_price = price(&mut errors, "unit_price", self.unit_price);

        match (id, name, unit_price) {
            (Some(id), Some(name), Some(unit_price)) => Ok(InsuranceSelection {
                id,
                name,
                unit_price,
            }),
            _ => Err(errors),
        }
    }
}

// =============================================================================
// Step 4: driver details
// =============================================================================

/// Driver details as typed by the customer.
///
/// Missing fields deserialize as empty and fail validation like blank ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverForm {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    /// `YYYY-MM-DD`.
    pub birth_date: String,
    pub document_number: String,
    pub license_number: String,
    /// `YYYY-MM-DD`.
    pub license_expiry: String,
}

/// Validated driver details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverDetails {
    pub full_name: String,
    pub email: Email,
    /// Digits only.
    pub phone: String,
    pub birth_date: NaiveDate,
    /// Digits only.
    pub document_number: String,
    /// Uppercased, whitespace removed.
    pub license_number: String,
    pub license_expiry: NaiveDate,
}

impl StepForm for DriverForm {
    type Output = DriverDetails;
    const STEP: CheckoutStep = CheckoutStep::Driver;

    fn validate(&self, ctx: &ValidationContext) -> Result<DriverDetails, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let full_name = required_text(&mut errors, "full_name", &self.full_name)
            .map(|name| name.split_whitespace().collect::<Vec<_>>().join(" "));
        if full_name
            .as_deref()
            .is_some_and(|name| name.split(' ').count() < 2)
        {
            errors.push("full_name", "must include first and last name");
        }

        let email = Email::parse(&self.email)
            .map_err(|e| errors.push("email", e.to_string()))
            .ok();

        let phone = digits(&self.phone);
        if !PHONE_DIGITS.contains(&phone.len()) {
            errors.push(
                "phone",
                format!(
                    "must have between {} and {} digits",
                    PHONE_DIGITS.start(),
                    PHONE_DIGITS.end()
                ),
            );
        }

        let birth_date = date(&mut errors, "birth_date", &self.birth_date);
        if let Some(birth) = birth_date {
            match age_on(birth, ctx.today) {
                Some(age) if age >= MIN_DRIVER_AGE => {}
                _ => errors.push(
                    "birth_date",
                    format!("driver must be at least {MIN_DRIVER_AGE} years old"),
                ),
            }
        }

        let document_number = digits(&self.document_number);
        if document_number.len() < MIN_DOCUMENT_DIGITS {
            errors.push(
                "document_number",
                format!("must have at least {MIN_DOCUMENT_DIGITS} digits"),
            );
        }

        let license_number: String = self
            .license_number
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        if license_number.chars().count() < MIN_LICENSE_LENGTH {
            errors.push(
                "license_number",
                format!("must have at least {MIN_LICENSE_LENGTH} characters"),
            );
        }

        let license_expiry = date(&mut errors, "license_expiry", &self.license_expiry);
        if license_expiry.is_some_and(|expiry| expiry < ctx.today) {
            errors.push("license_expiry", "licence has expired");
        }

        match (full_name, email, birth_date, license_expiry) {
            (Some(full_name), Some(email), Some(birth_date), Some(license_expiry))
                if errors.is_empty() =>
            {
                Ok(DriverDetails {
                    full_name,
                    email,
                    phone,
                    birth_date,
                    document_number,
                    license_number,
                    license_expiry,
                })
            }
            _ => Err(errors),
        }
    }
}

// =============================================================================
// Step 5: payment
// =============================================================================

/// Payment methods offered at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    CreditCard,
    Pix,
    BankSlip,
}

/// Payment choice as posted by the customer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentForm {
    pub method: Option<PaymentMethodKind>,
    pub installments: Option<i64>,
}

/// Validated payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard { installments: u8 },
    Pix,
    BankSlip,
}

impl StepForm for PaymentForm {
    type Output = PaymentMethod;
    const STEP: CheckoutStep = CheckoutStep::Payment;

    fn validate(&self, _ctx: &ValidationContext) -> Result<PaymentMethod, ValidationErrors> {
        match self.method {
            None => Err(ValidationErrors::single("method", "is required")),
            Some(PaymentMethodKind::Pix) => Ok(PaymentMethod::Pix),
            Some(PaymentMethodKind::BankSlip) => Ok(PaymentMethod::BankSlip),
            Some(PaymentMethodKind::CreditCard) => {
                let installments = self.installments.unwrap_or(1);
                u8::try_from(installments)
                    .ok()
                    .filter(|n| INSTALLMENTS.contains(n))
                    .map(|installments| PaymentMethod::CreditCard { installments })
                    .ok_or_else(|| {
                        ValidationErrors::single(
                            "installments",
                            format!(
                                "must be between {} and {}",
                                INSTALLMENTS.start(),
                                INSTALLMENTS.end()
                            ),
                        )
                    })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ctx() -> ValidationContext {
        ValidationContext::new(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap())
    }

    fn driver() -> DriverForm {
        DriverForm {
            full_name: "Maria  Silva".to_string(),
            email: "Maria@Example.com".to_string(),
            phone: "+55 (11) 91234-5678".to_string(),
            birth_date: "1990-05-20".to_string(),
            document_number: "123.456.789-09".to_string(),
            license_number: "ab 1234567".to_string(),
            license_expiry: "2030-01-01".to_string(),
        }
    }

    #[test]
    fn test_driver_valid_normalizes() {
        let details = driver().validate(&ctx()).unwrap();
        assert_eq!(details.full_name, "Maria Silva");
        assert_eq!(details.email.as_str(), "maria@example.com");
        assert_eq!(details.phone, "5511912345678");
        assert_eq!(details.document_number, "12345678909");
        assert_eq!(details.license_number, "AB1234567");
    }

    #[test]
    fn test_driver_malformed_email() {
        let form = DriverForm {
            email: "not-an-email".to_string(),
            ..driver()
        };
        let errors = form.validate(&ctx()).unwrap_err();
        assert!(errors.contains("email"));
        assert_eq!(errors.fields().len(), 1);
    }

    #[test]
    fn test_driver_collects_every_failure() {
        let form = DriverForm {
            full_name: "Maria".to_string(),
            email: String::new(),
            phone: "123".to_string(),
            birth_date: "20/05/1990".to_string(),
            document_number: "1234".to_string(),
            license_number: "X1".to_string(),
            license_expiry: "2020-01-01".to_string(),
        };
        let errors = form.validate(&ctx()).unwrap_err();
        for field in [
            "full_name",
            "email",
            "phone",
            "birth_date",
            "document_number",
            "license_number",
            "license_expiry",
        ] {
            assert!(errors.contains(field), "missing error for {field}");
        }
    }

    #[test]
    fn test_driver_minimum_age() {
        // Turns 21 the day after the context date.
        let form = DriverForm {
            birth_date: "2005-10-18".to_string(),
            ..driver()
        };
        assert!(form.validate(&ctx()).unwrap_err().contains("birth_date"));

        let form = DriverForm {
            birth_date: "2005-10-17".to_string(),
            ..driver()
        };
        assert!(form.validate(&ctx()).is_ok());
    }

    #[test]
    fn test_validation_errors_display() {
        let mut errors = ValidationErrors::new();
        errors.push("email", "bad");
        errors.push("phone", "bad");
        assert_eq!(errors.to_string(), "invalid email, phone");
    }

    #[test]
    fn test_vehicle_requires_fields() {
        let errors = VehicleForm::default().validate(&ctx()).unwrap_err();
        for field in [
            "vehicle_id",
            "vehicle_name",
            "plan_id",
            "plan_name",
            "period",
            "period_count",
            "unit_price",
        ] {
            assert!(errors.contains(field), "missing error for {field}");
        }
    }

    #[test]
    fn test_vehicle_negative_price() {
        let form = VehicleForm {
            vehicle_id: "v1".to_string(),
            vehicle_name: "Onix".to_string(),
            category: Some("  ".to_string()),
            plan_id: "plan-daily".to_string(),
            plan_name: "Daily".to_string(),
            period: Some(RentalPeriod::Daily),
            period_count: 3,
            unit_price: Some(Decimal::new(-1, 0)),
        };
        let errors = form.validate(&ctx()).unwrap_err();
        assert!(errors.contains("unit_price"));

        let ok = VehicleForm {
            unit_price: Some(Decimal::new(24_600, 2)),
            ..form
        }
        .validate(&ctx())
        .unwrap();
        assert_eq!(ok.category, None);
        assert_eq!(ok.period_count.get(), 3);
    }

    #[test]
    fn test_optionals_empty_is_valid() {
        assert!(OptionalsForm::default().validate(&ctx()).unwrap().is_empty());
    }

    #[test]
    fn test_optionals_duplicate_and_quantity() {
        let form = OptionalsForm {
            items: vec![
                OptionalForm {
                    id: "gps".to_string(),
                    name: "GPS".to_string(),
                    unit_price: Some(Decimal::new(1_500, 2)),
                    quantity: 1,
                },
                OptionalForm {
                    id: "gps".to_string(),
                    name: "GPS again".to_string(),
                    unit_price: Some(Decimal::new(1_500, 2)),
                    quantity: 1,
                },
                OptionalForm {
                    id: "seat".to_string(),
                    name: "Child seat".to_string(),
                    unit_price: Some(Decimal::new(2_000, 2)),
                    quantity: 0,
                },
            ],
        };
        let errors = form.validate(&ctx()).unwrap_err();
        assert!(errors.contains("items.1.id"));
        assert!(errors.contains("items.2.quantity"));
        assert!(!errors.contains("items.0.id"));
    }

    #[test]
    fn test_payment() {
        let pix = PaymentForm {
            method: Some(PaymentMethodKind::Pix),
            installments: None,
        };
        assert_eq!(pix.validate(&ctx()).unwrap(), PaymentMethod::Pix);

        let card = PaymentForm {
            method: Some(PaymentMethodKind::CreditCard),
            installments: Some(6),
        };
        assert_eq!(
            card.validate(&ctx()).unwrap(),
            PaymentMethod::CreditCard { installments: 6 }
        );

        let too_many = PaymentForm {
            method: Some(PaymentMethodKind::CreditCard),
            installments: Some(13),
        };
        assert!(too_many.validate(&ctx()).unwrap_err().contains("installments"));

        assert!(
            PaymentForm::default()
                .validate(&ctx())
                .unwrap_err()
                .contains("method")
        );
    }

    #[test]
    fn test_empty_body_deserializes_and_fails_validation() {
        let form: DriverForm = serde_json::from_str("{}").unwrap();
        let errors = form.validate(&ctx()).unwrap_err();
        for field in [
            "full_name",
            "email",
            "phone",
            "birth_date",
            "document_number",
            "license_number",
            "license_expiry",
        ] {
            assert!(errors.contains(field), "missing error for {field}");
        }

        let form: OptionalsForm =
            serde_json::from_str(r#"{"items":[{"id":"gps","name":"GPS"}]}"#).unwrap();
        assert_eq!(form.items[0].quantity, 1);
        let errors = form.validate(&ctx()).unwrap_err();
        assert!(errors.contains("items.0.unit_price"));

        let form: InsuranceForm = serde_json::from_str("{}").unwrap();
        let errors = form.validate(&ctx()).unwrap_err();
        for field in ["id", "name", "unit_price"] {
            assert!(errors.contains(field), "missing error for {field}");
        }
    }

    #[test]
    fn test_payment_method_serde_tag() {
        let json = serde_json::to_value(PaymentMethod::CreditCard { installments: 3 }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "method": "credit_card", "installments": 3 })
        );
    }
}
