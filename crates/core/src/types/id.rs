//! Newtype IDs for type-safe entity references.
//!
//! Records created by the hosted backend are keyed by UUIDs; use the
//! `define_id!` macro to wrap them so a driver id can never be passed where a
//! checkout session id is expected. Cart line items are keyed by the catalog's
//! string identifiers instead, see [`CartItemId`].

use core::fmt;

use serde::{Deserialize, Serialize};

/// Macro to define a type-safe UUID-backed ID wrapper.
///
/// Creates a newtype wrapper around [`uuid::Uuid`] with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`
/// - Conversion methods: `new()`, `as_uuid()`
/// - `From<Uuid>`, `Display` and `FromStr` implementations
///
/// # Example
///
/// ```rust
/// # use rental_core::define_id;
/// define_id!(ReservationId);
/// define_id!(VehicleRecordId);
///
/// let reservation = ReservationId::new(uuid::Uuid::nil());
/// let vehicle = VehicleRecordId::new(uuid::Uuid::nil());
///
/// // These are different types, so this won't compile:
/// // let _: ReservationId = vehicle;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(::uuid::Uuid);

        impl $name {
            /// Wrap an existing UUID.
            #[must_use]
            pub const fn new(id: ::uuid::Uuid) -> Self {
                Self(id)
            }

            /// Get the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> ::uuid::Uuid {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<::uuid::Uuid> for $name {
            fn from(id: ::uuid::Uuid) -> Self {
                Self(id)
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = ::uuid::Error;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                ::uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

// Records owned by the hosted backend
define_id!(CheckoutSessionId);
define_id!(DriverId);

/// Identifier of a cart line item.
///
/// Line items reuse the catalog identifier of the thing being rented (a plan
/// id, an optional's id, an insurance product id), so the value is an opaque
/// non-empty string rather than a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartItemId(String);

impl CartItemId {
    /// Create a new item id, trimming surrounding whitespace.
    ///
    /// Returns `None` when the trimmed value is empty.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Option<Self> {
        let trimmed = id.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_owned()))
        }
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CartItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CartItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for CartItemId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for CartItemId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_item_id_trims() {
        let id = CartItemId::new("  plan-basic ").unwrap();
        assert_eq!(id.as_str(), "plan-basic");
        assert_eq!(id, "plan-basic");
    }

    #[test]
    fn test_cart_item_id_rejects_blank() {
        assert!(CartItemId::new("").is_none());
        assert!(CartItemId::new("   ").is_none());
    }

    #[test]
    fn test_uuid_id_parse_and_display() {
        let raw = "6f1c2b3a-9d4e-4f5a-8b6c-7d8e9f0a1b2c";
        let id: CheckoutSessionId = raw.parse().unwrap();
        assert_eq!(id.to_string(), raw);
        assert!("not-a-uuid".parse::<DriverId>().is_err());
    }

    #[test]
    fn test_uuid_id_serde_is_transparent() {
        let id = DriverId::new(uuid::Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }
}
