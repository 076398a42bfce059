//! Strongly typed identifiers.
//!
//! Every entity gets its own UUID newtype so a `WalletId` can never be passed
//! where a `CompetitionId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Creates a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a competition
    CompetitionId
);
uuid_id!(
    /// Unique identifier for a platform user
    UserId
);
uuid_id!(
    /// Unique identifier for an issued ticket
    TicketId
);
uuid_id!(
    /// Unique identifier for a universal (cross-competition) ticket credit
    UniversalTicketId
);
uuid_id!(
    /// Unique identifier for an instant-win slot
    InstantWinId
);
uuid_id!(
    /// Unique identifier for a wallet
    WalletId
);
uuid_id!(
    /// Unique identifier for a wallet ledger entry
    WalletTransactionId
);
uuid_id!(
    /// Unique identifier for a purchase (checkout attempt)
    PurchaseId
);
uuid_id!(
    /// Unique identifier for a voucher
    VoucherId
);
uuid_id!(
    /// Unique identifier for a physical prize fulfillment claim
    PrizeClaimId
);

/// Reference to a payment recorded by the external gateway collaborator.
///
/// Opaque to the engine; it only ever compares and looks it up.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentReference(String);

impl PaymentReference {
    /// Wraps an existing reference string
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Generates a fresh reference for a payment intent created by the engine
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("pay_{}", Uuid::new_v4().simple()))
    }

    /// Returns the reference as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_and_displayable() {
        let a = CompetitionId::new();
        let b = CompetitionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn generated_payment_references_are_prefixed() {
        let reference = PaymentReference::generate();
        assert!(reference.as_str().starts_with("pay_"));
        assert_ne!(reference, PaymentReference::generate());
    }
}
