//! Error taxonomy of the allocation engine.
//!
//! Every rejected request leaves all entities as they were before the call:
//! errors raised inside a unit of work roll it back before they reach the
//! caller.

use prizedraw_core::model::{CompetitionStatus, LimitKind, PaymentStatus, PurchaseStatus};
use prizedraw_core::{CompetitionId, Money, PaymentReference, PurchaseId, StoreError};
use thiserror::Error;

/// Result type alias for allocation operations.
pub type Result<T> = std::result::Result<T, AllocationError>;

/// Why a voucher code was rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VoucherRejection {
    /// No voucher has this code
    #[error("unknown code")]
    NotFound,
    /// Disabled by an administrator
    #[error("voucher is not active")]
    Inactive,
    /// Validity window has not started
    #[error("voucher is not valid yet")]
    NotYetValid,
    /// Validity window has ended
    #[error("voucher has expired")]
    Expired,
    /// Global usage cap reached
    #[error("usage limit reached")]
    UsageLimitReached,
    /// Single-use voucher already redeemed by this user
    #[error("already used")]
    AlreadyUsed,
    /// Free-entry vouchers cover exactly one ticket
    #[error("free-entry vouchers apply to a single ticket, {quantity} requested")]
    FreeEntryRequiresSingleTicket {
        /// Paid tickets requested
        quantity: u32,
    },
    /// The chosen funding path carries no charge to discount
    #[error("nothing to discount for this funding path")]
    NotApplicable,
}

/// Coarse error class, mirroring how callers must react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request rejected before any mutation; no retry
    Validation,
    /// Not enough funds of some kind; caller must intervene
    Funds,
    /// External payment inconsistent with the charge; fatal for the request
    Payment,
    /// Lock timeout or connectivity; the whole call may be retried
    Infrastructure,
    /// Locking-discipline bug; log and alert
    Invariant,
}

/// Errors returned by the allocation engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AllocationError {
    // ═══════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════
    /// Competition does not exist.
    #[error("Competition {0} not found")]
    CompetitionNotFound(CompetitionId),

    /// Competition exists but is not open for entries.
    #[error("Competition {id} is not open for entries (status: {status})")]
    CompetitionNotActive {
        /// Competition
        id: CompetitionId,
        /// Current status
        status: CompetitionStatus,
    },

    /// Not enough tickets left.
    #[error("Competition {id} is full: {remaining} ticket(s) left, {requested} requested")]
    CompetitionFull {
        /// Competition
        id: CompetitionId,
        /// Tickets requested
        requested: u32,
        /// Tickets still available
        remaining: u32,
    },

    /// Per-user entry cap would be exceeded.
    #[error("Entry cap of {cap} exceeded for competition {id}: {owned} held, {requested} requested")]
    EntryCapExceeded {
        /// Competition
        id: CompetitionId,
        /// Cap per user
        cap: u32,
        /// Tickets already held
        owned: u32,
        /// Tickets requested
        requested: u32,
    },

    /// Quantity outside the accepted range.
    #[error("Invalid quantity {requested}: must be between 1 and {max}")]
    InvalidQuantity {
        /// Tickets requested
        requested: u32,
        /// Upper bound per request
        max: u32,
    },

    /// Purchases are switched off platform-wide.
    #[error("Purchases are currently disabled")]
    PurchasesDisabled,

    /// Voucher failed validation.
    #[error("Voucher invalid: {reason}")]
    VoucherInvalid {
        /// Rejection reason
        reason: VoucherRejection,
    },

    /// Voucher reward type cannot fund a ticket purchase.
    #[error("Voucher type {reward} cannot be used for ticket purchases")]
    UnsupportedVoucherType {
        /// Reward type name
        reward: &'static str,
    },

    /// External payment requested but nothing is left to pay externally.
    #[error("No external payment required: the charge is {amount} after wallet funds")]
    ExternalPaymentNotRequired {
        /// Outstanding amount
        amount: Money,
    },

    // ═══════════════════════════════════════════════════════════
    // Funds Errors
    // ═══════════════════════════════════════════════════════════
    /// Wallet balance below the amount to debit.
    #[error("Insufficient funds in {wallet} wallet: {available} available, {required} required")]
    InsufficientFunds {
        /// Wallet(s) consulted
        wallet: &'static str,
        /// Balance available
        available: Money,
        /// Amount required
        required: Money,
    },

    /// Fewer redeemable universal tickets than requested.
    #[error("Insufficient universal tickets: {available} available, {requested} requested")]
    InsufficientUniversalTickets {
        /// Redeemable tickets found
        available: u32,
        /// Tickets requested
        requested: u32,
    },

    /// A responsible-spending cap would be exceeded.
    #[error("{limit} spending limit of {cap} exceeded: {spent} spent, {remaining} remaining, {attempted} attempted")]
    LimitExceeded {
        /// Which cap
        limit: LimitKind,
        /// Cap amount
        cap: Money,
        /// Spent in the current period
        spent: Money,
        /// Headroom left
        remaining: Money,
        /// Amount of this purchase
        attempted: Money,
    },

    // ═══════════════════════════════════════════════════════════
    // Payment-Consistency Errors
    // ═══════════════════════════════════════════════════════════
    /// No recorded payment has this reference.
    #[error("Payment {0} not found")]
    PaymentNotFound(PaymentReference),

    /// Payment exists but is not in the completed state.
    #[error("Payment {reference} is not completed (status: {status})")]
    PaymentNotCompleted {
        /// Payment
        reference: PaymentReference,
        /// Current status
        status: PaymentStatus,
    },

    /// Confirmed amount differs from the computed charge.
    #[error("Payment {reference} amount mismatch: expected {expected}, received {received}")]
    PaymentAmountMismatch {
        /// Payment
        reference: PaymentReference,
        /// Amount the engine computed
        expected: Money,
        /// Amount the gateway confirmed
        received: Money,
    },

    /// Payment reference belongs to a different purchase.
    #[error("Payment {reference} does not belong to purchase {purchase_id}")]
    PaymentNotForPurchase {
        /// Payment
        reference: PaymentReference,
        /// Purchase being completed
        purchase_id: PurchaseId,
    },

    /// Purchase does not exist.
    #[error("Purchase {0} not found")]
    PurchaseNotFound(PurchaseId),

    /// Purchase already reached a terminal status.
    #[error("Purchase {id} is already {status}")]
    PurchaseAlreadySettled {
        /// Purchase
        id: PurchaseId,
        /// Terminal status
        status: PurchaseStatus,
    },

    // ═══════════════════════════════════════════════════════════
    // Infrastructure & Invariants
    // ═══════════════════════════════════════════════════════════
    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A locking-discipline bug surfaced as an impossible state.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

impl AllocationError {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CompetitionNotFound(_)
            | Self::CompetitionNotActive { .. }
            | Self::CompetitionFull { .. }
            | Self::EntryCapExceeded { .. }
            | Self::InvalidQuantity { .. }
            | Self::PurchasesDisabled
            | Self::VoucherInvalid { .. }
            | Self::UnsupportedVoucherType { .. }
            | Self::ExternalPaymentNotRequired { .. } => ErrorKind::Validation,
            Self::InsufficientFunds { .. }
            | Self::InsufficientUniversalTickets { .. }
            | Self::LimitExceeded { .. } => ErrorKind::Funds,
            Self::PaymentNotFound(_)
            | Self::PaymentNotCompleted { .. }
            | Self::PaymentAmountMismatch { .. }
            | Self::PaymentNotForPurchase { .. }
            | Self::PurchaseNotFound(_)
            | Self::PurchaseAlreadySettled { .. } => ErrorKind::Payment,
            Self::Store(_) => ErrorKind::Infrastructure,
            Self::InvariantViolation(_) => ErrorKind::Invariant,
        }
    }

    /// Returns `true` if the caller may safely re-run the whole request.
    ///
    /// # Examples
    ///
    /// ```
    /// # use prizedraw_engine::AllocationError;
    /// # use prizedraw_core::StoreError;
    /// assert!(AllocationError::Store(StoreError::LockTimeout).is_retryable());
    /// assert!(!AllocationError::PurchasesDisabled.is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Short label used for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::CompetitionNotFound(_) => "competition_not_found",
            Self::CompetitionNotActive { .. } => "competition_not_active",
            Self::CompetitionFull { .. } => "competition_full",
            Self::EntryCapExceeded { .. } => "entry_cap_exceeded",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::PurchasesDisabled => "purchases_disabled",
            Self::VoucherInvalid { .. } => "voucher_invalid",
            Self::UnsupportedVoucherType { .. } => "unsupported_voucher_type",
            Self::ExternalPaymentNotRequired { .. } => "external_payment_not_required",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::InsufficientUniversalTickets { .. } => "insufficient_universal_tickets",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::PaymentNotFound(_) => "payment_not_found",
            Self::PaymentNotCompleted { .. } => "payment_not_completed",
            Self::PaymentAmountMismatch { .. } => "payment_amount_mismatch",
            Self::PaymentNotForPurchase { .. } => "payment_not_for_purchase",
            Self::PurchaseNotFound(_) => "purchase_not_found",
            Self::PurchaseAlreadySettled { .. } => "purchase_already_settled",
            Self::Store(_) => "store",
            Self::InvariantViolation(_) => "invariant_violation",
        }
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "Allocation invariant violated");
        metrics::counter!("prizedraw_invariant_violations_total").increment(1);
        Self::InvariantViolation(message)
    }
}
