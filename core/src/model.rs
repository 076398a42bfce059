//! Persisted entities of the allocation engine.
//!
//! Enumerations that are stored as text columns expose `as_str`/`parse`
//! pairs so every store implementation spells them the same way.

use crate::ids::{
    CompetitionId, InstantWinId, PaymentReference, PrizeClaimId, PurchaseId, TicketId,
    UniversalTicketId, UserId, VoucherId, WalletId, WalletTransactionId,
};
use crate::money::Money;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stored enum value did not match any known variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    /// Name of the enumeration
    pub kind: &'static str,
    /// The offending value
    pub value: String,
}

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Database string representation
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            /// Parses the database string representation
            ///
            /// # Errors
            ///
            /// Returns [`UnknownVariant`] if the string matches no variant.
            pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant { kind: stringify!($name), value: s.to_string() }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ============================================================================
// Competitions & tickets
// ============================================================================

text_enum!(
    /// Lifecycle of a competition
    CompetitionStatus {
        /// Being set up, not purchasable
        Draft => "draft",
        /// Open for entries
        Active => "active",
        /// Closed, no further entries
        Closed => "closed",
    }
);

/// A time-boxed competition selling numbered tickets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competition {
    /// Competition identifier
    pub id: CompetitionId,
    /// Display title
    pub title: String,
    /// Price of a single ticket
    pub price_per_ticket: Money,
    /// Total tickets available for sale
    pub total_tickets: u32,
    /// Tickets sold so far (monotonic)
    pub sold_tickets: u32,
    /// Per-user entry cap (`None` = uncapped)
    pub max_entries_per_user: Option<u32>,
    /// Lifecycle status
    pub status: CompetitionStatus,
    /// Free-entry competition flag
    pub is_free: bool,
}

impl Competition {
    /// Tickets still available for sale
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.total_tickets.saturating_sub(self.sold_tickets)
    }

    /// Whether entries cost nothing
    #[must_use]
    pub const fn is_free_entry(&self) -> bool {
        self.is_free || self.price_per_ticket.is_zero()
    }
}

text_enum!(
    /// How a ticket was paid for
    TicketType {
        /// Bought for this competition
        Competition => "competition",
        /// Redeemed from a universal ticket credit
        Universal => "universal",
    }
);

/// One numbered entry into a competition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Competition entered
    pub competition_id: CompetitionId,
    /// Owner
    pub user_id: UserId,
    /// Unique, 1-based number within the competition
    pub ticket_number: u32,
    /// Funding type
    pub ticket_type: TicketType,
    /// Whether the number hit an instant-win slot
    pub is_instant_win: bool,
    /// Consumed universal ticket, if any
    pub universal_ticket_id: Option<UniversalTicketId>,
    /// Purchase that paid for this ticket, if any
    pub purchase_id: Option<PurchaseId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A pre-granted entry credit usable in any competition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversalTicket {
    /// Identifier
    pub id: UniversalTicketId,
    /// Owner
    pub user_id: UserId,
    /// Consumed flag (irreversible)
    pub is_used: bool,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// What granted the credit
    pub source: String,
    /// Grant time
    pub created_at: DateTime<Utc>,
}

impl UniversalTicket {
    /// Whether the credit can still be redeemed at `now`
    #[must_use]
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && self.expires_at.is_none_or(|expires| expires > now)
    }
}

// ============================================================================
// Instant wins
// ============================================================================

text_enum!(
    /// Kind of prize bound to an instant-win slot
    PrizeType {
        /// Credited to the cash wallet (value in pence)
        Cash => "cash",
        /// Credited to the site-credit wallet (value in pence)
        SiteCredit => "site_credit",
        /// Added to the points ledger (value in points)
        Points => "points",
        /// Mints universal tickets (value = ticket count)
        FreeTicket => "free_ticket",
        /// Physical item needing fulfillment (value = nominal pence)
        Physical => "physical",
    }
);

/// Prize descriptor carried by an instant-win slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prize {
    /// Prize kind
    pub prize_type: PrizeType,
    /// Kind-dependent value
    pub value: u64,
    /// Display name
    pub name: String,
}

impl Prize {
    /// Cash prize of `amount`
    #[must_use]
    pub fn cash(amount: Money) -> Self {
        Self {
            prize_type: PrizeType::Cash,
            value: amount.pence(),
            name: format!("{amount} cash"),
        }
    }

    /// Site-credit prize of `amount`
    #[must_use]
    pub fn site_credit(amount: Money) -> Self {
        Self {
            prize_type: PrizeType::SiteCredit,
            value: amount.pence(),
            name: format!("{amount} site credit"),
        }
    }

    /// Points prize
    #[must_use]
    pub fn points(points: u64) -> Self {
        Self {
            prize_type: PrizeType::Points,
            value: points,
            name: format!("{points} points"),
        }
    }

    /// Free universal tickets
    #[must_use]
    pub fn free_tickets(count: u64) -> Self {
        Self {
            prize_type: PrizeType::FreeTicket,
            value: count,
            name: format!("{count} free ticket(s)"),
        }
    }

    /// Physical item
    #[must_use]
    pub fn physical(name: impl Into<String>, nominal_value: Money) -> Self {
        Self {
            prize_type: PrizeType::Physical,
            value: nominal_value.pence(),
            name: name.into(),
        }
    }
}

/// A pre-seeded ticket number bound to a prize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantWinSlot {
    /// Slot identifier
    pub id: InstantWinId,
    /// Competition the slot belongs to
    pub competition_id: CompetitionId,
    /// Winning ticket number
    pub ticket_number: u32,
    /// Prize descriptor
    pub prize: Prize,
    /// Maximum claims allowed
    pub max_winners: u32,
    /// Claims so far
    pub current_winners: u32,
    /// Set once the slot is fully claimed
    pub claimed_by: Option<UserId>,
    /// When the slot was fully claimed
    pub claimed_at: Option<DateTime<Utc>>,
    /// Optional display title
    pub title: Option<String>,
    /// Optional description
    pub description: Option<String>,
    /// Optional image
    pub image_url: Option<String>,
}

impl InstantWinSlot {
    /// The claim predicate: unclaimed and below the winner cap
    #[must_use]
    pub const fn is_claimable(&self) -> bool {
        self.claimed_by.is_none() && self.current_winners < self.max_winners
    }
}

/// Insert command for a new instant-win slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewInstantWin {
    /// Competition
    pub competition_id: CompetitionId,
    /// Winning number
    pub ticket_number: u32,
    /// Prize
    pub prize: Prize,
    /// Maximum claims
    pub max_winners: u32,
    /// Optional display title
    pub title: Option<String>,
    /// Optional description
    pub description: Option<String>,
    /// Optional image
    pub image_url: Option<String>,
}

text_enum!(
    /// Fulfillment status for physical prizes
    PrizeClaimStatus {
        /// Awaiting fulfillment
        Pending => "pending",
        /// Shipped or handed over
        Fulfilled => "fulfilled",
    }
);

/// Pending fulfillment of a physical prize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeClaim {
    /// Claim identifier
    pub id: PrizeClaimId,
    /// Winner
    pub user_id: UserId,
    /// Slot that produced the prize
    pub instant_win_id: InstantWinId,
    /// Competition
    pub competition_id: CompetitionId,
    /// Prize name
    pub prize_name: String,
    /// Status
    pub status: PrizeClaimStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Wallets
// ============================================================================

text_enum!(
    /// Wallet flavour
    WalletKind {
        /// Withdrawable cash
        Cash => "cash",
        /// Site credit (non-withdrawable)
        Credit => "credit",
    }
);

/// A user's balance of one kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet identifier
    pub id: WalletId,
    /// Owner
    pub user_id: UserId,
    /// Flavour
    pub kind: WalletKind,
    /// Current balance (never negative)
    pub balance: Money,
}

text_enum!(
    /// Ledger entry type
    WalletTransactionKind {
        /// Money left the wallet
        Debit => "debit",
        /// Money entered the wallet
        Credit => "credit",
        /// Money held pending withdrawal settlement
        Hold => "hold",
        /// Hold released back
        Released => "released",
    }
);

/// Append-only ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    /// Entry identifier
    pub id: WalletTransactionId,
    /// Wallet touched
    pub wallet_id: WalletId,
    /// Entry type
    pub kind: WalletTransactionKind,
    /// Unsigned magnitude
    pub amount: Money,
    /// Originating business event
    pub reference: String,
    /// Balance after the entry was applied
    pub balance_after: Money,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// Signed amount as stored in the ledger (debits and holds negative)
    #[must_use]
    #[allow(clippy::cast_possible_wrap)] // Amounts are far below i64::MAX pence
    pub const fn signed_amount(&self) -> i64 {
        let magnitude = self.amount.pence() as i64;
        match self.kind {
            WalletTransactionKind::Debit | WalletTransactionKind::Hold => -magnitude,
            WalletTransactionKind::Credit | WalletTransactionKind::Released => magnitude,
        }
    }
}

// ============================================================================
// Purchases & payments
// ============================================================================

text_enum!(
    /// Checkout attempt status
    PurchaseStatus {
        /// Awaiting external payment
        Pending => "pending",
        /// Settled, tickets allocated
        Paid => "paid",
        /// Abandoned or rejected
        Failed => "failed",
    }
);

impl PurchaseStatus {
    /// PAID and FAILED are terminal
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Failed)
    }
}

/// How the charge of a purchase is covered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingBreakdown {
    /// Taken from the credit wallet
    pub credit_used: Money,
    /// Taken from the cash wallet
    pub cash_used: Money,
    /// Left for external payment
    pub outstanding: Money,
}

impl FundingBreakdown {
    /// Sum of all parts
    #[must_use]
    pub fn total(&self) -> Money {
        [self.credit_used, self.cash_used, self.outstanding].into_iter().sum()
    }
}

/// Competition and quantity within a purchase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    /// Competition
    pub competition_id: CompetitionId,
    /// Tickets requested
    pub quantity: u32,
}

/// One checkout attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Purchase identifier
    pub id: PurchaseId,
    /// Buyer
    pub user_id: UserId,
    /// Requested lines
    pub lines: Vec<PurchaseLine>,
    /// Price before discount
    pub base_amount: Money,
    /// Voucher discount applied
    pub discount: Money,
    /// Charged amount (`base_amount - discount`)
    pub amount: Money,
    /// Funding split
    pub breakdown: FundingBreakdown,
    /// Voucher used, if any
    pub voucher_id: Option<VoucherId>,
    /// External payment reference, if any
    pub payment_reference: Option<PaymentReference>,
    /// Status
    pub status: PurchaseStatus,
    /// Reason recorded when failed
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    /// Total tickets across all lines
    #[must_use]
    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }
}

text_enum!(
    /// Status of a payment reported by the gateway collaborator
    PaymentStatus {
        /// Intent created, not yet paid
        Pending => "pending",
        /// Terminal success
        Completed => "completed",
        /// Terminal failure
        Failed => "failed",
    }
);

/// A payment as recorded by the external gateway collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Gateway reference
    pub reference: PaymentReference,
    /// Purchase the intent was created for
    pub purchase_id: Option<PurchaseId>,
    /// Amount paid (or expected, while pending)
    pub amount: Money,
    /// Status
    pub status: PaymentStatus,
    /// Last update
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Vouchers
// ============================================================================

text_enum!(
    /// Voucher availability
    VoucherStatus {
        /// Redeemable
        Active => "active",
        /// Disabled by an administrator
        Inactive => "inactive",
    }
);

/// What a voucher grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoucherReward {
    /// Percentage off, in basis points (2500 = 25%)
    PercentageDiscount {
        /// Discount in basis points
        basis_points: u32,
    },
    /// Fixed amount off
    FixedDiscount {
        /// Discount amount
        amount: Money,
    },
    /// Waives a single-ticket charge
    FreeEntry,
    /// Wallet top-up (not valid for ticket purchases)
    SiteCredit {
        /// Credit amount
        amount: Money,
    },
}

impl VoucherReward {
    /// Short name used in logs and errors
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PercentageDiscount { .. } => "percentage_discount",
            Self::FixedDiscount { .. } => "fixed_discount",
            Self::FreeEntry => "free_entry",
            Self::SiteCredit { .. } => "site_credit",
        }
    }
}

/// A redeemable code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// Voucher identifier
    pub id: VoucherId,
    /// Code entered by users (matched case-insensitively)
    pub code: String,
    /// Availability
    pub status: VoucherStatus,
    /// Reward
    pub reward: VoucherReward,
    /// Global usage cap (`None` = uncapped)
    pub usage_limit: Option<u32>,
    /// Redemptions so far
    pub usage_count: u32,
    /// Validity start (inclusive)
    pub starts_at: DateTime<Utc>,
    /// Validity end (exclusive, `None` = open-ended)
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether one user may redeem it more than once
    pub allow_multiple_per_user: bool,
}

/// A single consumption of a voucher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherUsage {
    /// Voucher
    pub voucher_id: VoucherId,
    /// Redeeming user
    pub user_id: UserId,
    /// Purchase it funded
    pub purchase_id: PurchaseId,
    /// Payment reference, when paid externally
    pub payment_reference: Option<PaymentReference>,
    /// Redemption time
    pub used_at: DateTime<Utc>,
}

// ============================================================================
// Spending limits
// ============================================================================

text_enum!(
    /// Responsible-spending cap kind
    LimitKind {
        /// Cap on a single purchase
        SinglePurchase => "single_purchase",
        /// Rolling daily cap
        Daily => "daily",
        /// Rolling weekly cap
        Weekly => "weekly",
        /// Rolling monthly cap
        Monthly => "monthly",
    }
);

/// A user's spending caps and rolling counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingLimitRecord {
    /// Owner
    pub user_id: UserId,
    /// Cap per purchase
    pub single_purchase_limit: Option<Money>,
    /// Daily cap
    pub daily_limit: Option<Money>,
    /// Weekly cap
    pub weekly_limit: Option<Money>,
    /// Monthly cap
    pub monthly_limit: Option<Money>,
    /// Spent today
    pub daily_spent: Money,
    /// Spent this ISO week
    pub weekly_spent: Money,
    /// Spent this month
    pub monthly_spent: Money,
    /// Date the counters were last brought up to date
    pub last_reset: NaiveDate,
}

impl SpendingLimitRecord {
    /// A record with no caps and zeroed counters
    #[must_use]
    pub const fn unlimited(user_id: UserId, today: NaiveDate) -> Self {
        Self {
            user_id,
            single_purchase_limit: None,
            daily_limit: None,
            weekly_limit: None,
            monthly_limit: None,
            daily_spent: Money::ZERO,
            weekly_spent: Money::ZERO,
            monthly_spent: Money::ZERO,
            last_reset: today,
        }
    }
}

// ============================================================================
// Platform settings
// ============================================================================

/// Settings read by the engine through the settings cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSettings {
    /// Maintenance switch for all purchases
    pub purchases_enabled: bool,
    /// Upper bound on tickets per request
    pub max_quantity_per_request: u32,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            purchases_enabled: true,
            max_quantity_per_request: 100,
        }
    }
}
