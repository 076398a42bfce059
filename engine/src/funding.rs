//! Funding paths: how the charge of an allocation is covered.
//!
//! Every path follows the same three steps inside the allocation's unit of
//! work: `reserve` secures funds before any ticket is created, `commit`
//! finalizes the purchase record after tickets exist, and `rollback` reports
//! a reservation whose unit of work is being discarded.

use crate::error::{AllocationError, Result};
use crate::wallet::WalletLedger;
use chrono::{DateTime, Utc};
use prizedraw_core::model::{
    FundingBreakdown, Purchase, PurchaseLine, PurchaseStatus, WalletKind, WalletTransaction,
};
use prizedraw_core::{Money, PurchaseId, UnitOfWork, UniversalTicketId, UserId, VoucherId};

/// Which wallet(s) pay for a wallet-funded purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletSelection {
    /// Cash wallet only
    Cash,
    /// Site-credit wallet only
    Credit,
    /// Site credit first, cash for the remainder
    CreditThenCash,
}

/// Funding selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingChoice {
    /// Redeem one universal ticket per paid ticket
    UniversalTickets,
    /// Debit wallet balance
    Wallet(WalletSelection),
    /// Collect the charge through the payment gateway
    ExternalPayment {
        /// Cover part of the charge from site credit then cash first
        use_wallet_balance: bool,
    },
}

/// Funding path resolved for one settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingPath {
    /// Nothing to pay
    Free,
    /// Universal ticket credits
    UniversalTickets,
    /// Wallet debit
    Wallet(WalletSelection),
    /// Completion of a pending purchase paid through the gateway
    External {
        /// The pending purchase being completed
        purchase: Purchase,
    },
}

/// What a settlement charges and for which tickets.
#[derive(Debug, Clone)]
pub struct FundingRequest<'a> {
    /// Buyer
    pub user_id: UserId,
    /// Lines being allocated
    pub lines: &'a [PurchaseLine],
    /// Tickets in competitions that are not free
    pub paid_quantity: u32,
    /// Price before discount
    pub base_amount: Money,
    /// Voucher discount
    pub discount: Money,
    /// Amount to charge
    pub amount: Money,
    /// Voucher applied, if any
    pub voucher_id: Option<VoucherId>,
}

/// Funds secured by [`FundingPath::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Purchase row backing the charge (absent for free and universal entries)
    pub purchase_id: Option<PurchaseId>,
    /// Amount charged
    pub charged: Money,
    /// How the charge is covered
    pub breakdown: FundingBreakdown,
    /// Universal tickets to consume, oldest first
    pub universal_tickets: Vec<UniversalTicketId>,
    /// Ledger entries written by the reservation
    pub ledger_entries: Vec<WalletTransaction>,
}

impl Reservation {
    fn unpaid() -> Self {
        Self {
            purchase_id: None,
            charged: Money::ZERO,
            breakdown: FundingBreakdown::default(),
            universal_tickets: Vec::new(),
            ledger_entries: Vec::new(),
        }
    }
}

impl WalletSelection {
    /// Stable name used in logs and events.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Credit => "credit",
            Self::CreditThenCash => "credit+cash",
        }
    }
}

impl FundingPath {
    /// Resolve the caller's choice for a settlement with `base_amount` due.
    ///
    /// Anything costing nothing before discounts is free regardless of the
    /// choice.
    #[must_use]
    pub fn resolve(choice: FundingChoice, base_amount: Money) -> Option<Self> {
        if base_amount.is_zero() {
            return Some(Self::Free);
        }
        match choice {
            FundingChoice::UniversalTickets => Some(Self::UniversalTickets),
            FundingChoice::Wallet(selection) => Some(Self::Wallet(selection)),
            FundingChoice::ExternalPayment { .. } => None,
        }
    }

    /// Stable name used in logs, metrics and events.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::UniversalTickets => "universal_tickets",
            Self::Wallet(WalletSelection::Cash) => "wallet_cash",
            Self::Wallet(WalletSelection::Credit) => "wallet_credit",
            Self::Wallet(WalletSelection::CreditThenCash) => "wallet_credit_then_cash",
            Self::External { .. } => "external",
        }
    }

    /// Whether a voucher can discount this path.
    #[must_use]
    pub const fn accepts_voucher(&self) -> bool {
        matches!(self, Self::Wallet(_) | Self::External { .. })
    }

    /// Whether the path moves money and therefore counts against spending caps.
    #[must_use]
    pub const fn moves_money(&self) -> bool {
        matches!(self, Self::Wallet(_) | Self::External { .. })
    }

    /// Secure funds for `request`.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::InsufficientFunds`] if wallet balances fall short
    /// - [`AllocationError::InsufficientUniversalTickets`] if fewer credits
    ///   are redeemable than paid tickets requested
    /// - [`AllocationError::Store`] on persistence failure
    pub async fn reserve<T: UnitOfWork>(
        &self,
        tx: &mut T,
        ledger: &WalletLedger,
        request: &FundingRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        match self {
            Self::Free => Ok(Reservation::unpaid()),
            Self::UniversalTickets => {
                let taken = tx
                    .take_universal_tickets(request.user_id, request.paid_quantity, now)
                    .await?;
                let available = u32::try_from(taken.len()).unwrap_or(u32::MAX);
                if available < request.paid_quantity {
                    return Err(AllocationError::InsufficientUniversalTickets {
                        available,
                        requested: request.paid_quantity,
                    });
                }
                Ok(Reservation {
                    universal_tickets: taken.into_iter().map(|ticket| ticket.id).collect(),
                    ..Reservation::unpaid()
                })
            }
            Self::Wallet(selection) => {
                let purchase_id = PurchaseId::new();
                let breakdown = split_wallet_charge(tx, ledger, request, *selection).await?;
                let reference = purchase_reference(purchase_id);
                let ledger_entries = debit_breakdown(tx, ledger, request.user_id, &breakdown, &reference).await?;

                tx.insert_purchase(&Purchase {
                    id: purchase_id,
                    user_id: request.user_id,
                    lines: request.lines.to_vec(),
                    base_amount: request.base_amount,
                    discount: request.discount,
                    amount: request.amount,
                    breakdown,
                    voucher_id: request.voucher_id,
                    payment_reference: None,
                    status: PurchaseStatus::Pending,
                    failure_reason: None,
                    created_at: now,
                    updated_at: now,
                })
                .await?;

                Ok(Reservation {
                    purchase_id: Some(purchase_id),
                    charged: request.amount,
                    breakdown,
                    universal_tickets: Vec::new(),
                    ledger_entries,
                })
            }
            Self::External { purchase } => {
                let reference = purchase_reference(purchase.id);
                let ledger_entries =
                    debit_breakdown(tx, ledger, purchase.user_id, &purchase.breakdown, &reference).await?;
                Ok(Reservation {
                    purchase_id: Some(purchase.id),
                    charged: purchase.amount,
                    breakdown: purchase.breakdown,
                    universal_tickets: Vec::new(),
                    ledger_entries,
                })
            }
        }
    }

    /// Finalize a reservation once every ticket row exists.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] on persistence failure.
    pub async fn commit<T: UnitOfWork>(
        &self,
        tx: &mut T,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self {
            Self::Free => {}
            Self::UniversalTickets => {
                for id in &reservation.universal_tickets {
                    tx.mark_universal_ticket_used(*id).await?;
                }
            }
            Self::Wallet(_) | Self::External { .. } => {
                if let Some(purchase_id) = reservation.purchase_id {
                    tx.update_purchase_status(purchase_id, PurchaseStatus::Paid, None, now)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Report a reservation abandoned by a failed allocation.
    ///
    /// The unit of work is discarded by the caller, which undoes every
    /// debit and consumption made by [`reserve`](Self::reserve).
    pub fn rollback(&self, reservation: &Reservation, cause: &AllocationError) {
        metrics::counter!("prizedraw_funding_rollbacks_total", "path" => self.name()).increment(1);
        tracing::warn!(
            path = self.name(),
            purchase_id = ?reservation.purchase_id,
            charged = %reservation.charged,
            universal_tickets = reservation.universal_tickets.len(),
            error = %cause,
            "Funding reservation rolled back"
        );
    }
}

/// Plan how much of `amount` site credit then cash can cover ahead of an
/// external payment. Balances are read under lock but not debited.
///
/// # Errors
///
/// Returns [`AllocationError::Store`] on persistence failure.
pub async fn plan_external<T: UnitOfWork>(
    tx: &mut T,
    ledger: &WalletLedger,
    user_id: UserId,
    amount: Money,
    use_wallet_balance: bool,
) -> Result<FundingBreakdown> {
    if !use_wallet_balance {
        return Ok(FundingBreakdown {
            outstanding: amount,
            ..FundingBreakdown::default()
        });
    }

    let credit = ledger.balance(tx, user_id, WalletKind::Credit).await?;
    let credit_used = credit.min(amount);
    let after_credit = amount.saturating_sub(credit_used);
    let cash = ledger.balance(tx, user_id, WalletKind::Cash).await?;
    let cash_used = cash.min(after_credit);

    Ok(FundingBreakdown {
        credit_used,
        cash_used,
        outstanding: after_credit.saturating_sub(cash_used),
    })
}

async fn split_wallet_charge<T: UnitOfWork>(
    tx: &mut T,
    ledger: &WalletLedger,
    request: &FundingRequest<'_>,
    selection: WalletSelection,
) -> Result<FundingBreakdown> {
    let amount = request.amount;
    match selection {
        WalletSelection::Cash => Ok(FundingBreakdown {
            cash_used: amount,
            ..FundingBreakdown::default()
        }),
        WalletSelection::Credit => Ok(FundingBreakdown {
            credit_used: amount,
            ..FundingBreakdown::default()
        }),
        WalletSelection::CreditThenCash => {
            let planned = plan_external(tx, ledger, request.user_id, amount, true).await?;
            if !planned.outstanding.is_zero() {
                return Err(AllocationError::InsufficientFunds {
                    wallet: selection.name(),
                    available: planned.credit_used.checked_add(planned.cash_used).unwrap_or(amount),
                    required: amount,
                });
            }
            Ok(planned)
        }
    }
}

async fn debit_breakdown<T: UnitOfWork>(
    tx: &mut T,
    ledger: &WalletLedger,
    user_id: UserId,
    breakdown: &FundingBreakdown,
    reference: &str,
) -> Result<Vec<WalletTransaction>> {
    let mut entries = Vec::with_capacity(2);
    for (kind, amount) in [
        (WalletKind::Credit, breakdown.credit_used),
        (WalletKind::Cash, breakdown.cash_used),
    ] {
        if !amount.is_zero() {
            entries.push(ledger.debit(tx, user_id, kind, amount, reference).await?);
        }
    }
    Ok(entries)
}

fn purchase_reference(purchase_id: PurchaseId) -> String {
    format!("purchase:{purchase_id}")
}
