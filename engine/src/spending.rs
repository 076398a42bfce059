//! Responsible-spending caps.
//!
//! Counters roll over on UTC calendar boundaries: daily at midnight, weekly
//! at the start of the ISO week and monthly on the first of the month.

use crate::error::{AllocationError, Result};
use chrono::{Datelike, NaiveDate};
use prizedraw_core::model::{LimitKind, SpendingLimitRecord};
use prizedraw_core::{Clock, Money, SpendingLimitStore, UserId};
use std::sync::Arc;

/// A cap that a purchase would break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitBreach {
    /// Which cap
    pub limit: LimitKind,
    /// Cap amount
    pub cap: Money,
    /// Already spent in the period
    pub spent: Money,
    /// Headroom left in the period
    pub remaining: Money,
}

/// Outcome of a spending-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendCheck {
    /// Purchase fits under every cap
    Allowed,
    /// The first cap the purchase would break
    LimitExceeded(LimitBreach),
}

impl SpendCheck {
    /// Converts a breach into [`AllocationError::LimitExceeded`].
    ///
    /// # Errors
    ///
    /// Returns the breach as an error.
    pub fn into_result(self, attempted: Money) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::LimitExceeded(breach) => Err(AllocationError::LimitExceeded {
                limit: breach.limit,
                cap: breach.cap,
                spent: breach.spent,
                remaining: breach.remaining,
                attempted,
            }),
        }
    }
}

/// Bring rolling counters up to date for `today`.
#[must_use]
pub fn roll_over(mut record: SpendingLimitRecord, today: NaiveDate) -> SpendingLimitRecord {
    let last = record.last_reset;
    if last == today {
        return record;
    }

    record.daily_spent = Money::ZERO;
    if last.iso_week() != today.iso_week() {
        record.weekly_spent = Money::ZERO;
    }
    if (last.year(), last.month()) != (today.year(), today.month()) {
        record.monthly_spent = Money::ZERO;
    }
    record.last_reset = today;
    record
}

/// Evaluate caps in order single-purchase, daily, weekly, monthly.
///
/// `record` must already be rolled over.
#[must_use]
pub fn evaluate(record: &SpendingLimitRecord, amount: Money) -> SpendCheck {
    if let Some(cap) = record.single_purchase_limit.filter(|cap| amount > *cap) {
        return SpendCheck::LimitExceeded(LimitBreach {
            limit: LimitKind::SinglePurchase,
            cap,
            spent: Money::ZERO,
            remaining: cap,
        });
    }

    let periods = [
        (LimitKind::Daily, record.daily_limit, record.daily_spent),
        (LimitKind::Weekly, record.weekly_limit, record.weekly_spent),
        (LimitKind::Monthly, record.monthly_limit, record.monthly_spent),
    ];

    for (limit, cap, spent) in periods {
        let Some(cap) = cap else { continue };
        let exceeds = spent.checked_add(amount).is_none_or(|total| total > cap);
        if exceeds {
            return SpendCheck::LimitExceeded(LimitBreach {
                limit,
                cap,
                spent,
                remaining: cap.saturating_sub(spent),
            });
        }
    }

    SpendCheck::Allowed
}

/// Checks and records spend against a user's caps.
#[derive(Clone)]
pub struct SpendingLimitGuard {
    clock: Arc<dyn Clock>,
}

impl SpendingLimitGuard {
    /// Creates a guard using `clock` for period boundaries.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Check whether `amount` fits under every cap, locking the record.
    ///
    /// Users without a record are unlimited.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] on persistence failure.
    pub async fn check<T: SpendingLimitStore>(
        &self,
        tx: &mut T,
        user_id: UserId,
        amount: Money,
    ) -> Result<SpendCheck> {
        let Some(record) = tx.lock_spending_limits(user_id).await? else {
            return Ok(SpendCheck::Allowed);
        };

        let record = roll_over(record, self.today());
        let check = evaluate(&record, amount);
        if let SpendCheck::LimitExceeded(breach) = check {
            tracing::info!(
                user_id = %user_id,
                limit = %breach.limit,
                cap = %breach.cap,
                spent = %breach.spent,
                attempted = %amount,
                "Spending limit would be exceeded"
            );
        }
        Ok(check)
    }

    /// Add `amount` to every rolling counter after a successful charge.
    ///
    /// Counters are tracked even for users without caps so that a cap set
    /// later applies to spend already made in the period.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::InvariantViolation`] if a counter would overflow
    /// - [`AllocationError::Store`] on persistence failure
    pub async fn record_spend<T: SpendingLimitStore>(
        &self,
        tx: &mut T,
        user_id: UserId,
        amount: Money,
    ) -> Result<()> {
        let today = self.today();
        let record = tx.lock_or_create_spending_limits(user_id, today).await?;
        let mut record = roll_over(record, today);

        let overflow = || AllocationError::invariant(format!("spend counter overflow for {user_id}"));
        record.daily_spent = record.daily_spent.checked_add(amount).ok_or_else(overflow)?;
        record.weekly_spent = record.weekly_spent.checked_add(amount).ok_or_else(overflow)?;
        record.monthly_spent = record.monthly_spent.checked_add(amount).ok_or_else(overflow)?;

        tx.save_spending_limits(&record).await?;
        Ok(())
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }
}
