//! Voucher validation and pricing.
//!
//! A voucher is validated and priced before funds are reserved, and its
//! usage is recorded as the last write of the unit of work so a rejected
//! purchase never consumes it.

use crate::error::{AllocationError, Result, VoucherRejection};
use prizedraw_core::model::{Voucher, VoucherReward, VoucherStatus, VoucherUsage};
use prizedraw_core::{Clock, Money, PaymentReference, PurchaseId, UserId, VoucherId, VoucherStore};
use std::sync::Arc;

const FULL_BASIS_POINTS: u64 = 10_000;

/// A validated voucher and the price it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherQuote {
    /// Voucher applied
    pub voucher_id: VoucherId,
    /// Reward applied
    pub reward: VoucherReward,
    /// Price before discount
    pub base_amount: Money,
    /// Discount granted
    pub discount: Money,
    /// Price after discount
    pub final_amount: Money,
}

/// Discount and final price of `base_amount` under `reward`.
///
/// Percentage discounts round down to the penny; fixed discounts are capped
/// at the base amount.
///
/// # Errors
///
/// - [`AllocationError::UnsupportedVoucherType`] for site-credit vouchers
/// - [`AllocationError::VoucherInvalid`] for a free-entry voucher on more
///   than one paid ticket
pub fn price(reward: VoucherReward, base_amount: Money, paid_quantity: u32) -> Result<(Money, Money)> {
    let discount = match reward {
        VoucherReward::PercentageDiscount { basis_points } => {
            let bps = u128::from(u64::from(basis_points).min(FULL_BASIS_POINTS));
            let off = u128::from(base_amount.pence()) * bps / u128::from(FULL_BASIS_POINTS);
            // off <= base_amount, which fits in u64
            Money::from_pence(u64::try_from(off).unwrap_or(base_amount.pence()))
        }
        VoucherReward::FixedDiscount { amount } => amount.min(base_amount),
        VoucherReward::FreeEntry => {
            if paid_quantity != 1 {
                return Err(AllocationError::VoucherInvalid {
                    reason: VoucherRejection::FreeEntryRequiresSingleTicket { quantity: paid_quantity },
                });
            }
            base_amount
        }
        VoucherReward::SiteCredit { .. } => {
            return Err(AllocationError::UnsupportedVoucherType { reward: reward.name() });
        }
    };

    Ok((discount, base_amount.saturating_sub(discount)))
}

/// Validates vouchers and records their usage.
#[derive(Clone)]
pub struct VoucherApplier {
    clock: Arc<dyn Clock>,
}

impl VoucherApplier {
    /// Creates an applier checking validity windows against `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Validate `code` for `user_id` and price `base_amount` with it.
    ///
    /// Locks the voucher row so a concurrent redemption of a single-use or
    /// capped voucher waits for this unit of work.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::VoucherInvalid`] when any rule rejects the code
    /// - [`AllocationError::UnsupportedVoucherType`] for site-credit vouchers
    /// - [`AllocationError::Store`] on persistence failure
    pub async fn apply<T: VoucherStore>(
        &self,
        tx: &mut T,
        user_id: UserId,
        code: &str,
        base_amount: Money,
        paid_quantity: u32,
    ) -> Result<VoucherQuote> {
        let code = code.trim();
        let Some(voucher) = tx.lock_voucher_by_code(code).await? else {
            return Err(reject(VoucherRejection::NotFound));
        };

        self.validate(tx, &voucher, user_id).await?;
        let (discount, final_amount) = price(voucher.reward, base_amount, paid_quantity)?;

        tracing::debug!(
            voucher_id = %voucher.id,
            reward = voucher.reward.name(),
            base = %base_amount,
            discount = %discount,
            "Voucher applied"
        );

        Ok(VoucherQuote {
            voucher_id: voucher.id,
            reward: voucher.reward,
            base_amount,
            discount,
            final_amount,
        })
    }

    /// Re-check the usage rules of an already quoted voucher before it is
    /// consumed, without re-pricing.
    ///
    /// Used when an external payment completes: the quote was accepted at
    /// checkout, but another purchase may have used the voucher since.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::VoucherInvalid`] when the voucher is gone, disabled
    ///   or used up
    /// - [`AllocationError::Store`] on persistence failure
    pub async fn revalidate_usage<T: VoucherStore>(
        &self,
        tx: &mut T,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<()> {
        let voucher = tx
            .lock_voucher(voucher_id)
            .await?
            .ok_or_else(|| reject(VoucherRejection::NotFound))?;

        if voucher.status != VoucherStatus::Active {
            return Err(reject(VoucherRejection::Inactive));
        }
        check_usage(tx, &voucher, user_id).await
    }

    /// Record one usage of the voucher. Must be the last write before commit.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] on persistence failure.
    pub async fn record_usage<T: VoucherStore>(
        &self,
        tx: &mut T,
        voucher_id: VoucherId,
        user_id: UserId,
        purchase_id: PurchaseId,
        payment_reference: Option<PaymentReference>,
    ) -> Result<()> {
        let usage = VoucherUsage {
            voucher_id,
            user_id,
            purchase_id,
            payment_reference,
            used_at: self.clock.now(),
        };
        tx.record_voucher_usage(&usage).await?;
        Ok(())
    }

    async fn validate<T: VoucherStore>(
        &self,
        tx: &mut T,
        voucher: &Voucher,
        user_id: UserId,
    ) -> Result<()> {
        let now = self.clock.now();
        if voucher.status != VoucherStatus::Active {
            return Err(reject(VoucherRejection::Inactive));
        }
        if now < voucher.starts_at {
            return Err(reject(VoucherRejection::NotYetValid));
        }
        if voucher.expires_at.is_some_and(|expires| expires <= now) {
            return Err(reject(VoucherRejection::Expired));
        }
        check_usage(tx, voucher, user_id).await
    }
}

async fn check_usage<T: VoucherStore>(tx: &mut T, voucher: &Voucher, user_id: UserId) -> Result<()> {
    if voucher
        .usage_limit
        .is_some_and(|limit| voucher.usage_count >= limit)
    {
        return Err(reject(VoucherRejection::UsageLimitReached));
    }
    if !voucher.allow_multiple_per_user && tx.count_voucher_usages(voucher.id, user_id).await? > 0 {
        return Err(reject(VoucherRejection::AlreadyUsed));
    }
    Ok(())
}

const fn reject(reason: VoucherRejection) -> AllocationError {
    AllocationError::VoucherInvalid { reason }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use prizedraw_core::TransactionalStore;
    use prizedraw_core::UnitOfWork;
    use prizedraw_testing::{InMemoryStore, fixtures, test_clock};
    use proptest::prelude::*;

    fn applier() -> VoucherApplier {
        VoucherApplier::new(Arc::new(test_clock()))
    }

    #[test]
    fn percentage_discount_rounds_down() {
        let (discount, final_amount) = price(
            VoucherReward::PercentageDiscount { basis_points: 3333 },
            Money::from_pence(199),
            1,
        )
        .unwrap();
        assert_eq!(discount, Money::from_pence(66));
        assert_eq!(final_amount, Money::from_pence(133));
    }

    #[test]
    fn fixed_discount_is_capped_at_base() {
        let (discount, final_amount) = price(
            VoucherReward::FixedDiscount { amount: Money::from_pounds(10) },
            Money::from_pounds(4),
            4,
        )
        .unwrap();
        assert_eq!(discount, Money::from_pounds(4));
        assert_eq!(final_amount, Money::ZERO);
    }

    #[test]
    fn free_entry_only_covers_one_ticket() {
        assert_eq!(
            price(VoucherReward::FreeEntry, Money::from_pounds(1), 1).unwrap(),
            (Money::from_pounds(1), Money::ZERO)
        );
        assert!(matches!(
            price(VoucherReward::FreeEntry, Money::from_pounds(2), 2),
            Err(AllocationError::VoucherInvalid {
                reason: VoucherRejection::FreeEntryRequiresSingleTicket { quantity: 2 }
            })
        ));
    }

    #[test]
    fn site_credit_cannot_buy_tickets() {
        assert_eq!(
            price(VoucherReward::SiteCredit { amount: Money::from_pounds(5) }, Money::from_pounds(5), 1),
            Err(AllocationError::UnsupportedVoucherType { reward: "site_credit" })
        );
    }

    #[tokio::test]
    async fn unknown_code_is_rejected() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = applier()
            .apply(&mut tx, UserId::new(), "NOPE", Money::from_pounds(1), 1)
            .await
            .unwrap_err();
        assert_eq!(err, reject(VoucherRejection::NotFound));
    }

    #[tokio::test]
    async fn codes_match_case_insensitively() {
        let store = InMemoryStore::new();
        store.seed_voucher(fixtures::voucher("SPRING25", VoucherReward::PercentageDiscount { basis_points: 2500 }));

        let mut tx = store.begin().await.unwrap();
        let quote = applier()
            .apply(&mut tx, UserId::new(), " spring25 ", Money::from_pounds(4), 4)
            .await
            .unwrap();
        assert_eq!(quote.final_amount, Money::from_pounds(3));
    }

    #[tokio::test]
    async fn validity_window_is_enforced() {
        let store = InMemoryStore::new();
        let now = test_clock().now();
        store.seed_voucher(Voucher {
            starts_at: now + Duration::hours(1),
            ..fixtures::voucher("EARLY", VoucherReward::FreeEntry)
        });
        store.seed_voucher(Voucher {
            expires_at: Some(now),
            ..fixtures::voucher("LATE", VoucherReward::FreeEntry)
        });

        let mut tx = store.begin().await.unwrap();
        let user = UserId::new();
        let early = applier().apply(&mut tx, user, "EARLY", Money::from_pounds(1), 1).await;
        let late = applier().apply(&mut tx, user, "LATE", Money::from_pounds(1), 1).await;

        assert_eq!(early.unwrap_err(), reject(VoucherRejection::NotYetValid));
        assert_eq!(late.unwrap_err(), reject(VoucherRejection::Expired));
    }

    #[tokio::test]
    async fn single_use_voucher_rejects_second_use() {
        let store = InMemoryStore::new();
        let voucher = fixtures::voucher("ONCE", VoucherReward::FreeEntry);
        let voucher_id = voucher.id;
        store.seed_voucher(voucher);
        let user = UserId::new();

        let mut tx = store.begin().await.unwrap();
        applier().apply(&mut tx, user, "ONCE", Money::from_pounds(1), 1).await.unwrap();
        applier()
            .record_usage(&mut tx, voucher_id, user, PurchaseId::new(), None)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = applier()
            .apply(&mut tx, user, "ONCE", Money::from_pounds(1), 1)
            .await
            .unwrap_err();
        assert_eq!(err, reject(VoucherRejection::AlreadyUsed));
        assert_eq!(store.voucher(voucher_id).unwrap().usage_count, 1);
    }

    #[tokio::test]
    async fn usage_limit_is_global() {
        let store = InMemoryStore::new();
        store.seed_voucher(Voucher {
            usage_limit: Some(1),
            usage_count: 1,
            allow_multiple_per_user: true,
            ..fixtures::voucher("CAPPED", VoucherReward::FreeEntry)
        });

        let mut tx = store.begin().await.unwrap();
        let err = applier()
            .apply(&mut tx, UserId::new(), "CAPPED", Money::from_pounds(1), 1)
            .await
            .unwrap_err();
        assert_eq!(err, reject(VoucherRejection::UsageLimitReached));
    }

    proptest! {
        #[test]
        fn discount_never_exceeds_base(
            base in 0u64..10_000_000,
            bps in 0u32..20_000,
            fixed in 0u64..10_000_000,
        ) {
            let base = Money::from_pence(base);
            for reward in [
                VoucherReward::PercentageDiscount { basis_points: bps },
                VoucherReward::FixedDiscount { amount: Money::from_pence(fixed) },
            ] {
                let (discount, final_amount) = price(reward, base, 3).unwrap();
                prop_assert!(discount <= base);
                prop_assert_eq!(discount.checked_add(final_amount), Some(base));
            }
        }
    }
}
