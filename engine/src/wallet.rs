//! Wallet ledger: the only code path that changes a wallet balance.
//!
//! Every balance change writes a ledger entry whose `balance_after` equals
//! the new balance, so replaying the ledger of a wallet always reproduces
//! its balance.

use crate::error::{AllocationError, Result};
use prizedraw_core::model::{Wallet, WalletKind, WalletTransaction, WalletTransactionKind};
use prizedraw_core::{Clock, Money, UserId, WalletStore, WalletTransactionId};
use std::sync::Arc;

/// Debits and credits wallets inside the caller's unit of work.
#[derive(Clone)]
pub struct WalletLedger {
    clock: Arc<dyn Clock>,
}

impl WalletLedger {
    /// Creates a ledger stamping entries with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Current balance of a wallet, locking the row.
    ///
    /// A missing wallet reads as zero.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] if the lock cannot be taken.
    pub async fn balance<T: WalletStore>(
        &self,
        tx: &mut T,
        user_id: UserId,
        kind: WalletKind,
    ) -> Result<Money> {
        Ok(tx
            .lock_wallet(user_id, kind)
            .await?
            .map_or(Money::ZERO, |wallet| wallet.balance))
    }

    /// Debit `amount` from a user's wallet.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::InsufficientFunds`] if the wallet is missing or
    ///   its balance is below `amount`
    /// - [`AllocationError::InvariantViolation`] if `amount` is zero
    /// - [`AllocationError::Store`] on persistence failure
    pub async fn debit<T: WalletStore>(
        &self,
        tx: &mut T,
        user_id: UserId,
        kind: WalletKind,
        amount: Money,
        reference: &str,
    ) -> Result<WalletTransaction> {
        if amount.is_zero() {
            return Err(AllocationError::invariant("wallet debit of zero"));
        }

        let Some(wallet) = tx.lock_wallet(user_id, kind).await? else {
            return Err(AllocationError::InsufficientFunds {
                wallet: kind.as_str(),
                available: Money::ZERO,
                required: amount,
            });
        };

        let Some(balance_after) = wallet.balance.checked_sub(amount) else {
            return Err(AllocationError::InsufficientFunds {
                wallet: kind.as_str(),
                available: wallet.balance,
                required: amount,
            });
        };

        let entry = self
            .write(tx, &wallet, WalletTransactionKind::Debit, amount, balance_after, reference)
            .await?;

        metrics::counter!("prizedraw_wallet_movements_pence_total", "direction" => "debit")
            .increment(amount.pence());
        tracing::debug!(
            user_id = %user_id,
            wallet = %kind,
            amount = %amount,
            balance_after = %balance_after,
            reference,
            "Wallet debited"
        );

        Ok(entry)
    }

    /// Credit `amount` to a user's wallet, creating the wallet if needed.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::InvariantViolation`] if `amount` is zero or the
    ///   balance would overflow
    /// - [`AllocationError::Store`] on persistence failure
    pub async fn credit<T: WalletStore>(
        &self,
        tx: &mut T,
        user_id: UserId,
        kind: WalletKind,
        amount: Money,
        reference: &str,
    ) -> Result<WalletTransaction> {
        if amount.is_zero() {
            return Err(AllocationError::invariant("wallet credit of zero"));
        }

        let wallet = tx.lock_or_create_wallet(user_id, kind).await?;
        let balance_after = wallet
            .balance
            .checked_add(amount)
            .ok_or_else(|| AllocationError::invariant(format!("wallet {} overflow", wallet.id)))?;

        let entry = self
            .write(tx, &wallet, WalletTransactionKind::Credit, amount, balance_after, reference)
            .await?;

        metrics::counter!("prizedraw_wallet_movements_pence_total", "direction" => "credit")
            .increment(amount.pence());
        tracing::debug!(
            user_id = %user_id,
            wallet = %kind,
            amount = %amount,
            balance_after = %balance_after,
            reference,
            "Wallet credited"
        );

        Ok(entry)
    }

    async fn write<T: WalletStore>(
        &self,
        tx: &mut T,
        wallet: &Wallet,
        kind: WalletTransactionKind,
        amount: Money,
        balance_after: Money,
        reference: &str,
    ) -> Result<WalletTransaction> {
        tx.set_wallet_balance(wallet.id, balance_after).await?;

        let entry = WalletTransaction {
            id: WalletTransactionId::new(),
            wallet_id: wallet.id,
            kind,
            amount,
            reference: reference.to_string(),
            balance_after,
            created_at: self.clock.now(),
        };
        tx.append_wallet_transaction(&entry).await?;

        Ok(entry)
    }
}
