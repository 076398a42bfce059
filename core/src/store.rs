//! Persistence seam of the allocation engine.
//!
//! One allocation request runs inside one [`UnitOfWork`]: a database
//! transaction that either commits every effect or none. The unit of work is
//! split into one trait per component so each component can be generic over
//! exactly the storage it touches.
//!
//! # Lock vocabulary
//!
//! - `lock_*` methods take a blocking lock (row lock or advisory lock) held
//!   until the unit of work ends.
//! - `try_lock_*` / `take_*` methods skip rows another transaction already
//!   holds instead of waiting for them.
//!
//! # Implementations
//!
//! - `PgStore` (in `prizedraw-postgres`): production implementation
//! - `InMemoryStore` (in `prizedraw-testing`): deterministic test double

use crate::error::StoreResult;
use crate::ids::{
    CompetitionId, InstantWinId, PaymentReference, PurchaseId, TicketId, UniversalTicketId,
    UserId, VoucherId, WalletId,
};
use crate::model::{
    Competition, InstantWinSlot, NewInstantWin, PaymentRecord, PlatformSettings, PrizeClaim,
    Purchase, PurchaseStatus, SpendingLimitRecord, Ticket, UniversalTicket, Voucher,
    VoucherUsage, Wallet, WalletKind, WalletTransaction,
};
use crate::money::Money;
use chrono::{DateTime, NaiveDate, Utc};
use std::future::Future;

/// Competition rows and their sold counter.
pub trait CompetitionStore: Send {
    /// Load a competition under a row lock held for the rest of the unit of work.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query or lock wait fails.
    fn lock_competition(
        &mut self,
        id: CompetitionId,
    ) -> impl Future<Output = StoreResult<Option<Competition>>> + Send;

    /// Load a competition without locking it.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    fn get_competition(
        &mut self,
        id: CompetitionId,
    ) -> impl Future<Output = StoreResult<Option<Competition>>> + Send;

    /// Number of tickets a user already holds in a competition.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    fn count_user_tickets(
        &mut self,
        competition_id: CompetitionId,
        user_id: UserId,
    ) -> impl Future<Output = StoreResult<u32>> + Send;

    /// Increment `sold_tickets` by `quantity`.
    ///
    /// Returns `None` when the increment would push `sold_tickets` past
    /// `total_tickets`; the counter is left untouched in that case.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    fn add_sold_tickets(
        &mut self,
        id: CompetitionId,
        quantity: u32,
    ) -> impl Future<Output = StoreResult<Option<Competition>>> + Send;
}

/// Ticket numbering, ticket rows and universal ticket credits.
pub trait TicketStore: Send {
    /// Serialize ticket numbering for a competition until the unit of work ends.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockTimeout`](crate::StoreError::LockTimeout) if
    /// the lock cannot be acquired in time.
    fn lock_ticket_numbering(
        &mut self,
        competition_id: CompetitionId,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Highest ticket number issued in a competition, if any.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    fn max_ticket_number(
        &mut self,
        competition_id: CompetitionId,
    ) -> impl Future<Output = StoreResult<Option<u32>>> + Send;

    /// Insert a ticket row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`](crate::StoreError::UniqueViolation)
    /// if the number is already taken in that competition.
    fn insert_ticket(&mut self, ticket: &Ticket) -> impl Future<Output = StoreResult<()>> + Send;

    /// Lock up to `limit` unused, unexpired universal tickets owned by `user_id`,
    /// oldest first, skipping rows locked by other transactions.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    fn take_universal_tickets(
        &mut self,
        user_id: UserId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<Vec<UniversalTicket>>> + Send;

    /// Mark a universal ticket as consumed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    fn mark_universal_ticket_used(
        &mut self,
        id: UniversalTicketId,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Insert a new universal ticket credit.
    ///
    /// # Errors
    ///
    /// Returns a store error if the insert fails.
    fn insert_universal_ticket(
        &mut self,
        ticket: &UniversalTicket,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Instant-win slots.
pub trait InstantWinStore: Send {
    /// Lock the claimable slot bound to `(competition_id, ticket_number)`.
    ///
    /// Applies the claim predicate (`claimed_by IS NULL AND current_winners <
    /// max_winners`) and skips a slot already locked by another transaction
    /// instead of waiting for it.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    fn try_lock_claimable_instant_win(
        &mut self,
        competition_id: CompetitionId,
        ticket_number: u32,
    ) -> impl Future<Output = StoreResult<Option<InstantWinSlot>>> + Send;

    /// Record one claim against a locked slot: increment `current_winners`,
    /// set `claimed_by`/`claimed_at` once the slot is full, and append a
    /// claim row linking the winning ticket.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    fn record_instant_win_claim(
        &mut self,
        slot: &InstantWinSlot,
        user_id: UserId,
        ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<InstantWinSlot>> + Send;

    /// Insert new slots.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`](crate::StoreError::UniqueViolation)
    /// if a ticket number already carries a slot.
    fn insert_instant_wins(
        &mut self,
        slots: &[NewInstantWin],
    ) -> impl Future<Output = StoreResult<Vec<InstantWinSlot>>> + Send;

    /// All slots of a competition ordered by ticket number.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    fn list_instant_wins(
        &mut self,
        competition_id: CompetitionId,
    ) -> impl Future<Output = StoreResult<Vec<InstantWinSlot>>> + Send;

    /// Load a slot under a blocking row lock (administrative paths).
    ///
    /// # Errors
    ///
    /// Returns a store error if the query or lock wait fails.
    fn lock_instant_win(
        &mut self,
        id: InstantWinId,
    ) -> impl Future<Output = StoreResult<Option<InstantWinSlot>>> + Send;

    /// Overwrite the claim state of a slot (administrative paths).
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    fn set_instant_win_claim(
        &mut self,
        id: InstantWinId,
        claimed_by: Option<UserId>,
        current_winners: u32,
        claimed_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Wallet rows and the append-only ledger.
pub trait WalletStore: Send {
    /// Load a wallet under a row lock.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query or lock wait fails.
    fn lock_wallet(
        &mut self,
        user_id: UserId,
        kind: WalletKind,
    ) -> impl Future<Output = StoreResult<Option<Wallet>>> + Send;

    /// Load a wallet under a row lock, creating an empty one first if absent.
    ///
    /// # Errors
    ///
    /// Returns a store error if the insert, query or lock wait fails.
    fn lock_or_create_wallet(
        &mut self,
        user_id: UserId,
        kind: WalletKind,
    ) -> impl Future<Output = StoreResult<Wallet>> + Send;

    /// Overwrite a locked wallet's balance.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    fn set_wallet_balance(
        &mut self,
        wallet_id: WalletId,
        balance: Money,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Append a ledger entry.
    ///
    /// # Errors
    ///
    /// Returns a store error if the insert fails.
    fn append_wallet_transaction(
        &mut self,
        entry: &WalletTransaction,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Purchases and recorded payment confirmations.
pub trait PurchaseStore: Send {
    /// Insert a purchase row.
    ///
    /// # Errors
    ///
    /// Returns a store error if the insert fails.
    fn insert_purchase(&mut self, purchase: &Purchase)
    -> impl Future<Output = StoreResult<()>> + Send;

    /// Load a purchase under a row lock.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query or lock wait fails.
    fn lock_purchase(
        &mut self,
        id: PurchaseId,
    ) -> impl Future<Output = StoreResult<Option<Purchase>>> + Send;

    /// Move a purchase to a new status.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    fn update_purchase_status(
        &mut self,
        id: PurchaseId,
        status: PurchaseStatus,
        failure_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Record a payment (intent or gateway confirmation).
    ///
    /// # Errors
    ///
    /// Returns a store error if the upsert fails.
    fn upsert_payment(&mut self, payment: &PaymentRecord)
    -> impl Future<Output = StoreResult<()>> + Send;

    /// Find a recorded payment by reference.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    fn find_payment(
        &mut self,
        reference: &PaymentReference,
    ) -> impl Future<Output = StoreResult<Option<PaymentRecord>>> + Send;
}

/// Vouchers and their usage records.
pub trait VoucherStore: Send {
    /// Load a voucher by code (case-insensitive) under a row lock.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query or lock wait fails.
    fn lock_voucher_by_code(
        &mut self,
        code: &str,
    ) -> impl Future<Output = StoreResult<Option<Voucher>>> + Send;

    /// Load a voucher by id under a row lock.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query or lock wait fails.
    fn lock_voucher(
        &mut self,
        id: VoucherId,
    ) -> impl Future<Output = StoreResult<Option<Voucher>>> + Send;

    /// How many times a user already redeemed a voucher.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    fn count_voucher_usages(
        &mut self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> impl Future<Output = StoreResult<u32>> + Send;

    /// Insert a usage row and increment the voucher's `usage_count`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the writes fail.
    fn record_voucher_usage(
        &mut self,
        usage: &VoucherUsage,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Responsible-spending records.
pub trait SpendingLimitStore: Send {
    /// Load a user's spending record under a row lock.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query or lock wait fails.
    fn lock_spending_limits(
        &mut self,
        user_id: UserId,
    ) -> impl Future<Output = StoreResult<Option<SpendingLimitRecord>>> + Send;

    /// Load a user's spending record under a row lock, creating an uncapped
    /// record with zeroed counters dated `today` if none exists.
    ///
    /// Two units of work racing on a new user serialize on the created row.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query or lock wait fails.
    fn lock_or_create_spending_limits(
        &mut self,
        user_id: UserId,
        today: NaiveDate,
    ) -> impl Future<Output = StoreResult<SpendingLimitRecord>> + Send;

    /// Insert or overwrite a spending record.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    fn save_spending_limits(
        &mut self,
        record: &SpendingLimitRecord,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Non-wallet prize ledgers.
pub trait PrizeStore: Send {
    /// Add points to a user's points balance.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    fn add_points(
        &mut self,
        user_id: UserId,
        points: u64,
        reference: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Insert a pending physical-prize fulfillment claim.
    ///
    /// # Errors
    ///
    /// Returns a store error if the insert fails.
    fn insert_prize_claim(&mut self, claim: &PrizeClaim)
    -> impl Future<Output = StoreResult<()>> + Send;
}

/// One atomic unit of work spanning every store.
///
/// Dropping a unit of work without calling [`commit`](Self::commit) discards
/// all of its writes.
pub trait UnitOfWork:
    CompetitionStore
    + TicketStore
    + InstantWinStore
    + WalletStore
    + PurchaseStore
    + VoucherStore
    + SpendingLimitStore
    + PrizeStore
    + Send
    + Sized
{
    /// Make every write of this unit of work durable.
    ///
    /// # Errors
    ///
    /// Returns a store error if the commit fails; nothing is persisted then.
    fn commit(self) -> impl Future<Output = StoreResult<()>> + Send;

    /// Discard every write of this unit of work.
    ///
    /// # Errors
    ///
    /// Returns a store error if the rollback itself fails.
    fn rollback(self) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Factory for units of work.
pub trait TransactionalStore: Send + Sync {
    /// Unit-of-work type produced by this store
    type Tx: UnitOfWork + 'static;

    /// Open a new unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`](crate::StoreError::Unavailable) if
    /// no connection can be acquired.
    fn begin(&self) -> impl Future<Output = StoreResult<Self::Tx>> + Send;
}

/// Source of platform settings, read outside any unit of work.
pub trait SettingsStore: Send + Sync {
    /// Load the current settings.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    fn load_settings(&self) -> impl Future<Output = StoreResult<PlatformSettings>> + Send;
}
