//! In-memory unit-of-work store.
//!
//! Units of work run one at a time: [`InMemoryStore::begin`] waits for a
//! store-wide gate, copies every table, and [`commit`](UnitOfWork::commit)
//! swaps the copy back in. Dropping or rolling back a unit of work simply
//! forgets the copy. That gives the all-or-nothing behaviour of a database
//! transaction with none of its lock choreography, so engine tests exercise
//! atomicity and invariants, not lock scheduling.
//!
//! Seeding and inspection helpers bypass the gate and act on committed state;
//! call them while no unit of work is open.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only follow a poisoned lock

use prizedraw_core::model::{
    Competition, InstantWinSlot, NewInstantWin, PaymentRecord, PaymentStatus, PlatformSettings,
    PrizeClaim, Purchase, PurchaseStatus, SpendingLimitRecord, Ticket, UniversalTicket, Voucher,
    VoucherUsage, Wallet, WalletKind, WalletTransaction,
};
use prizedraw_core::{
    CompetitionId, CompetitionStore, InstantWinId, InstantWinStore, Money, PaymentReference,
    PrizeStore, PurchaseId, PurchaseStore, SettingsStore, SpendingLimitStore, StoreError,
    StoreResult, TicketId, TicketStore, TransactionalStore, UniversalTicketId, UnitOfWork,
    UserId, VoucherId, VoucherStore, WalletId, WalletStore,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// A store operation that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// [`CompetitionStore::lock_competition`]
    LockCompetition,
    /// [`CompetitionStore::add_sold_tickets`]
    AddSoldTickets,
    /// [`TicketStore::insert_ticket`]
    InsertTicket,
    /// [`TicketStore::mark_universal_ticket_used`]
    MarkUniversalTicketUsed,
    /// [`InstantWinStore::record_instant_win_claim`]
    RecordInstantWinClaim,
    /// [`WalletStore::append_wallet_transaction`]
    AppendWalletTransaction,
    /// [`PurchaseStore::update_purchase_status`]
    UpdatePurchaseStatus,
    /// [`VoucherStore::record_voucher_usage`]
    RecordVoucherUsage,
    /// [`SpendingLimitStore::save_spending_limits`]
    SaveSpendingLimits,
    /// [`UnitOfWork::commit`]
    Commit,
}

/// A recorded instant-win claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantWinClaim {
    /// Slot claimed
    pub instant_win_id: InstantWinId,
    /// Winner
    pub user_id: UserId,
    /// Winning ticket
    pub ticket_id: TicketId,
    /// Claim time
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    competitions: HashMap<CompetitionId, Competition>,
    tickets: Vec<Ticket>,
    universal_tickets: Vec<UniversalTicket>,
    instant_wins: HashMap<InstantWinId, InstantWinSlot>,
    instant_win_claims: Vec<InstantWinClaim>,
    wallets: HashMap<(UserId, WalletKind), Wallet>,
    wallet_transactions: Vec<WalletTransaction>,
    purchases: HashMap<PurchaseId, Purchase>,
    payments: HashMap<PaymentReference, PaymentRecord>,
    vouchers: HashMap<VoucherId, Voucher>,
    voucher_usages: Vec<VoucherUsage>,
    spending_limits: HashMap<UserId, SpendingLimitRecord>,
    points: HashMap<UserId, u64>,
    prize_claims: Vec<PrizeClaim>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    gate: Arc<tokio::sync::Mutex<()>>,
    fail_points: Mutex<Vec<(FailPoint, StoreError)>>,
    settings: Mutex<PlatformSettings>,
    settings_loads: AtomicUsize,
    commits: AtomicUsize,
}

impl Shared {
    fn trip(&self, point: FailPoint) -> StoreResult<()> {
        let mut armed = self.fail_points.lock().unwrap();
        match armed.iter().position(|(armed_point, _)| *armed_point == point) {
            Some(index) => Err(armed.remove(index).1),
            None => Ok(()),
        }
    }
}

/// In-memory implementation of every store trait.
///
/// Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

/// Unit of work over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryTx {
    staged: Tables,
    shared: Arc<Shared>,
    _gate: OwnedMutexGuard<()>,
}

impl InMemoryStore {
    /// Empty store with default platform settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.shared.tables.lock().unwrap()
    }

    // ------------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------------

    /// Make the next call to `point` fail with `error`.
    ///
    /// Arming the same point twice fails its next two calls.
    pub fn fail_next(&self, point: FailPoint, error: StoreError) {
        self.shared.fail_points.lock().unwrap().push((point, error));
    }

    /// Number of committed units of work
    #[must_use]
    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------------

    /// Replace the platform settings
    pub fn set_settings(&self, settings: PlatformSettings) {
        *self.shared.settings.lock().unwrap() = settings;
    }

    /// Number of times settings were loaded
    #[must_use]
    pub fn settings_loads(&self) -> usize {
        self.shared.settings_loads.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------------

    /// Insert or replace a competition
    pub fn seed_competition(&self, competition: Competition) {
        self.tables().competitions.insert(competition.id, competition);
    }

    /// Insert or replace an instant-win slot
    pub fn seed_instant_win(&self, slot: InstantWinSlot) -> InstantWinId {
        let id = slot.id;
        self.tables().instant_wins.insert(id, slot);
        id
    }

    /// Set a wallet balance, creating the wallet if needed
    pub fn seed_wallet(&self, user_id: UserId, kind: WalletKind, balance: Money) -> WalletId {
        let mut tables = self.tables();
        let wallet = tables.wallets.entry((user_id, kind)).or_insert_with(|| Wallet {
            id: WalletId::new(),
            user_id,
            kind,
            balance: Money::ZERO,
        });
        wallet.balance = balance;
        wallet.id
    }

    /// Grant `count` unexpired universal tickets
    pub fn seed_universal_tickets(&self, user_id: UserId, count: usize) -> Vec<UniversalTicketId> {
        let created_at = crate::test_epoch();
        let mut tables = self.tables();
        (0..count)
            .map(|_| {
                let ticket = UniversalTicket {
                    id: UniversalTicketId::new(),
                    user_id,
                    is_used: false,
                    expires_at: None,
                    source: "seed".to_string(),
                    created_at,
                };
                let id = ticket.id;
                tables.universal_tickets.push(ticket);
                id
            })
            .collect()
    }

    /// Insert or replace a universal ticket
    pub fn seed_universal_ticket(&self, ticket: UniversalTicket) {
        let mut tables = self.tables();
        tables.universal_tickets.retain(|existing| existing.id != ticket.id);
        tables.universal_tickets.push(ticket);
    }

    /// Insert or replace a voucher
    pub fn seed_voucher(&self, voucher: Voucher) -> VoucherId {
        let id = voucher.id;
        self.tables().vouchers.insert(id, voucher);
        id
    }

    /// Insert or replace a spending record
    pub fn seed_spending_limits(&self, record: SpendingLimitRecord) {
        self.tables().spending_limits.insert(record.user_id, record);
    }

    /// Record what the payment gateway reports for `reference`.
    ///
    /// Keeps the purchase link of an existing intent.
    pub fn record_payment(&self, reference: &PaymentReference, amount: Money, status: PaymentStatus) {
        let mut tables = self.tables();
        let purchase_id = tables
            .payments
            .get(reference)
            .and_then(|payment| payment.purchase_id);
        tables.payments.insert(
            reference.clone(),
            PaymentRecord {
                reference: reference.clone(),
                purchase_id,
                amount,
                status,
                updated_at: crate::test_epoch(),
            },
        );
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Committed competition
    #[must_use]
    pub fn competition(&self, id: CompetitionId) -> Option<Competition> {
        self.tables().competitions.get(&id).cloned()
    }

    /// Tickets of a competition ordered by number
    #[must_use]
    pub fn tickets(&self, competition_id: CompetitionId) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .tables()
            .tickets
            .iter()
            .filter(|ticket| ticket.competition_id == competition_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|ticket| ticket.ticket_number);
        tickets
    }

    /// Tickets owned by a user across competitions
    #[must_use]
    pub fn user_tickets(&self, user_id: UserId) -> Vec<Ticket> {
        self.tables()
            .tickets
            .iter()
            .filter(|ticket| ticket.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Committed slot
    #[must_use]
    pub fn instant_win(&self, id: InstantWinId) -> Option<InstantWinSlot> {
        self.tables().instant_wins.get(&id).cloned()
    }

    /// Claim rows of a slot
    #[must_use]
    pub fn instant_win_claims(&self, id: InstantWinId) -> Vec<InstantWinClaim> {
        self.tables()
            .instant_win_claims
            .iter()
            .filter(|claim| claim.instant_win_id == id)
            .cloned()
            .collect()
    }

    /// Wallet balance, zero if the wallet does not exist
    #[must_use]
    pub fn wallet_balance(&self, user_id: UserId, kind: WalletKind) -> Money {
        self.tables()
            .wallets
            .get(&(user_id, kind))
            .map_or(Money::ZERO, |wallet| wallet.balance)
    }

    /// Ledger entries of one wallet in append order
    #[must_use]
    pub fn wallet_transactions(&self, user_id: UserId, kind: WalletKind) -> Vec<WalletTransaction> {
        let tables = self.tables();
        let Some(wallet_id) = tables.wallets.get(&(user_id, kind)).map(|wallet| wallet.id) else {
            return Vec::new();
        };
        tables
            .wallet_transactions
            .iter()
            .filter(|entry| entry.wallet_id == wallet_id)
            .cloned()
            .collect()
    }

    /// Universal tickets owned by a user, used or not
    #[must_use]
    pub fn universal_tickets(&self, user_id: UserId) -> Vec<UniversalTicket> {
        self.tables()
            .universal_tickets
            .iter()
            .filter(|ticket| ticket.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Committed voucher
    #[must_use]
    pub fn voucher(&self, id: VoucherId) -> Option<Voucher> {
        self.tables().vouchers.get(&id).cloned()
    }

    /// Usage rows of a voucher
    #[must_use]
    pub fn voucher_usages(&self, id: VoucherId) -> Vec<VoucherUsage> {
        self.tables()
            .voucher_usages
            .iter()
            .filter(|usage| usage.voucher_id == id)
            .cloned()
            .collect()
    }

    /// Committed purchase
    #[must_use]
    pub fn purchase(&self, id: PurchaseId) -> Option<Purchase> {
        self.tables().purchases.get(&id).cloned()
    }

    /// Purchases of a user
    #[must_use]
    pub fn purchases(&self, user_id: UserId) -> Vec<Purchase> {
        self.tables()
            .purchases
            .values()
            .filter(|purchase| purchase.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Recorded payment
    #[must_use]
    pub fn payment(&self, reference: &PaymentReference) -> Option<PaymentRecord> {
        self.tables().payments.get(reference).cloned()
    }

    /// Committed spending record
    #[must_use]
    pub fn spending_limits(&self, user_id: UserId) -> Option<SpendingLimitRecord> {
        self.tables().spending_limits.get(&user_id).cloned()
    }

    /// Points balance
    #[must_use]
    pub fn points(&self, user_id: UserId) -> u64 {
        self.tables().points.get(&user_id).copied().unwrap_or(0)
    }

    /// Physical-prize claims of a user
    #[must_use]
    pub fn prize_claims(&self, user_id: UserId) -> Vec<PrizeClaim> {
        self.tables()
            .prize_claims
            .iter()
            .filter(|claim| claim.user_id == user_id)
            .cloned()
            .collect()
    }
}

impl TransactionalStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> StoreResult<InMemoryTx> {
        let gate = self.shared.gate.clone().lock_owned().await;
        let staged = self.tables().clone();
        Ok(InMemoryTx {
            staged,
            shared: self.shared.clone(),
            _gate: gate,
        })
    }
}

impl SettingsStore for InMemoryStore {
    async fn load_settings(&self) -> StoreResult<PlatformSettings> {
        self.shared.settings_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.shared.settings.lock().unwrap().clone())
    }
}

impl InMemoryTx {
    fn trip(&self, point: FailPoint) -> StoreResult<()> {
        self.shared.trip(point)
    }
}

fn unique_violation(constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

fn missing(what: &str) -> StoreError {
    StoreError::Database(format!("{what} does not exist"))
}

impl UnitOfWork for InMemoryTx {
    async fn commit(self) -> StoreResult<()> {
        self.trip(FailPoint::Commit)?;
        *self.shared.tables.lock().unwrap() = self.staged;
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}

impl CompetitionStore for InMemoryTx {
    async fn lock_competition(&mut self, id: CompetitionId) -> StoreResult<Option<Competition>> {
        self.trip(FailPoint::LockCompetition)?;
        Ok(self.staged.competitions.get(&id).cloned())
    }

    async fn get_competition(&mut self, id: CompetitionId) -> StoreResult<Option<Competition>> {
        Ok(self.staged.competitions.get(&id).cloned())
    }

    async fn count_user_tickets(
        &mut self,
        competition_id: CompetitionId,
        user_id: UserId,
    ) -> StoreResult<u32> {
        let owned = self
            .staged
            .tickets
            .iter()
            .filter(|ticket| ticket.competition_id == competition_id && ticket.user_id == user_id)
            .count();
        Ok(u32::try_from(owned).unwrap_or(u32::MAX))
    }

    async fn add_sold_tickets(
        &mut self,
        id: CompetitionId,
        quantity: u32,
    ) -> StoreResult<Option<Competition>> {
        self.trip(FailPoint::AddSoldTickets)?;
        let Some(competition) = self.staged.competitions.get_mut(&id) else {
            return Ok(None);
        };
        match competition.sold_tickets.checked_add(quantity) {
            Some(sold) if sold <= competition.total_tickets => {
                competition.sold_tickets = sold;
                Ok(Some(competition.clone()))
            }
            _ => Ok(None),
        }
    }
}

impl TicketStore for InMemoryTx {
    async fn lock_ticket_numbering(&mut self, _competition_id: CompetitionId) -> StoreResult<()> {
        Ok(())
    }

    async fn max_ticket_number(&mut self, competition_id: CompetitionId) -> StoreResult<Option<u32>> {
        Ok(self
            .staged
            .tickets
            .iter()
            .filter(|ticket| ticket.competition_id == competition_id)
            .map(|ticket| ticket.ticket_number)
            .max())
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        self.trip(FailPoint::InsertTicket)?;
        let taken = self.staged.tickets.iter().any(|existing| {
            existing.competition_id == ticket.competition_id
                && existing.ticket_number == ticket.ticket_number
        });
        if taken {
            return Err(unique_violation("tickets_competition_id_ticket_number_key"));
        }
        let universal_reused = ticket.universal_ticket_id.is_some_and(|id| {
            self.staged
                .tickets
                .iter()
                .any(|existing| existing.universal_ticket_id == Some(id))
        });
        if universal_reused {
            return Err(unique_violation("tickets_universal_ticket_id_key"));
        }
        self.staged.tickets.push(ticket.clone());
        Ok(())
    }

    async fn take_universal_tickets(
        &mut self,
        user_id: UserId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<UniversalTicket>> {
        let mut redeemable: Vec<UniversalTicket> = self
            .staged
            .universal_tickets
            .iter()
            .filter(|ticket| ticket.user_id == user_id && ticket.is_redeemable(now))
            .cloned()
            .collect();
        redeemable.sort_by_key(|ticket| ticket.created_at);
        redeemable.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(redeemable)
    }

    async fn mark_universal_ticket_used(&mut self, id: UniversalTicketId) -> StoreResult<()> {
        self.trip(FailPoint::MarkUniversalTicketUsed)?;
        let ticket = self
            .staged
            .universal_tickets
            .iter_mut()
            .find(|ticket| ticket.id == id)
            .ok_or_else(|| missing("universal ticket"))?;
        ticket.is_used = true;
        Ok(())
    }

    async fn insert_universal_ticket(&mut self, ticket: &UniversalTicket) -> StoreResult<()> {
        self.staged.universal_tickets.push(ticket.clone());
        Ok(())
    }
}

impl InstantWinStore for InMemoryTx {
    async fn try_lock_claimable_instant_win(
        &mut self,
        competition_id: CompetitionId,
        ticket_number: u32,
    ) -> StoreResult<Option<InstantWinSlot>> {
        Ok(self
            .staged
            .instant_wins
            .values()
            .find(|slot| {
                slot.competition_id == competition_id
                    && slot.ticket_number == ticket_number
                    && slot.is_claimable()
            })
            .cloned())
    }

    async fn record_instant_win_claim(
        &mut self,
        slot: &InstantWinSlot,
        user_id: UserId,
        ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> StoreResult<InstantWinSlot> {
        self.trip(FailPoint::RecordInstantWinClaim)?;
        let stored = self
            .staged
            .instant_wins
            .get_mut(&slot.id)
            .ok_or_else(|| missing("instant win"))?;
        stored.current_winners = stored.current_winners.saturating_add(1);
        if stored.current_winners >= stored.max_winners {
            stored.claimed_by = Some(user_id);
            stored.claimed_at = Some(now);
        }
        let updated = stored.clone();
        self.staged.instant_win_claims.push(InstantWinClaim {
            instant_win_id: slot.id,
            user_id,
            ticket_id,
            claimed_at: now,
        });
        Ok(updated)
    }

    async fn insert_instant_wins(&mut self, slots: &[NewInstantWin]) -> StoreResult<Vec<InstantWinSlot>> {
        let mut created = Vec::with_capacity(slots.len());
        for new in slots {
            let taken = self.staged.instant_wins.values().any(|slot| {
                slot.competition_id == new.competition_id && slot.ticket_number == new.ticket_number
            });
            if taken {
                return Err(unique_violation("instant_wins_competition_id_ticket_number_key"));
            }
            let slot = InstantWinSlot {
                id: InstantWinId::new(),
                competition_id: new.competition_id,
                ticket_number: new.ticket_number,
                prize: new.prize.clone(),
                max_winners: new.max_winners,
                current_winners: 0,
                claimed_by: None,
                claimed_at: None,
                title: new.title.clone(),
                description: new.description.clone(),
                image_url: new.image_url.clone(),
            };
            self.staged.instant_wins.insert(slot.id, slot.clone());
            created.push(slot);
        }
        Ok(created)
    }

    async fn list_instant_wins(&mut self, competition_id: CompetitionId) -> StoreResult<Vec<InstantWinSlot>> {
        let mut slots: Vec<InstantWinSlot> = self
            .staged
            .instant_wins
            .values()
            .filter(|slot| slot.competition_id == competition_id)
            .cloned()
            .collect();
        slots.sort_by_key(|slot| slot.ticket_number);
        Ok(slots)
    }

    async fn lock_instant_win(&mut self, id: InstantWinId) -> StoreResult<Option<InstantWinSlot>> {
        Ok(self.staged.instant_wins.get(&id).cloned())
    }

    async fn set_instant_win_claim(
        &mut self,
        id: InstantWinId,
        claimed_by: Option<UserId>,
        current_winners: u32,
        claimed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let slot = self
            .staged
            .instant_wins
            .get_mut(&id)
            .ok_or_else(|| missing("instant win"))?;
        slot.claimed_by = claimed_by;
        slot.current_winners = current_winners;
        slot.claimed_at = claimed_at;
        Ok(())
    }
}

impl WalletStore for InMemoryTx {
    async fn lock_wallet(&mut self, user_id: UserId, kind: WalletKind) -> StoreResult<Option<Wallet>> {
        Ok(self.staged.wallets.get(&(user_id, kind)).cloned())
    }

    async fn lock_or_create_wallet(&mut self, user_id: UserId, kind: WalletKind) -> StoreResult<Wallet> {
        Ok(self
            .staged
            .wallets
            .entry((user_id, kind))
            .or_insert_with(|| Wallet {
                id: WalletId::new(),
                user_id,
                kind,
                balance: Money::ZERO,
            })
            .clone())
    }

    async fn set_wallet_balance(&mut self, wallet_id: WalletId, balance: Money) -> StoreResult<()> {
        let wallet = self
            .staged
            .wallets
            .values_mut()
            .find(|wallet| wallet.id == wallet_id)
            .ok_or_else(|| missing("wallet"))?;
        wallet.balance = balance;
        Ok(())
    }

    async fn append_wallet_transaction(&mut self, entry: &WalletTransaction) -> StoreResult<()> {
        self.trip(FailPoint::AppendWalletTransaction)?;
        self.staged.wallet_transactions.push(entry.clone());
        Ok(())
    }
}

impl PurchaseStore for InMemoryTx {
    async fn insert_purchase(&mut self, purchase: &Purchase) -> StoreResult<()> {
        if self.staged.purchases.contains_key(&purchase.id) {
            return Err(unique_violation("purchases_pkey"));
        }
        self.staged.purchases.insert(purchase.id, purchase.clone());
        Ok(())
    }

    async fn lock_purchase(&mut self, id: PurchaseId) -> StoreResult<Option<Purchase>> {
        Ok(self.staged.purchases.get(&id).cloned())
    }

    async fn update_purchase_status(
        &mut self,
        id: PurchaseId,
        status: PurchaseStatus,
        failure_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.trip(FailPoint::UpdatePurchaseStatus)?;
        let purchase = self
            .staged
            .purchases
            .get_mut(&id)
            .ok_or_else(|| missing("purchase"))?;
        purchase.status = status;
        purchase.failure_reason = failure_reason.map(str::to_string);
        purchase.updated_at = now;
        Ok(())
    }

    async fn upsert_payment(&mut self, payment: &PaymentRecord) -> StoreResult<()> {
        self.staged
            .payments
            .insert(payment.reference.clone(), payment.clone());
        Ok(())
    }

    async fn find_payment(&mut self, reference: &PaymentReference) -> StoreResult<Option<PaymentRecord>> {
        Ok(self.staged.payments.get(reference).cloned())
    }
}

impl VoucherStore for InMemoryTx {
    async fn lock_voucher_by_code(&mut self, code: &str) -> StoreResult<Option<Voucher>> {
        Ok(self
            .staged
            .vouchers
            .values()
            .find(|voucher| voucher.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn lock_voucher(&mut self, id: VoucherId) -> StoreResult<Option<Voucher>> {
        Ok(self.staged.vouchers.get(&id).cloned())
    }

    async fn count_voucher_usages(&mut self, voucher_id: VoucherId, user_id: UserId) -> StoreResult<u32> {
        let used = self
            .staged
            .voucher_usages
            .iter()
            .filter(|usage| usage.voucher_id == voucher_id && usage.user_id == user_id)
            .count();
        Ok(u32::try_from(used).unwrap_or(u32::MAX))
    }

    async fn record_voucher_usage(&mut self, usage: &VoucherUsage) -> StoreResult<()> {
        self.trip(FailPoint::RecordVoucherUsage)?;
        let voucher = self
            .staged
            .vouchers
            .get_mut(&usage.voucher_id)
            .ok_or_else(|| missing("voucher"))?;
        voucher.usage_count = voucher.usage_count.saturating_add(1);
        self.staged.voucher_usages.push(usage.clone());
        Ok(())
    }
}

impl SpendingLimitStore for InMemoryTx {
    async fn lock_spending_limits(&mut self, user_id: UserId) -> StoreResult<Option<SpendingLimitRecord>> {
        Ok(self.staged.spending_limits.get(&user_id).cloned())
    }

    async fn lock_or_create_spending_limits(
        &mut self,
        user_id: UserId,
        today: NaiveDate,
    ) -> StoreResult<SpendingLimitRecord> {
        Ok(self
            .staged
            .spending_limits
            .entry(user_id)
            .or_insert_with(|| SpendingLimitRecord::unlimited(user_id, today))
            .clone())
    }

    async fn save_spending_limits(&mut self, record: &SpendingLimitRecord) -> StoreResult<()> {
        self.trip(FailPoint::SaveSpendingLimits)?;
        self.staged
            .spending_limits
            .insert(record.user_id, record.clone());
        Ok(())
    }
}

impl PrizeStore for InMemoryTx {
    async fn add_points(&mut self, user_id: UserId, points: u64, _reference: &str) -> StoreResult<()> {
        let balance = self.staged.points.entry(user_id).or_insert(0);
        *balance = balance.saturating_add(points);
        Ok(())
    }

    async fn insert_prize_claim(&mut self, claim: &PrizeClaim) -> StoreResult<()> {
        self.staged.prize_claims.push(claim.clone());
        Ok(())
    }
}
