//! `PostgreSQL` implementation of the allocation store traits.
//!
//! [`PgStore`] owns the connection pool and opens units of work; [`PgTx`]
//! wraps one database transaction and implements every store trait on it.
//!
//! # Locking
//!
//! - Competition, wallet, purchase, voucher and spending rows are locked
//!   with `SELECT ... FOR UPDATE`.
//! - Ticket numbering is serialized per competition with a transaction-scoped
//!   advisory lock.
//! - Universal tickets and claimable instant-win slots are taken with
//!   `FOR UPDATE SKIP LOCKED` so concurrent buyers never queue behind each
//!   other for them.
//!
//! Every unit of work sets `lock_timeout` and `statement_timeout` locally, so
//! a blocked request fails with [`StoreError::LockTimeout`] instead of
//! hanging.

use crate::config::PostgresConfig;
use crate::error::map_sqlx_error;
use chrono::{DateTime, NaiveDate, Utc};
use prizedraw_core::model::{
    Competition, CompetitionStatus, FundingBreakdown, InstantWinSlot, NewInstantWin,
    PaymentRecord, PaymentStatus, PlatformSettings, Prize, PrizeClaim, PrizeType, Purchase,
    PurchaseLine, PurchaseStatus, SpendingLimitRecord, Ticket, UniversalTicket, Voucher,
    VoucherReward, VoucherStatus, VoucherUsage, Wallet, WalletKind, WalletTransaction,
};
use prizedraw_core::{
    CompetitionId, CompetitionStore, InstantWinId, InstantWinStore, Money, PaymentReference,
    PrizeStore, PurchaseId, PurchaseStore, SettingsStore, SpendingLimitStore, StoreError,
    StoreResult, TicketId, TicketStore, TransactionalStore, UniversalTicketId, UnitOfWork, UserId,
    VoucherId, VoucherStore, WalletId, WalletStore,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

const COMPETITION_COLUMNS: &str = "id, title, price_per_ticket, total_tickets, sold_tickets, \
     max_entries_per_user, status, is_free";

const INSTANT_WIN_COLUMNS: &str = "id, competition_id, ticket_number, prize_type, prize_value, \
     prize_name, max_winners, current_winners, claimed_by, claimed_at, title, description, image_url";

const PURCHASE_COLUMNS: &str = "id, user_id, lines, base_amount, discount, amount, credit_used, \
     cash_used, outstanding, voucher_id, payment_reference, status, failure_reason, created_at, \
     updated_at";

const VOUCHER_COLUMNS: &str = "id, code, status, reward, usage_limit, usage_count, starts_at, \
     expires_at, allow_multiple_per_user";

const SPENDING_COLUMNS: &str = "user_id, single_purchase_limit, daily_limit, weekly_limit, \
     monthly_limit, daily_spent, weekly_spent, monthly_spent, last_reset";

/// Connection pool plus per-transaction timeouts.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout_ms: u64,
    statement_timeout_ms: u64,
}

impl PgStore {
    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no connection can be
    /// established within the configured timeout.
    pub async fn connect(config: &PostgresConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(map_sqlx_error)?;

        tracing::info!(
            max_connections = config.max_connections,
            lock_timeout_ms = config.lock_timeout_ms,
            "Allocation store connected"
        );

        Ok(Self {
            pool,
            lock_timeout_ms: config.lock_timeout_ms,
            statement_timeout_ms: config.statement_timeout_ms,
        })
    }

    /// Wrap an existing pool, using the default timeouts.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        let defaults = PostgresConfig::default();
        Self {
            pool,
            lock_timeout_ms: defaults.lock_timeout_ms,
            statement_timeout_ms: defaults.statement_timeout_ms,
        }
    }

    /// Override the per-transaction lock timeout.
    #[must_use]
    pub const fn with_lock_timeout_ms(mut self, lock_timeout_ms: u64) -> Self {
        self.lock_timeout_ms = lock_timeout_ms;
        self
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }

    /// Insert a competition.
    ///
    /// # Errors
    ///
    /// Returns a store error if the insert fails.
    pub async fn create_competition(&self, competition: &Competition) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO competitions (
                id, title, price_per_ticket, total_tickets, sold_tickets,
                max_entries_per_user, status, is_free
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(competition.id.as_uuid())
        .bind(&competition.title)
        .bind(money_to_i64(competition.price_per_ticket)?)
        .bind(to_i32(competition.total_tickets)?)
        .bind(to_i32(competition.sold_tickets)?)
        .bind(competition.max_entries_per_user.map(to_i32).transpose()?)
        .bind(competition.status.as_str())
        .bind(competition.is_free)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Insert a voucher.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] if the code (compared
    /// case-insensitively) already exists.
    pub async fn create_voucher(&self, voucher: &Voucher) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO vouchers (
                id, code, status, reward, usage_limit, usage_count,
                starts_at, expires_at, allow_multiple_per_user
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(voucher.id.as_uuid())
        .bind(&voucher.code)
        .bind(voucher.status.as_str())
        .bind(Json(voucher.reward))
        .bind(voucher.usage_limit.map(to_i32).transpose()?)
        .bind(to_i32(voucher.usage_count)?)
        .bind(voucher.starts_at)
        .bind(voucher.expires_at)
        .bind(voucher.allow_multiple_per_user)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Record a gateway confirmation for a payment reference.
    ///
    /// The purchase link written when the intent was created is kept.
    ///
    /// # Errors
    ///
    /// Returns a store error if the upsert fails.
    pub async fn record_payment(
        &self,
        reference: &PaymentReference,
        amount: Money,
        status: PaymentStatus,
    ) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        upsert_payment_row(
            &mut conn,
            &PaymentRecord {
                reference: reference.clone(),
                purchase_id: None,
                amount,
                status,
                updated_at: Utc::now(),
            },
        )
        .await
    }

    /// Overwrite the platform settings row.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    pub async fn save_settings(&self, settings: &PlatformSettings) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO platform_settings (id, purchases_enabled, max_quantity_per_request)
            VALUES (TRUE, $1, $2)
            ON CONFLICT (id) DO UPDATE
            SET purchases_enabled = EXCLUDED.purchases_enabled,
                max_quantity_per_request = EXCLUDED.max_quantity_per_request
            ",
        )
        .bind(settings.purchases_enabled)
        .bind(to_i32(settings.max_quantity_per_request)?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

impl TransactionalStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> StoreResult<PgTx> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)")
            .bind(format!("{}ms", self.lock_timeout_ms))
            .bind(format!("{}ms", self.statement_timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(PgTx { tx })
    }
}

impl SettingsStore for PgStore {
    async fn load_settings(&self) -> StoreResult<PlatformSettings> {
        let row = sqlx::query(
            "SELECT purchases_enabled, max_quantity_per_request FROM platform_settings LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => Ok(PlatformSettings {
                purchases_enabled: get(&row, "purchases_enabled")?,
                max_quantity_per_request: from_i32(get(&row, "max_quantity_per_request")?)?,
            }),
            None => Ok(PlatformSettings::default()),
        }
    }
}

/// One database transaction.
///
/// Dropping it without [`commit`](UnitOfWork::commit) rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PgTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTx").finish_non_exhaustive()
    }
}

impl CompetitionStore for PgTx {
    async fn lock_competition(&mut self, id: CompetitionId) -> StoreResult<Option<Competition>> {
        let row = sqlx::query(&format!(
            "SELECT {COMPETITION_COLUMNS} FROM competitions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(competition_from_row).transpose()
    }

    async fn get_competition(&mut self, id: CompetitionId) -> StoreResult<Option<Competition>> {
        let row = sqlx::query(&format!(
            "SELECT {COMPETITION_COLUMNS} FROM competitions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(competition_from_row).transpose()
    }

    async fn count_user_tickets(
        &mut self,
        competition_id: CompetitionId,
        user_id: UserId,
    ) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tickets WHERE competition_id = $1 AND user_id = $2",
        )
        .bind(competition_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("ticket count {count}")))
    }

    async fn add_sold_tickets(
        &mut self,
        id: CompetitionId,
        quantity: u32,
    ) -> StoreResult<Option<Competition>> {
        let row = sqlx::query(&format!(
            "UPDATE competitions SET sold_tickets = sold_tickets + $2 \
             WHERE id = $1 AND sold_tickets + $2 <= total_tickets \
             RETURNING {COMPETITION_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(to_i32(quantity)?)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(competition_from_row).transpose()
    }
}

impl TicketStore for PgTx {
    async fn lock_ticket_numbering(&mut self, competition_id: CompetitionId) -> StoreResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("ticket_numbering:{competition_id}"))
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn max_ticket_number(&mut self, competition_id: CompetitionId) -> StoreResult<Option<u32>> {
        let max: Option<i32> =
            sqlx::query_scalar("SELECT MAX(ticket_number) FROM tickets WHERE competition_id = $1")
                .bind(competition_id.as_uuid())
                .fetch_one(&mut *self.tx)
                .await
                .map_err(map_sqlx_error)?;
        max.map(from_i32).transpose()
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO tickets (
                id, competition_id, user_id, ticket_number, ticket_type,
                is_instant_win, universal_ticket_id, purchase_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.competition_id.as_uuid())
        .bind(ticket.user_id.as_uuid())
        .bind(to_i32(ticket.ticket_number)?)
        .bind(ticket.ticket_type.as_str())
        .bind(ticket.is_instant_win)
        .bind(ticket.universal_ticket_id.map(|id| *id.as_uuid()))
        .bind(ticket.purchase_id.map(|id| *id.as_uuid()))
        .bind(ticket.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn take_universal_tickets(
        &mut self,
        user_id: UserId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<UniversalTicket>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, is_used, expires_at, source, created_at
            FROM universal_tickets
            WHERE user_id = $1
              AND NOT is_used
              AND (expires_at IS NULL OR expires_at > $2)
            ORDER BY created_at, id
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(user_id.as_uuid())
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(UniversalTicket {
                    id: UniversalTicketId::from_uuid(get(row, "id")?),
                    user_id: UserId::from_uuid(get(row, "user_id")?),
                    is_used: get(row, "is_used")?,
                    expires_at: get(row, "expires_at")?,
                    source: get(row, "source")?,
                    created_at: get(row, "created_at")?,
                })
            })
            .collect()
    }

    async fn mark_universal_ticket_used(&mut self, id: UniversalTicketId) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE universal_tickets SET is_used = TRUE, used_at = now() WHERE id = $1 AND NOT is_used",
        )
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Database(format!(
                "universal ticket {id} missing or already used"
            )));
        }
        Ok(())
    }

    async fn insert_universal_ticket(&mut self, ticket: &UniversalTicket) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO universal_tickets (id, user_id, is_used, expires_at, source, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.user_id.as_uuid())
        .bind(ticket.is_used)
        .bind(ticket.expires_at)
        .bind(&ticket.source)
        .bind(ticket.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

impl InstantWinStore for PgTx {
    async fn try_lock_claimable_instant_win(
        &mut self,
        competition_id: CompetitionId,
        ticket_number: u32,
    ) -> StoreResult<Option<InstantWinSlot>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANT_WIN_COLUMNS} FROM instant_wins \
             WHERE competition_id = $1 AND ticket_number = $2 \
               AND claimed_by IS NULL AND current_winners < max_winners \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(competition_id.as_uuid())
        .bind(to_i32(ticket_number)?)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(instant_win_from_row).transpose()
    }

    async fn record_instant_win_claim(
        &mut self,
        slot: &InstantWinSlot,
        user_id: UserId,
        ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> StoreResult<InstantWinSlot> {
        // SET expressions see the pre-update row.
        let row = sqlx::query(&format!(
            "UPDATE instant_wins SET \
                 current_winners = current_winners + 1, \
                 claimed_by = CASE WHEN current_winners + 1 >= max_winners THEN $2 ELSE claimed_by END, \
                 claimed_at = CASE WHEN current_winners + 1 >= max_winners THEN $3 ELSE claimed_at END \
             WHERE id = $1 \
             RETURNING {INSTANT_WIN_COLUMNS}"
        ))
        .bind(slot.id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StoreError::Database(format!("instant win {} not found", slot.id)))?;

        sqlx::query(
            r"
            INSERT INTO instant_win_claims (instant_win_id, user_id, ticket_id, claimed_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(slot.id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(ticket_id.as_uuid())
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        instant_win_from_row(&row)
    }

    async fn insert_instant_wins(&mut self, slots: &[NewInstantWin]) -> StoreResult<Vec<InstantWinSlot>> {
        let mut inserted = Vec::with_capacity(slots.len());
        for slot in slots {
            let row = sqlx::query(&format!(
                "INSERT INTO instant_wins ( \
                     id, competition_id, ticket_number, prize_type, prize_value, prize_name, \
                     max_winners, title, description, image_url \
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 RETURNING {INSTANT_WIN_COLUMNS}"
            ))
            .bind(InstantWinId::new().as_uuid())
            .bind(slot.competition_id.as_uuid())
            .bind(to_i32(slot.ticket_number)?)
            .bind(slot.prize.prize_type.as_str())
            .bind(u64_to_i64(slot.prize.value)?)
            .bind(&slot.prize.name)
            .bind(to_i32(slot.max_winners)?)
            .bind(slot.title.as_deref())
            .bind(slot.description.as_deref())
            .bind(slot.image_url.as_deref())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
            inserted.push(instant_win_from_row(&row)?);
        }
        Ok(inserted)
    }

    async fn list_instant_wins(&mut self, competition_id: CompetitionId) -> StoreResult<Vec<InstantWinSlot>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANT_WIN_COLUMNS} FROM instant_wins \
             WHERE competition_id = $1 ORDER BY ticket_number"
        ))
        .bind(competition_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(instant_win_from_row).collect()
    }

    async fn lock_instant_win(&mut self, id: InstantWinId) -> StoreResult<Option<InstantWinSlot>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANT_WIN_COLUMNS} FROM instant_wins WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(instant_win_from_row).transpose()
    }

    async fn set_instant_win_claim(
        &mut self,
        id: InstantWinId,
        claimed_by: Option<UserId>,
        current_winners: u32,
        claimed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE instant_wins
            SET claimed_by = $2, current_winners = $3, claimed_at = $4
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .bind(claimed_by.map(|user| *user.as_uuid()))
        .bind(to_i32(current_winners)?)
        .bind(claimed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

impl WalletStore for PgTx {
    async fn lock_wallet(&mut self, user_id: UserId, kind: WalletKind) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query(
            "SELECT id, user_id, kind, balance FROM wallets WHERE user_id = $1 AND kind = $2 FOR UPDATE",
        )
        .bind(user_id.as_uuid())
        .bind(kind.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            Ok(Wallet {
                id: WalletId::from_uuid(get(&row, "id")?),
                user_id: UserId::from_uuid(get(&row, "user_id")?),
                kind: WalletKind::parse(&get::<String>(&row, "kind")?)?,
                balance: money_from_i64(get(&row, "balance")?)?,
            })
        })
        .transpose()
    }

    async fn lock_or_create_wallet(&mut self, user_id: UserId, kind: WalletKind) -> StoreResult<Wallet> {
        sqlx::query(
            r"
            INSERT INTO wallets (id, user_id, kind, balance)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (user_id, kind) DO NOTHING
            ",
        )
        .bind(WalletId::new().as_uuid())
        .bind(user_id.as_uuid())
        .bind(kind.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        self.lock_wallet(user_id, kind)
            .await?
            .ok_or_else(|| StoreError::Database(format!("{kind} wallet for {user_id} vanished")))
    }

    async fn set_wallet_balance(&mut self, wallet_id: WalletId, balance: Money) -> StoreResult<()> {
        sqlx::query("UPDATE wallets SET balance = $2 WHERE id = $1")
            .bind(wallet_id.as_uuid())
            .bind(money_to_i64(balance)?)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn append_wallet_transaction(&mut self, entry: &WalletTransaction) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO wallet_transactions (
                id, wallet_id, kind, amount, signed_amount, reference, balance_after, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.wallet_id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(money_to_i64(entry.amount)?)
        .bind(entry.signed_amount())
        .bind(&entry.reference)
        .bind(money_to_i64(entry.balance_after)?)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

impl PurchaseStore for PgTx {
    async fn insert_purchase(&mut self, purchase: &Purchase) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO purchases (
                id, user_id, lines, base_amount, discount, amount,
                credit_used, cash_used, outstanding, voucher_id, payment_reference,
                status, failure_reason, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ",
        )
        .bind(purchase.id.as_uuid())
        .bind(purchase.user_id.as_uuid())
        .bind(Json(&purchase.lines))
        .bind(money_to_i64(purchase.base_amount)?)
        .bind(money_to_i64(purchase.discount)?)
        .bind(money_to_i64(purchase.amount)?)
        .bind(money_to_i64(purchase.breakdown.credit_used)?)
        .bind(money_to_i64(purchase.breakdown.cash_used)?)
        .bind(money_to_i64(purchase.breakdown.outstanding)?)
        .bind(purchase.voucher_id.map(|id| *id.as_uuid()))
        .bind(purchase.payment_reference.as_ref().map(PaymentReference::as_str))
        .bind(purchase.status.as_str())
        .bind(purchase.failure_reason.as_deref())
        .bind(purchase.created_at)
        .bind(purchase.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn lock_purchase(&mut self, id: PurchaseId) -> StoreResult<Option<Purchase>> {
        let row = sqlx::query(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(purchase_from_row).transpose()
    }

    async fn update_purchase_status(
        &mut self,
        id: PurchaseId,
        status: PurchaseStatus,
        failure_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE purchases SET status = $2, failure_reason = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(failure_reason)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn upsert_payment(&mut self, payment: &PaymentRecord) -> StoreResult<()> {
        upsert_payment_row(&mut self.tx, payment).await
    }

    async fn find_payment(&mut self, reference: &PaymentReference) -> StoreResult<Option<PaymentRecord>> {
        let row = sqlx::query(
            "SELECT reference, purchase_id, amount, status, updated_at FROM payments WHERE reference = $1",
        )
        .bind(reference.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            Ok(PaymentRecord {
                reference: PaymentReference::new(get::<String>(&row, "reference")?),
                purchase_id: get::<Option<Uuid>>(&row, "purchase_id")?.map(PurchaseId::from_uuid),
                amount: money_from_i64(get(&row, "amount")?)?,
                status: PaymentStatus::parse(&get::<String>(&row, "status")?)?,
                updated_at: get(&row, "updated_at")?,
            })
        })
        .transpose()
    }
}

impl VoucherStore for PgTx {
    async fn lock_voucher_by_code(&mut self, code: &str) -> StoreResult<Option<Voucher>> {
        let row = sqlx::query(&format!(
            "SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE lower(code) = lower($1) FOR UPDATE"
        ))
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(voucher_from_row).transpose()
    }

    async fn lock_voucher(&mut self, id: VoucherId) -> StoreResult<Option<Voucher>> {
        let row = sqlx::query(&format!(
            "SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(voucher_from_row).transpose()
    }

    async fn count_voucher_usages(&mut self, voucher_id: VoucherId, user_id: UserId) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM voucher_usages WHERE voucher_id = $1 AND user_id = $2",
        )
        .bind(voucher_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("voucher usage count {count}")))
    }

    async fn record_voucher_usage(&mut self, usage: &VoucherUsage) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO voucher_usages (voucher_id, user_id, purchase_id, payment_reference, used_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(usage.voucher_id.as_uuid())
        .bind(usage.user_id.as_uuid())
        .bind(usage.purchase_id.as_uuid())
        .bind(usage.payment_reference.as_ref().map(PaymentReference::as_str))
        .bind(usage.used_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query("UPDATE vouchers SET usage_count = usage_count + 1 WHERE id = $1")
            .bind(usage.voucher_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

impl SpendingLimitStore for PgTx {
    async fn lock_spending_limits(&mut self, user_id: UserId) -> StoreResult<Option<SpendingLimitRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SPENDING_COLUMNS} FROM spending_limits WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            Ok(SpendingLimitRecord {
                user_id: UserId::from_uuid(get(&row, "user_id")?),
                single_purchase_limit: optional_money(get(&row, "single_purchase_limit")?)?,
                daily_limit: optional_money(get(&row, "daily_limit")?)?,
                weekly_limit: optional_money(get(&row, "weekly_limit")?)?,
                monthly_limit: optional_money(get(&row, "monthly_limit")?)?,
                daily_spent: money_from_i64(get(&row, "daily_spent")?)?,
                weekly_spent: money_from_i64(get(&row, "weekly_spent")?)?,
                monthly_spent: money_from_i64(get(&row, "monthly_spent")?)?,
                last_reset: get(&row, "last_reset")?,
            })
        })
        .transpose()
    }

    async fn lock_or_create_spending_limits(
        &mut self,
        user_id: UserId,
        today: NaiveDate,
    ) -> StoreResult<SpendingLimitRecord> {
        sqlx::query(
            r"
            INSERT INTO spending_limits (user_id, daily_spent, weekly_spent, monthly_spent, last_reset)
            VALUES ($1, 0, 0, 0, $2)
            ON CONFLICT (user_id) DO NOTHING
            ",
        )
        .bind(user_id.as_uuid())
        .bind(today)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        self.lock_spending_limits(user_id)
            .await?
            .ok_or_else(|| StoreError::Database(format!("spending limits for {user_id} vanished")))
    }

    async fn save_spending_limits(&mut self, record: &SpendingLimitRecord) -> StoreResult<()> {
        let optional = |limit: Option<Money>| limit.map(money_to_i64).transpose();
        sqlx::query(&format!(
            "INSERT INTO spending_limits ({SPENDING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 single_purchase_limit = EXCLUDED.single_purchase_limit, \
                 daily_limit = EXCLUDED.daily_limit, \
                 weekly_limit = EXCLUDED.weekly_limit, \
                 monthly_limit = EXCLUDED.monthly_limit, \
                 daily_spent = EXCLUDED.daily_spent, \
                 weekly_spent = EXCLUDED.weekly_spent, \
                 monthly_spent = EXCLUDED.monthly_spent, \
                 last_reset = EXCLUDED.last_reset"
        ))
        .bind(record.user_id.as_uuid())
        .bind(optional(record.single_purchase_limit)?)
        .bind(optional(record.daily_limit)?)
        .bind(optional(record.weekly_limit)?)
        .bind(optional(record.monthly_limit)?)
        .bind(money_to_i64(record.daily_spent)?)
        .bind(money_to_i64(record.weekly_spent)?)
        .bind(money_to_i64(record.monthly_spent)?)
        .bind(record.last_reset)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

impl PrizeStore for PgTx {
    async fn add_points(&mut self, user_id: UserId, points: u64, reference: &str) -> StoreResult<()> {
        let points = u64_to_i64(points)?;
        sqlx::query(
            r"
            INSERT INTO user_points (user_id, balance) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET balance = user_points.balance + EXCLUDED.balance
            ",
        )
        .bind(user_id.as_uuid())
        .bind(points)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query("INSERT INTO points_transactions (user_id, points, reference) VALUES ($1, $2, $3)")
            .bind(user_id.as_uuid())
            .bind(points)
            .bind(reference)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn insert_prize_claim(&mut self, claim: &PrizeClaim) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO prize_claims (
                id, user_id, instant_win_id, competition_id, prize_name, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(claim.id.as_uuid())
        .bind(claim.user_id.as_uuid())
        .bind(claim.instant_win_id.as_uuid())
        .bind(claim.competition_id.as_uuid())
        .bind(&claim.prize_name)
        .bind(claim.status.as_str())
        .bind(claim.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

impl UnitOfWork for PgTx {
    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

// ============================================================================
// Row decoding
// ============================================================================

async fn upsert_payment_row(
    conn: &mut sqlx::PgConnection,
    payment: &PaymentRecord,
) -> StoreResult<()> {
    sqlx::query(
        r"
        INSERT INTO payments (reference, purchase_id, amount, status, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (reference) DO UPDATE
        SET purchase_id = COALESCE(EXCLUDED.purchase_id, payments.purchase_id),
            amount = EXCLUDED.amount,
            status = EXCLUDED.status,
            updated_at = EXCLUDED.updated_at
        ",
    )
    .bind(payment.reference.as_str())
    .bind(payment.purchase_id.map(|id| *id.as_uuid()))
    .bind(money_to_i64(payment.amount)?)
    .bind(payment.status.as_str())
    .bind(payment.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(map_sqlx_error)
}

fn competition_from_row(row: &PgRow) -> StoreResult<Competition> {
    Ok(Competition {
        id: CompetitionId::from_uuid(get(row, "id")?),
        title: get(row, "title")?,
        price_per_ticket: money_from_i64(get(row, "price_per_ticket")?)?,
        total_tickets: from_i32(get(row, "total_tickets")?)?,
        sold_tickets: from_i32(get(row, "sold_tickets")?)?,
        max_entries_per_user: get::<Option<i32>>(row, "max_entries_per_user")?
            .map(from_i32)
            .transpose()?,
        status: CompetitionStatus::parse(&get::<String>(row, "status")?)?,
        is_free: get(row, "is_free")?,
    })
}

fn instant_win_from_row(row: &PgRow) -> StoreResult<InstantWinSlot> {
    let prize_value: i64 = get(row, "prize_value")?;
    Ok(InstantWinSlot {
        id: InstantWinId::from_uuid(get(row, "id")?),
        competition_id: CompetitionId::from_uuid(get(row, "competition_id")?),
        ticket_number: from_i32(get(row, "ticket_number")?)?,
        prize: Prize {
            prize_type: PrizeType::parse(&get::<String>(row, "prize_type")?)?,
            value: u64::try_from(prize_value)
                .map_err(|_| StoreError::Corrupt(format!("negative prize value {prize_value}")))?,
            name: get(row, "prize_name")?,
        },
        max_winners: from_i32(get(row, "max_winners")?)?,
        current_winners: from_i32(get(row, "current_winners")?)?,
        claimed_by: get::<Option<Uuid>>(row, "claimed_by")?.map(UserId::from_uuid),
        claimed_at: get(row, "claimed_at")?,
        title: get(row, "title")?,
        description: get(row, "description")?,
        image_url: get(row, "image_url")?,
    })
}

fn purchase_from_row(row: &PgRow) -> StoreResult<Purchase> {
    let Json(lines): Json<Vec<PurchaseLine>> = get(row, "lines")?;
    Ok(Purchase {
        id: PurchaseId::from_uuid(get(row, "id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        lines,
        base_amount: money_from_i64(get(row, "base_amount")?)?,
        discount: money_from_i64(get(row, "discount")?)?,
        amount: money_from_i64(get(row, "amount")?)?,
        breakdown: FundingBreakdown {
            credit_used: money_from_i64(get(row, "credit_used")?)?,
            cash_used: money_from_i64(get(row, "cash_used")?)?,
            outstanding: money_from_i64(get(row, "outstanding")?)?,
        },
        voucher_id: get::<Option<Uuid>>(row, "voucher_id")?.map(VoucherId::from_uuid),
        payment_reference: get::<Option<String>>(row, "payment_reference")?
            .map(PaymentReference::new),
        status: PurchaseStatus::parse(&get::<String>(row, "status")?)?,
        failure_reason: get(row, "failure_reason")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn voucher_from_row(row: &PgRow) -> StoreResult<Voucher> {
    let Json(reward): Json<VoucherReward> = get(row, "reward")?;
    Ok(Voucher {
        id: VoucherId::from_uuid(get(row, "id")?),
        code: get(row, "code")?,
        status: VoucherStatus::parse(&get::<String>(row, "status")?)?,
        reward,
        usage_limit: get::<Option<i32>>(row, "usage_limit")?
            .map(from_i32)
            .transpose()?,
        usage_count: from_i32(get(row, "usage_count")?)?,
        starts_at: get(row, "starts_at")?,
        expires_at: get(row, "expires_at")?,
        allow_multiple_per_user: get(row, "allow_multiple_per_user")?,
    })
}

// ============================================================================
// Numeric conversions
// ============================================================================

fn to_i32(value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::Database(format!("{value} exceeds INTEGER range")))
}

fn from_i32(value: i32) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative counter {value}")))
}

fn u64_to_i64(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Database(format!("{value} exceeds BIGINT range")))
}

fn money_to_i64(money: Money) -> StoreResult<i64> {
    u64_to_i64(money.pence())
}

fn money_from_i64(pence: i64) -> StoreResult<Money> {
    u64::try_from(pence)
        .map(Money::from_pence)
        .map_err(|_| StoreError::Corrupt(format!("negative amount {pence}")))
}

fn optional_money(pence: Option<i64>) -> StoreResult<Option<Money>> {
    pence.map(money_from_i64).transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn negative_amounts_are_corrupt() {
        assert!(matches!(money_from_i64(-1), Err(StoreError::Corrupt(_))));
        assert_eq!(money_from_i64(250).unwrap(), Money::from_pence(250));
    }

    #[test]
    fn counters_outside_integer_range_are_rejected() {
        assert!(to_i32(u32::MAX).is_err());
        assert_eq!(to_i32(42).unwrap(), 42);
        assert!(matches!(from_i32(-3), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn missing_limits_stay_unset() {
        assert_eq!(optional_money(None).unwrap(), None);
        assert_eq!(
            optional_money(Some(1_000)).unwrap(),
            Some(Money::from_pence(1_000))
        );
    }
}
