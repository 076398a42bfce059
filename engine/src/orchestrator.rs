//! Allocation orchestrator: the top-level use case.
//!
//! One request runs in one unit of work:
//!
//! 1. lock and validate every competition in ascending id order
//! 2. price the charge and apply the voucher
//! 3. check spending limits against the discounted amount
//! 4. reserve funds through the resolved [`FundingPath`]
//! 5. record spend, bump sold counters, then number, claim and insert each
//!    ticket
//! 6. finalize the funding path and record voucher usage
//!
//! Any error discards the unit of work, so a rejected request leaves every
//! entity as it was. Domain events are published only after commit.

use crate::error::{AllocationError, Result, VoucherRejection};
use crate::events::TracingEventPublisher;
use crate::funding::{FundingChoice, FundingPath, FundingRequest, Reservation, WalletSelection, plan_external};
use crate::instant_win::{ClaimOutcome, ClaimedPrize, InstantWinClaimer};
use crate::metrics::{record_allocated, record_payment_required, record_publish_failure, record_rejected};
use crate::numbering::TicketNumberer;
use crate::settings::SettingsCache;
use crate::spending::SpendingLimitGuard;
use crate::voucher::VoucherApplier;
use crate::wallet::WalletLedger;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use prizedraw_core::model::{
    Competition, CompetitionStatus, FundingBreakdown, PaymentRecord, PaymentStatus, Purchase,
    PurchaseLine, PurchaseStatus, Ticket, TicketType,
};
use prizedraw_core::{
    AllocatedNumbers, Clock, CompetitionId, CompetitionStore, DomainEvent, EventPublisher, Money,
    PaymentReference, PurchaseStore, TicketStore,
    PurchaseId, SettingsStore, SystemClock, TicketId, TransactionalStore, UnitOfWork, UserId,
    VoucherId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Requests & results
// ============================================================================

/// Tickets for one competition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Buyer
    pub user_id: UserId,
    /// Competition
    pub competition_id: CompetitionId,
    /// Tickets requested
    pub quantity: u32,
    /// How to pay
    pub funding: FundingChoice,
    /// Optional voucher code
    pub voucher_code: Option<String>,
}

/// Tickets for several competitions, settled as one purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkAllocationRequest {
    /// Buyer
    pub user_id: UserId,
    /// Competitions and quantities (repeated competitions are merged)
    pub items: Vec<PurchaseLine>,
    /// How to pay
    pub funding: FundingChoice,
    /// Optional voucher code, applied to the total
    pub voucher_code: Option<String>,
}

/// First phase of an externally paid checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    /// Buyer
    pub user_id: UserId,
    /// Competitions and quantities
    pub lines: Vec<PurchaseLine>,
    /// Optional voucher code
    pub voucher_code: Option<String>,
    /// Cover part of the charge from site credit then cash first
    pub use_wallet_balance: bool,
}

/// One issued ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedTicket {
    /// Ticket
    pub ticket_id: TicketId,
    /// Competition
    pub competition_id: CompetitionId,
    /// Number within the competition
    pub ticket_number: u32,
    /// Paid for or redeemed from a universal ticket
    pub ticket_type: TicketType,
    /// Whether the number claimed an instant-win slot
    pub is_instant_win: bool,
}

/// Stock figures of a competition after commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompetitionStock {
    /// Competition
    pub competition_id: CompetitionId,
    /// Tickets sold
    pub sold_tickets: u32,
    /// Tickets in total
    pub total_tickets: u32,
    /// Tickets still available
    pub remaining: u32,
}

/// Successful allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationResult {
    /// Buyer
    pub user_id: UserId,
    /// Purchase row (absent for free and universal-ticket entries)
    pub purchase_id: Option<PurchaseId>,
    /// Funding path used
    pub funding: &'static str,
    /// Issued tickets in allocation order
    pub tickets: Vec<AllocatedTicket>,
    /// Updated stock per competition
    pub stock: Vec<CompetitionStock>,
    /// Prizes won
    pub instant_wins: Vec<ClaimedPrize>,
    /// Price before discount
    pub base_amount: Money,
    /// Voucher discount
    pub discount: Money,
    /// Amount charged
    pub charged: Money,
    /// How the charge was covered
    pub breakdown: FundingBreakdown,
}

/// A checkout waiting for external payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCharge {
    /// Buyer
    pub user_id: UserId,
    /// Pending purchase
    pub purchase_id: PurchaseId,
    /// Reference the gateway must confirm
    pub payment_reference: PaymentReference,
    /// Amount the gateway must collect
    pub amount: Money,
    /// Price before discount
    pub base_amount: Money,
    /// Voucher discount
    pub discount: Money,
    /// Full charge split into wallet portions and the outstanding amount
    pub breakdown: FundingBreakdown,
}

/// Outcome of [`AllocationOrchestrator::allocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    /// Tickets were issued
    Allocated(AllocationResult),
    /// External payment must complete first
    PaymentRequired(PendingCharge),
}

// ============================================================================
// Internal stages
// ============================================================================

/// Locked and validated competitions of one request.
struct Checkout {
    user_id: UserId,
    lines: Vec<PurchaseLine>,
    competitions: Vec<Competition>,
    base_amount: Money,
    paid_quantity: u32,
}

#[derive(Debug, Clone, Copy)]
struct Priced {
    discount: Money,
    amount: Money,
    voucher_id: Option<VoucherId>,
}

enum ExternalMode {
    /// Settle directly when nothing is left to pay externally
    SettleIfCovered,
    /// Always create a pending charge
    PendingOnly,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Allocates tickets and settles their funding.
pub struct AllocationOrchestrator<S> {
    store: Arc<S>,
    settings: SettingsCache<S>,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn EventPublisher>,
    max_quantity_per_request: u32,
    ledger: WalletLedger,
    limits: SpendingLimitGuard,
    vouchers: VoucherApplier,
    numberer: TicketNumberer,
    claimer: InstantWinClaimer,
}

/// Builder for [`AllocationOrchestrator`].
pub struct AllocationOrchestratorBuilder<S> {
    store: Arc<S>,
    clock: Option<Arc<dyn Clock>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    settings_ttl: Duration,
    max_quantity_per_request: u32,
    free_ticket_expiry: Option<ChronoDuration>,
}

impl<S: TransactionalStore + SettingsStore> AllocationOrchestratorBuilder<S> {
    /// Clock used for timestamps and spending periods.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sink for domain events.
    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Settings cache time-to-live.
    #[must_use]
    pub const fn settings_ttl(mut self, ttl: Duration) -> Self {
        self.settings_ttl = ttl;
        self
    }

    /// Hard upper bound on tickets per request, applied on top of settings.
    #[must_use]
    pub const fn max_quantity_per_request(mut self, max: u32) -> Self {
        self.max_quantity_per_request = max;
        self
    }

    /// Lifetime of universal tickets minted by free-ticket prizes.
    #[must_use]
    pub const fn free_ticket_expiry(mut self, expiry: Option<ChronoDuration>) -> Self {
        self.free_ticket_expiry = expiry;
        self
    }

    /// Build the orchestrator.
    #[must_use]
    pub fn build(self) -> AllocationOrchestrator<S> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let publisher = self
            .publisher
            .unwrap_or_else(|| Arc::new(TracingEventPublisher));
        let ledger = WalletLedger::new(clock.clone());

        AllocationOrchestrator {
            settings: SettingsCache::new(self.store.clone(), self.settings_ttl),
            store: self.store,
            limits: SpendingLimitGuard::new(clock.clone()),
            vouchers: VoucherApplier::new(clock.clone()),
            numberer: TicketNumberer::new(),
            claimer: InstantWinClaimer::new(ledger.clone(), clock.clone(), self.free_ticket_expiry),
            ledger,
            clock,
            publisher,
            max_quantity_per_request: self.max_quantity_per_request,
        }
    }
}

impl<S: TransactionalStore + SettingsStore> AllocationOrchestrator<S> {
    /// Start building an orchestrator over `store`.
    #[must_use]
    pub fn builder(store: Arc<S>) -> AllocationOrchestratorBuilder<S> {
        AllocationOrchestratorBuilder {
            store,
            clock: None,
            publisher: None,
            settings_ttl: Duration::from_secs(60),
            max_quantity_per_request: 100,
            free_ticket_expiry: Some(ChronoDuration::days(90)),
        }
    }

    /// Settings cache, for callers that change settings and must invalidate it.
    #[must_use]
    pub const fn settings(&self) -> &SettingsCache<S> {
        &self.settings
    }

    /// Allocate `quantity` tickets in one competition.
    ///
    /// With [`FundingChoice::ExternalPayment`] this returns
    /// [`AllocationOutcome::PaymentRequired`] unless the charge is zero or
    /// fully covered by wallet balance, in which case it settles directly.
    ///
    /// # Errors
    ///
    /// Returns the [`AllocationError`] that rejected the request; nothing is
    /// persisted in that case.
    #[tracing::instrument(
        skip(self, request),
        fields(
            user_id = %request.user_id,
            competition_id = %request.competition_id,
            quantity = request.quantity,
        )
    )]
    pub async fn allocate(&self, request: AllocationRequest) -> Result<AllocationOutcome> {
        let lines = vec![PurchaseLine {
            competition_id: request.competition_id,
            quantity: request.quantity,
        }];
        self.checkout(
            "allocate",
            request.user_id,
            lines,
            request.funding,
            request.voucher_code,
        )
        .await
    }

    /// Allocate tickets in several competitions as one purchase.
    ///
    /// Competitions are locked in ascending id order so concurrent bulk
    /// requests cannot deadlock each other.
    ///
    /// # Errors
    ///
    /// Returns the [`AllocationError`] that rejected the request; nothing is
    /// persisted in that case.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id, items = request.items.len()))]
    pub async fn allocate_bulk(&self, request: BulkAllocationRequest) -> Result<AllocationOutcome> {
        self.checkout(
            "allocate_bulk",
            request.user_id,
            request.items,
            request.funding,
            request.voucher_code,
        )
        .await
    }

    /// Validate a checkout and persist a PENDING purchase with its payment
    /// intent. No ticket is issued and no wallet is debited.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::ExternalPaymentNotRequired`] if nothing is left to
    ///   pay externally
    /// - any validation or limit error that would reject the allocation
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn begin_reservation(&self, request: ReservationRequest) -> Result<PendingCharge> {
        let started = Instant::now();
        let outcome = self
            .guarded("begin_reservation", started, async {
                let lines = self.admit(request.lines).await?;
                let mut tx = self.store.begin().await?;
                let outcome = self
                    .external_checkout(
                        &mut tx,
                        request.user_id,
                        lines,
                        request.voucher_code.as_deref(),
                        request.use_wallet_balance,
                        ExternalMode::PendingOnly,
                    )
                    .await;
                self.finish(tx, outcome).await
            })
            .await?;

        match outcome {
            AllocationOutcome::PaymentRequired(charge) => Ok(charge),
            AllocationOutcome::Allocated(_) => Err(AllocationError::invariant(
                "pending-only checkout settled directly",
            )),
        }
    }

    /// Settle a PENDING purchase once the gateway has recorded its payment.
    ///
    /// Competition preconditions and the voucher are re-validated; the
    /// wallet portion is debited and tickets are issued in one unit of work.
    /// If this fails the purchase stays PENDING.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::PurchaseNotFound`] / [`AllocationError::PurchaseAlreadySettled`]
    /// - [`AllocationError::PaymentNotForPurchase`], [`AllocationError::PaymentNotFound`],
    ///   [`AllocationError::PaymentNotCompleted`], [`AllocationError::PaymentAmountMismatch`]
    /// - any validation, funds or infrastructure error of a direct allocation
    #[tracing::instrument(skip_all, fields(purchase_id = %purchase_id, payment_reference = %payment_reference))]
    pub async fn complete_reservation(
        &self,
        purchase_id: PurchaseId,
        payment_reference: PaymentReference,
    ) -> Result<AllocationResult> {
        let started = Instant::now();
        let outcome = self
            .guarded("complete_reservation", started, async {
                let mut tx = self.store.begin().await?;
                let outcome = self
                    .complete_in(&mut tx, purchase_id, &payment_reference)
                    .await
                    .map(AllocationOutcome::Allocated);
                self.finish(tx, outcome).await
            })
            .await?;

        match outcome {
            AllocationOutcome::Allocated(result) => Ok(result),
            AllocationOutcome::PaymentRequired(_) => Err(AllocationError::invariant(
                "completion produced a new pending charge",
            )),
        }
    }

    /// Mark a PENDING purchase as FAILED.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::PurchaseNotFound`] if the purchase does not exist
    /// - [`AllocationError::PurchaseAlreadySettled`] if it is PAID or FAILED
    #[tracing::instrument(skip_all, fields(purchase_id = %purchase_id, reason = reason))]
    pub async fn fail_reservation(&self, purchase_id: PurchaseId, reason: &str) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let purchase = lock_pending_purchase(&mut tx, purchase_id).await?;
            tx.update_purchase_status(purchase.id, PurchaseStatus::Failed, Some(reason), self.clock.now())
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                tx.commit().await?;
                tracing::info!(reason, "Reservation failed");
                Ok(())
            }
            Err(err) => {
                discard(tx).await;
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Checkout flows
    // ------------------------------------------------------------------------

    async fn checkout(
        &self,
        operation: &'static str,
        user_id: UserId,
        lines: Vec<PurchaseLine>,
        funding: FundingChoice,
        voucher_code: Option<String>,
    ) -> Result<AllocationOutcome> {
        let started = Instant::now();
        self.guarded(operation, started, async {
            let lines = self.admit(lines).await?;
            let mut tx = self.store.begin().await?;
            let outcome = match funding {
                FundingChoice::ExternalPayment { use_wallet_balance } => {
                    self.external_checkout(
                        &mut tx,
                        user_id,
                        lines,
                        voucher_code.as_deref(),
                        use_wallet_balance,
                        ExternalMode::SettleIfCovered,
                    )
                    .await
                }
                choice => self
                    .direct_checkout(&mut tx, user_id, lines, choice, voucher_code.as_deref())
                    .await
                    .map(AllocationOutcome::Allocated),
            };
            self.finish(tx, outcome).await
        })
        .await
    }

    async fn direct_checkout(
        &self,
        tx: &mut S::Tx,
        user_id: UserId,
        lines: Vec<PurchaseLine>,
        choice: FundingChoice,
        voucher_code: Option<&str>,
    ) -> Result<AllocationResult> {
        let checkout = open_checkout(tx, user_id, lines).await?;
        let path = FundingPath::resolve(choice, checkout.base_amount)
            .ok_or_else(|| AllocationError::invariant("external funding routed to direct checkout"))?;
        let priced = self
            .price(tx, &checkout, voucher_code, path.accepts_voucher())
            .await?;
        self.fulfil(tx, &checkout, &path, priced, None).await
    }

    async fn external_checkout(
        &self,
        tx: &mut S::Tx,
        user_id: UserId,
        lines: Vec<PurchaseLine>,
        voucher_code: Option<&str>,
        use_wallet_balance: bool,
        mode: ExternalMode,
    ) -> Result<AllocationOutcome> {
        let checkout = open_checkout(tx, user_id, lines).await?;

        if checkout.base_amount.is_zero() {
            if matches!(mode, ExternalMode::PendingOnly) {
                return Err(AllocationError::ExternalPaymentNotRequired { amount: Money::ZERO });
            }
            let priced = self.price(tx, &checkout, voucher_code, false).await?;
            return self
                .fulfil(tx, &checkout, &FundingPath::Free, priced, None)
                .await
                .map(AllocationOutcome::Allocated);
        }

        let priced = self.price(tx, &checkout, voucher_code, true).await?;
        self.limits
            .check(tx, user_id, priced.amount)
            .await?
            .into_result(priced.amount)?;

        let plan = plan_external(tx, &self.ledger, user_id, priced.amount, use_wallet_balance).await?;
        if plan.outstanding.is_zero() {
            if matches!(mode, ExternalMode::PendingOnly) {
                return Err(AllocationError::ExternalPaymentNotRequired { amount: Money::ZERO });
            }
            let path = FundingPath::Wallet(WalletSelection::CreditThenCash);
            return self
                .fulfil(tx, &checkout, &path, priced, None)
                .await
                .map(AllocationOutcome::Allocated);
        }

        let now = self.clock.now();
        let purchase_id = PurchaseId::new();
        let payment_reference = PaymentReference::generate();

        tx.insert_purchase(&Purchase {
            id: purchase_id,
            user_id,
            lines: checkout.lines.clone(),
            base_amount: checkout.base_amount,
            discount: priced.discount,
            amount: priced.amount,
            breakdown: plan,
            voucher_id: priced.voucher_id,
            payment_reference: Some(payment_reference.clone()),
            status: PurchaseStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
        .await?;
        tx.upsert_payment(&PaymentRecord {
            reference: payment_reference.clone(),
            purchase_id: Some(purchase_id),
            amount: plan.outstanding,
            status: PaymentStatus::Pending,
            updated_at: now,
        })
        .await?;

        tracing::info!(
            purchase_id = %purchase_id,
            payment_reference = %payment_reference,
            outstanding = %plan.outstanding,
            "Payment required"
        );

        Ok(AllocationOutcome::PaymentRequired(PendingCharge {
            user_id,
            purchase_id,
            payment_reference,
            amount: plan.outstanding,
            base_amount: checkout.base_amount,
            discount: priced.discount,
            breakdown: plan,
        }))
    }

    async fn complete_in(
        &self,
        tx: &mut S::Tx,
        purchase_id: PurchaseId,
        payment_reference: &PaymentReference,
    ) -> Result<AllocationResult> {
        let purchase = lock_pending_purchase(tx, purchase_id).await?;
        if purchase.payment_reference.as_ref() != Some(payment_reference) {
            return Err(AllocationError::PaymentNotForPurchase {
                reference: payment_reference.clone(),
                purchase_id,
            });
        }

        let payment = tx
            .find_payment(payment_reference)
            .await?
            .ok_or_else(|| AllocationError::PaymentNotFound(payment_reference.clone()))?;
        if payment.purchase_id.is_some_and(|id| id != purchase_id) {
            return Err(AllocationError::PaymentNotForPurchase {
                reference: payment_reference.clone(),
                purchase_id,
            });
        }
        if payment.status != PaymentStatus::Completed {
            return Err(AllocationError::PaymentNotCompleted {
                reference: payment_reference.clone(),
                status: payment.status,
            });
        }
        if payment.amount != purchase.breakdown.outstanding {
            return Err(AllocationError::PaymentAmountMismatch {
                reference: payment_reference.clone(),
                expected: purchase.breakdown.outstanding,
                received: payment.amount,
            });
        }

        let checkout = open_checkout(tx, purchase.user_id, purchase.lines.clone()).await?;
        if let Some(voucher_id) = purchase.voucher_id {
            self.vouchers
                .revalidate_usage(tx, voucher_id, purchase.user_id)
                .await?;
        }

        let priced = Priced {
            discount: purchase.discount,
            amount: purchase.amount,
            voucher_id: purchase.voucher_id,
        };
        let reference = purchase.payment_reference.clone();
        let path = FundingPath::External { purchase };
        self.fulfil(tx, &checkout, &path, priced, reference).await
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    /// Settings gate and quantity bounds, evaluated before any lock is taken.
    async fn admit(&self, lines: Vec<PurchaseLine>) -> Result<Vec<PurchaseLine>> {
        let settings = self.settings.get().await?;
        if !settings.purchases_enabled {
            return Err(AllocationError::PurchasesDisabled);
        }

        let max = settings
            .max_quantity_per_request
            .min(self.max_quantity_per_request);
        let lines = merge_lines(lines, max)?;
        let total = lines
            .iter()
            .try_fold(0u32, |acc, line| acc.checked_add(line.quantity))
            .unwrap_or(u32::MAX);
        if total == 0 || total > max {
            return Err(AllocationError::InvalidQuantity { requested: total, max });
        }
        Ok(lines)
    }

    async fn price(
        &self,
        tx: &mut S::Tx,
        checkout: &Checkout,
        voucher_code: Option<&str>,
        accepts_voucher: bool,
    ) -> Result<Priced> {
        let Some(code) = voucher_code.filter(|code| !code.trim().is_empty()) else {
            return Ok(Priced {
                discount: Money::ZERO,
                amount: checkout.base_amount,
                voucher_id: None,
            });
        };

        if !accepts_voucher || checkout.base_amount.is_zero() {
            return Err(AllocationError::VoucherInvalid {
                reason: VoucherRejection::NotApplicable,
            });
        }

        let quote = self
            .vouchers
            .apply(tx, checkout.user_id, code, checkout.base_amount, checkout.paid_quantity)
            .await?;
        Ok(Priced {
            discount: quote.discount,
            amount: quote.final_amount,
            voucher_id: Some(quote.voucher_id),
        })
    }

    async fn fulfil(
        &self,
        tx: &mut S::Tx,
        checkout: &Checkout,
        path: &FundingPath,
        priced: Priced,
        payment_reference: Option<PaymentReference>,
    ) -> Result<AllocationResult> {
        let charges_money = path.moves_money() && !priced.amount.is_zero();
        if charges_money {
            self.limits
                .check(tx, checkout.user_id, priced.amount)
                .await?
                .into_result(priced.amount)?;
        }

        let request = FundingRequest {
            user_id: checkout.user_id,
            lines: &checkout.lines,
            paid_quantity: checkout.paid_quantity,
            base_amount: checkout.base_amount,
            discount: priced.discount,
            amount: priced.amount,
            voucher_id: priced.voucher_id,
        };
        let reservation = path
            .reserve(tx, &self.ledger, &request, self.clock.now())
            .await?;

        match self
            .issue(tx, checkout, path, priced, &reservation, payment_reference, charges_money)
            .await
        {
            Ok(result) => Ok(result),
            Err(err) => {
                path.rollback(&reservation, &err);
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn issue(
        &self,
        tx: &mut S::Tx,
        checkout: &Checkout,
        path: &FundingPath,
        priced: Priced,
        reservation: &Reservation,
        payment_reference: Option<PaymentReference>,
        charges_money: bool,
    ) -> Result<AllocationResult> {
        let user_id = checkout.user_id;
        let now = self.clock.now();

        if charges_money {
            self.limits.record_spend(tx, user_id, priced.amount).await?;
        }

        let mut stock = Vec::with_capacity(checkout.competitions.len());
        for (line, competition) in checkout.lines.iter().zip(&checkout.competitions) {
            let updated = tx
                .add_sold_tickets(competition.id, line.quantity)
                .await?
                .ok_or_else(|| {
                    AllocationError::invariant(format!(
                        "competition {} oversold after validation",
                        competition.id
                    ))
                })?;
            stock.push(CompetitionStock {
                competition_id: updated.id,
                sold_tickets: updated.sold_tickets,
                total_tickets: updated.total_tickets,
                remaining: updated.remaining(),
            });
        }

        let mut universal = reservation.universal_tickets.iter().copied();
        let mut tickets = Vec::new();
        let mut instant_wins = Vec::new();

        for (line, competition) in checkout.lines.iter().zip(&checkout.competitions) {
            let redeems_universal =
                matches!(path, FundingPath::UniversalTickets) && !competition.is_free_entry();

            for _ in 0..line.quantity {
                let ticket_number = self.numberer.next_number(tx, competition.id).await?;
                let ticket_id = TicketId::new();

                let outcome = self
                    .claimer
                    .try_claim(tx, competition.id, ticket_number, ticket_id, user_id)
                    .await?;
                let is_instant_win = matches!(outcome, ClaimOutcome::Claimed(_));
                if let ClaimOutcome::Claimed(prize) = outcome {
                    instant_wins.push(prize);
                }

                let universal_ticket_id = if redeems_universal {
                    Some(universal.next().ok_or_else(|| {
                        AllocationError::invariant("universal reservation shorter than paid quantity")
                    })?)
                } else {
                    None
                };
                let ticket_type = if universal_ticket_id.is_some() {
                    TicketType::Universal
                } else {
                    TicketType::Competition
                };

                tx.insert_ticket(&Ticket {
                    id: ticket_id,
                    competition_id: competition.id,
                    user_id,
                    ticket_number,
                    ticket_type,
                    is_instant_win,
                    universal_ticket_id,
                    purchase_id: reservation.purchase_id,
                    created_at: now,
                })
                .await?;

                tickets.push(AllocatedTicket {
                    ticket_id,
                    competition_id: competition.id,
                    ticket_number,
                    ticket_type,
                    is_instant_win,
                });
            }
        }

        path.commit(tx, reservation, now).await?;

        if let Some(voucher_id) = priced.voucher_id {
            let purchase_id = reservation
                .purchase_id
                .ok_or_else(|| AllocationError::invariant("voucher applied without a purchase"))?;
            self.vouchers
                .record_usage(tx, voucher_id, user_id, purchase_id, payment_reference)
                .await?;
        }

        Ok(AllocationResult {
            user_id,
            purchase_id: reservation.purchase_id,
            funding: path.name(),
            tickets,
            stock,
            instant_wins,
            base_amount: checkout.base_amount,
            discount: priced.discount,
            charged: reservation.charged,
            breakdown: reservation.breakdown,
        })
    }

    // ------------------------------------------------------------------------
    // Unit-of-work plumbing
    // ------------------------------------------------------------------------

    /// Commit on success, discard on error, then publish events.
    async fn finish(
        &self,
        tx: S::Tx,
        outcome: Result<AllocationOutcome>,
    ) -> Result<AllocationOutcome> {
        match outcome {
            Ok(outcome) => {
                tx.commit().await?;
                self.publish(&outcome).await;
                Ok(outcome)
            }
            Err(err) => {
                discard(tx).await;
                Err(err)
            }
        }
    }

    /// Record metrics and logs for a whole engine call.
    async fn guarded<F>(&self, operation: &'static str, started: Instant, call: F) -> Result<AllocationOutcome>
    where
        F: std::future::Future<Output = Result<AllocationOutcome>>,
    {
        let outcome = call.await;
        let elapsed = started.elapsed();

        match &outcome {
            Ok(AllocationOutcome::Allocated(result)) => {
                let issued = u32::try_from(result.tickets.len()).unwrap_or(u32::MAX);
                record_allocated(operation, issued, elapsed);
                tracing::info!(
                    operation,
                    funding = result.funding,
                    tickets = issued,
                    instant_wins = result.instant_wins.len(),
                    charged = %result.charged,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "Tickets allocated"
                );
            }
            Ok(AllocationOutcome::PaymentRequired(_)) => record_payment_required(elapsed),
            Err(err) => {
                record_rejected(operation, err.label(), elapsed);
                if err.is_retryable() {
                    tracing::warn!(operation, error = %err, "Allocation failed with retryable error");
                } else {
                    tracing::info!(operation, error = %err, kind = ?err.kind(), "Allocation rejected");
                }
            }
        }

        outcome
    }

    async fn publish(&self, outcome: &AllocationOutcome) {
        let now = self.clock.now();
        let events = match outcome {
            AllocationOutcome::Allocated(result) => completion_events(result, now),
            AllocationOutcome::PaymentRequired(charge) => vec![DomainEvent::PaymentRequired {
                purchase_id: charge.purchase_id,
                user_id: charge.user_id,
                payment_reference: charge.payment_reference.clone(),
                amount: charge.amount,
                occurred_at: now,
            }],
        };

        for event in events {
            let event_type = event.event_type();
            if let Err(err) = self.publisher.publish(event).await {
                record_publish_failure(event_type);
                tracing::warn!(event_type, error = %err, "Failed to publish domain event");
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Merge repeated competitions and order lines by competition id.
fn merge_lines(lines: Vec<PurchaseLine>, max: u32) -> Result<Vec<PurchaseLine>> {
    let mut merged: BTreeMap<CompetitionId, u32> = BTreeMap::new();
    for line in lines {
        if line.quantity == 0 {
            return Err(AllocationError::InvalidQuantity { requested: 0, max });
        }
        let entry = merged.entry(line.competition_id).or_insert(0);
        *entry = entry
            .checked_add(line.quantity)
            .ok_or(AllocationError::InvalidQuantity { requested: u32::MAX, max })?;
    }
    Ok(merged
        .into_iter()
        .map(|(competition_id, quantity)| PurchaseLine { competition_id, quantity })
        .collect())
}

/// Lock and validate every competition of `lines`, in the given order.
///
/// Checks run per competition in the order: exists, active, entry cap,
/// stock.
async fn open_checkout<T: UnitOfWork>(
    tx: &mut T,
    user_id: UserId,
    lines: Vec<PurchaseLine>,
) -> Result<Checkout> {
    let mut competitions = Vec::with_capacity(lines.len());
    let mut base_amount = Money::ZERO;
    let mut paid_quantity = 0u32;

    for line in &lines {
        let competition = tx
            .lock_competition(line.competition_id)
            .await?
            .ok_or(AllocationError::CompetitionNotFound(line.competition_id))?;

        if competition.status != CompetitionStatus::Active {
            return Err(AllocationError::CompetitionNotActive {
                id: competition.id,
                status: competition.status,
            });
        }

        if let Some(cap) = competition.max_entries_per_user {
            let owned = tx.count_user_tickets(competition.id, user_id).await?;
            if owned.saturating_add(line.quantity) > cap {
                return Err(AllocationError::EntryCapExceeded {
                    id: competition.id,
                    cap,
                    owned,
                    requested: line.quantity,
                });
            }
        }

        let remaining = competition.remaining();
        if line.quantity > remaining {
            return Err(AllocationError::CompetitionFull {
                id: competition.id,
                requested: line.quantity,
                remaining,
            });
        }

        if !competition.is_free_entry() {
            let line_amount = competition
                .price_per_ticket
                .checked_mul(line.quantity)
                .and_then(|amount| base_amount.checked_add(amount))
                .ok_or_else(|| AllocationError::invariant("purchase amount overflow"))?;
            base_amount = line_amount;
            paid_quantity = paid_quantity.saturating_add(line.quantity);
        }

        competitions.push(competition);
    }

    Ok(Checkout {
        user_id,
        lines,
        competitions,
        base_amount,
        paid_quantity,
    })
}

async fn lock_pending_purchase<T: UnitOfWork>(tx: &mut T, purchase_id: PurchaseId) -> Result<Purchase> {
    let purchase = tx
        .lock_purchase(purchase_id)
        .await?
        .ok_or(AllocationError::PurchaseNotFound(purchase_id))?;
    if purchase.status.is_terminal() {
        return Err(AllocationError::PurchaseAlreadySettled {
            id: purchase_id,
            status: purchase.status,
        });
    }
    Ok(purchase)
}

/// Roll back a unit of work, keeping the original error as the outcome.
async fn discard<T: UnitOfWork>(tx: T) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(error = %err, "Rollback failed; the connection discards the transaction");
    }
}

fn completion_events(result: &AllocationResult, now: DateTime<Utc>) -> Vec<DomainEvent> {
    let mut allocations: Vec<AllocatedNumbers> = Vec::new();
    for ticket in &result.tickets {
        match allocations
            .iter_mut()
            .find(|numbers| numbers.competition_id == ticket.competition_id)
        {
            Some(numbers) => numbers.ticket_numbers.push(ticket.ticket_number),
            None => allocations.push(AllocatedNumbers {
                competition_id: ticket.competition_id,
                ticket_numbers: vec![ticket.ticket_number],
            }),
        }
    }

    let mut events = vec![DomainEvent::PurchaseCompleted {
        purchase_id: result.purchase_id,
        user_id: result.user_id,
        allocations,
        amount: result.charged,
        funding: result.funding.to_string(),
        occurred_at: now,
    }];
    events.extend(result.instant_wins.iter().map(|win| DomainEvent::InstantWinClaimed {
        instant_win_id: win.instant_win_id,
        competition_id: win.competition_id,
        user_id: result.user_id,
        ticket_number: win.ticket_number,
        prize: win.prize.clone(),
        occurred_at: now,
    }));
    events
}
