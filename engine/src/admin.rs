//! Instant-win administration.
//!
//! Seeding and manual overrides run outside the allocation hot path. Access
//! control happens before these calls reach the engine.

use prizedraw_core::model::{InstantWinSlot, NewInstantWin, Prize, PrizeType};
use prizedraw_core::{
    Clock, CompetitionId, CompetitionStore, InstantWinId, InstantWinStore, StoreError, TicketStore,
    TransactionalStore, UnitOfWork, UserId,
};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by instant-win administration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdminError {
    /// Competition does not exist.
    #[error("Competition {0} not found")]
    CompetitionNotFound(CompetitionId),

    /// Slot does not exist.
    #[error("Instant win {0} not found")]
    InstantWinNotFound(InstantWinId),

    /// Ticket number outside the competition's range.
    #[error("Ticket number {number} is outside 1..={total}")]
    NumberOutOfRange {
        /// Offending number
        number: u32,
        /// Tickets in the competition
        total: u32,
    },

    /// Ticket number listed twice in one batch.
    #[error("Ticket number {0} appears more than once in the batch")]
    DuplicateNumber(u32),

    /// Ticket number already bound to a slot.
    #[error("Ticket number {0} already carries an instant win")]
    NumberTaken(u32),

    /// Ticket number already issued to a buyer.
    #[error("Ticket number {0} has already been issued")]
    NumberAlreadyIssued(u32),

    /// Not enough free numbers for a random placement.
    #[error("Cannot place {requested} instant win(s): only {available} number(s) free")]
    NotEnoughNumbers {
        /// Slots requested
        requested: usize,
        /// Numbers still free
        available: usize,
    },

    /// Draft fails basic validation.
    #[error("Invalid instant win for ticket {ticket_number}: {reason}")]
    InvalidDraft {
        /// Ticket number of the draft
        ticket_number: u32,
        /// What is wrong
        reason: &'static str,
    },

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// An instant-win slot to create, with every optional field declared.
///
/// # Examples
///
/// ```
/// use prizedraw_core::{Money, model::Prize};
/// use prizedraw_engine::admin::InstantWinDraft;
///
/// let draft = InstantWinDraft::new(7, Prize::cash(Money::from_pounds(50)))
///     .max_winners(2)
///     .title("Golden ticket");
/// assert_eq!(draft.ticket_number(), 7);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantWinDraft {
    ticket_number: u32,
    prize: Prize,
    max_winners: u32,
    title: Option<String>,
    description: Option<String>,
    image_url: Option<String>,
}

impl InstantWinDraft {
    /// Single-winner slot on `ticket_number`.
    #[must_use]
    pub const fn new(ticket_number: u32, prize: Prize) -> Self {
        Self {
            ticket_number,
            prize,
            max_winners: 1,
            title: None,
            description: None,
            image_url: None,
        }
    }

    /// Allow up to `max_winners` claims.
    #[must_use]
    pub const fn max_winners(mut self, max_winners: u32) -> Self {
        self.max_winners = max_winners;
        self
    }

    /// Display title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Display description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Display image.
    #[must_use]
    pub fn image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    /// Ticket number the slot binds to.
    #[must_use]
    pub const fn ticket_number(&self) -> u32 {
        self.ticket_number
    }

    fn validate(&self) -> Result<(), AdminError> {
        let invalid = |reason| AdminError::InvalidDraft {
            ticket_number: self.ticket_number,
            reason,
        };
        if self.max_winners == 0 {
            return Err(invalid("max_winners must be at least 1"));
        }
        let needs_value = matches!(
            self.prize.prize_type,
            PrizeType::Cash | PrizeType::SiteCredit | PrizeType::Points
        );
        if needs_value && self.prize.value == 0 {
            return Err(invalid("prize value must be positive"));
        }
        Ok(())
    }

    fn into_new(self, competition_id: CompetitionId) -> NewInstantWin {
        NewInstantWin {
            competition_id,
            ticket_number: self.ticket_number,
            prize: self.prize,
            max_winners: self.max_winners,
            title: self.title,
            description: self.description,
            image_url: self.image_url,
        }
    }
}

/// Manual claim-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOverride {
    /// Mark the slot fully claimed by a user
    ClaimedBy(UserId),
    /// Reset the slot to unclaimed
    Unclaimed,
}

/// Seeds, lists and overrides instant-win slots.
pub struct InstantWinAdmin<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: TransactionalStore> InstantWinAdmin<S> {
    /// Create an admin service over `store`.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create the given slots in one unit of work.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure; no slot is created then.
    #[tracing::instrument(skip_all, fields(competition_id = %competition_id, count = drafts.len()))]
    pub async fn seed_instant_wins(
        &self,
        competition_id: CompetitionId,
        drafts: Vec<InstantWinDraft>,
    ) -> Result<Vec<InstantWinSlot>, AdminError> {
        let mut tx = self.store.begin().await?;
        let result = seed_in(&mut tx, competition_id, drafts).await;
        settle(tx, result).await
    }

    /// Place `count` slots carrying `prize` on distinct, uniformly random
    /// ticket numbers that are neither issued nor already seeded.
    ///
    /// # Errors
    ///
    /// - [`AdminError::NotEnoughNumbers`] if fewer numbers are free
    /// - any error of [`seed_instant_wins`](Self::seed_instant_wins)
    #[tracing::instrument(skip_all, fields(competition_id = %competition_id, count = count))]
    pub async fn seed_random_instant_wins<R: Rng + ?Sized>(
        &self,
        competition_id: CompetitionId,
        prize: Prize,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<InstantWinSlot>, AdminError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let competition = tx
                .lock_competition(competition_id)
                .await?
                .ok_or(AdminError::CompetitionNotFound(competition_id))?;
            let issued = tx.max_ticket_number(competition_id).await?.unwrap_or(0);
            let seeded: BTreeSet<u32> = tx
                .list_instant_wins(competition_id)
                .await?
                .into_iter()
                .map(|slot| slot.ticket_number)
                .collect();

            let free: Vec<u32> = (issued.saturating_add(1)..=competition.total_tickets)
                .filter(|number| !seeded.contains(number))
                .collect();
            if free.len() < count {
                return Err(AdminError::NotEnoughNumbers {
                    requested: count,
                    available: free.len(),
                });
            }

            let mut picked: Vec<u32> = free.choose_multiple(rng, count).copied().collect();
            picked.sort_unstable();
            let drafts = picked
                .into_iter()
                .map(|number| InstantWinDraft::new(number, prize.clone()))
                .collect();
            seed_in(&mut tx, competition_id, drafts).await
        }
        .await;
        settle(tx, result).await
    }

    /// Manually set or reset a slot's claim state. Never touches wallets.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InstantWinNotFound`] if the slot does not exist.
    #[tracing::instrument(skip_all, fields(instant_win_id = %instant_win_id, change = ?change))]
    pub async fn override_claim(
        &self,
        instant_win_id: InstantWinId,
        change: ClaimOverride,
    ) -> Result<InstantWinSlot, AdminError> {
        let mut tx = self.store.begin().await?;
        let now = self.clock.now();
        let result = async {
            let mut slot = tx
                .lock_instant_win(instant_win_id)
                .await?
                .ok_or(AdminError::InstantWinNotFound(instant_win_id))?;

            match change {
                ClaimOverride::ClaimedBy(user_id) => {
                    slot.claimed_by = Some(user_id);
                    slot.current_winners = slot.max_winners;
                    slot.claimed_at = Some(now);
                }
                ClaimOverride::Unclaimed => {
                    slot.claimed_by = None;
                    slot.current_winners = 0;
                    slot.claimed_at = None;
                }
            }

            tx.set_instant_win_claim(slot.id, slot.claimed_by, slot.current_winners, slot.claimed_at)
                .await?;
            tracing::info!("Instant win claim overridden");
            Ok(slot)
        }
        .await;
        settle(tx, result).await
    }

    /// All slots of a competition ordered by ticket number.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Store`] on persistence failure.
    pub async fn list_instant_wins(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Vec<InstantWinSlot>, AdminError> {
        let mut tx = self.store.begin().await?;
        let result = tx.list_instant_wins(competition_id).await.map_err(AdminError::from);
        settle(tx, result).await
    }
}

async fn seed_in<T: UnitOfWork>(
    tx: &mut T,
    competition_id: CompetitionId,
    drafts: Vec<InstantWinDraft>,
) -> Result<Vec<InstantWinSlot>, AdminError> {
    let competition = tx
        .lock_competition(competition_id)
        .await?
        .ok_or(AdminError::CompetitionNotFound(competition_id))?;
    let issued = tx.max_ticket_number(competition_id).await?.unwrap_or(0);
    let seeded: BTreeSet<u32> = tx
        .list_instant_wins(competition_id)
        .await?
        .into_iter()
        .map(|slot| slot.ticket_number)
        .collect();

    let mut batch = BTreeSet::new();
    for draft in &drafts {
        draft.validate()?;
        let number = draft.ticket_number;
        if number == 0 || number > competition.total_tickets {
            return Err(AdminError::NumberOutOfRange {
                number,
                total: competition.total_tickets,
            });
        }
        if !batch.insert(number) {
            return Err(AdminError::DuplicateNumber(number));
        }
        if seeded.contains(&number) {
            return Err(AdminError::NumberTaken(number));
        }
        if number <= issued {
            return Err(AdminError::NumberAlreadyIssued(number));
        }
    }

    let slots: Vec<NewInstantWin> = drafts
        .into_iter()
        .map(|draft| draft.into_new(competition_id))
        .collect();
    let created = tx.insert_instant_wins(&slots).await?;
    tracing::info!(created = created.len(), "Instant wins seeded");
    Ok(created)
}

async fn settle<T: UnitOfWork, V>(tx: T, result: Result<V, AdminError>) -> Result<V, AdminError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Rollback failed");
            }
            Err(err)
        }
    }
}
