//! Instant-win claiming and prize disbursement.
//!
//! A slot is claimed inside the allocation that issues its ticket number.
//! The claim predicate (`claimed_by` unset and `current_winners <
//! max_winners`) is evaluated under the slot's row lock, so a slot never
//! receives more than `max_winners` claims.

use crate::error::{AllocationError, Result};
use crate::wallet::WalletLedger;
use chrono::Duration;
use prizedraw_core::model::{
    InstantWinSlot, Prize, PrizeClaim, PrizeClaimStatus, PrizeType, UniversalTicket, WalletKind,
};
use prizedraw_core::{
    Clock, CompetitionId, InstantWinId, InstantWinStore, Money, PrizeClaimId, PrizeStore, TicketId,
    TicketStore, UniversalTicketId, UserId, WalletStore,
};
use std::sync::Arc;

/// A prize won by a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedPrize {
    /// Slot claimed
    pub instant_win_id: InstantWinId,
    /// Competition
    pub competition_id: CompetitionId,
    /// Winning number
    pub ticket_number: u32,
    /// Prize disbursed
    pub prize: Prize,
}

/// Outcome of checking a freshly numbered ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The number carried a claimable slot
    Claimed(ClaimedPrize),
    /// No slot, or the slot is already exhausted
    NotAWinner,
}

/// Claims slots and pays out their prizes.
#[derive(Clone)]
pub struct InstantWinClaimer {
    ledger: WalletLedger,
    clock: Arc<dyn Clock>,
    free_ticket_expiry: Option<Duration>,
}

impl InstantWinClaimer {
    /// Creates a claimer paying wallet prizes through `ledger`.
    ///
    /// `free_ticket_expiry` bounds the lifetime of universal tickets minted
    /// by free-ticket prizes; `None` mints non-expiring tickets.
    #[must_use]
    pub fn new(ledger: WalletLedger, clock: Arc<dyn Clock>, free_ticket_expiry: Option<Duration>) -> Self {
        Self {
            ledger,
            clock,
            free_ticket_expiry,
        }
    }

    /// Claim the slot bound to `ticket_number`, if any, for `user_id`.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::InvariantViolation`] if the store returns a slot
    ///   that is not claimable or a claim overfills a slot
    /// - [`AllocationError::Store`] on persistence failure
    pub async fn try_claim<T>(
        &self,
        tx: &mut T,
        competition_id: CompetitionId,
        ticket_number: u32,
        ticket_id: TicketId,
        user_id: UserId,
    ) -> Result<ClaimOutcome>
    where
        T: InstantWinStore + WalletStore + TicketStore + PrizeStore,
    {
        let Some(slot) = tx
            .try_lock_claimable_instant_win(competition_id, ticket_number)
            .await?
        else {
            return Ok(ClaimOutcome::NotAWinner);
        };

        if !slot.is_claimable() {
            return Err(AllocationError::invariant(format!(
                "slot {} returned as claimable with {}/{} winners",
                slot.id, slot.current_winners, slot.max_winners
            )));
        }

        let now = self.clock.now();
        let updated = tx.record_instant_win_claim(&slot, user_id, ticket_id, now).await?;
        if updated.current_winners > updated.max_winners {
            return Err(AllocationError::invariant(format!(
                "slot {} overfilled: {}/{}",
                updated.id, updated.current_winners, updated.max_winners
            )));
        }

        self.disburse(tx, &updated, user_id).await?;

        metrics::counter!(
            "prizedraw_instant_wins_claimed_total",
            "prize_type" => updated.prize.prize_type.as_str()
        )
        .increment(1);
        tracing::info!(
            instant_win_id = %updated.id,
            competition_id = %competition_id,
            ticket_number,
            user_id = %user_id,
            prize_type = %updated.prize.prize_type,
            prize_value = updated.prize.value,
            "Instant win claimed"
        );

        Ok(ClaimOutcome::Claimed(ClaimedPrize {
            instant_win_id: updated.id,
            competition_id,
            ticket_number,
            prize: updated.prize,
        }))
    }

    async fn disburse<T>(&self, tx: &mut T, slot: &InstantWinSlot, user_id: UserId) -> Result<()>
    where
        T: WalletStore + TicketStore + PrizeStore,
    {
        let reference = format!("instant_win:{}", slot.id);
        let prize = &slot.prize;

        match prize.prize_type {
            PrizeType::Cash => {
                self.ledger
                    .credit(tx, user_id, WalletKind::Cash, Money::from_pence(prize.value), &reference)
                    .await?;
            }
            PrizeType::SiteCredit => {
                self.ledger
                    .credit(tx, user_id, WalletKind::Credit, Money::from_pence(prize.value), &reference)
                    .await?;
            }
            PrizeType::Points => {
                tx.add_points(user_id, prize.value, &reference).await?;
            }
            PrizeType::FreeTicket => {
                let now = self.clock.now();
                let expires_at = self.free_ticket_expiry.map(|ttl| now + ttl);
                for _ in 0..prize.value.max(1) {
                    tx.insert_universal_ticket(&UniversalTicket {
                        id: UniversalTicketId::new(),
                        user_id,
                        is_used: false,
                        expires_at,
                        source: reference.clone(),
                        created_at: now,
                    })
                    .await?;
                }
            }
            PrizeType::Physical => {
                tx.insert_prize_claim(&PrizeClaim {
                    id: PrizeClaimId::new(),
                    user_id,
                    instant_win_id: slot.id,
                    competition_id: slot.competition_id,
                    prize_name: prize.name.clone(),
                    status: PrizeClaimStatus::Pending,
                    created_at: self.clock.now(),
                })
                .await?;
            }
        }

        Ok(())
    }
}
