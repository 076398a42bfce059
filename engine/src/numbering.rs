//! Gapless per-competition ticket numbering.

use crate::error::{AllocationError, Result};
use prizedraw_core::{CompetitionId, TicketStore};

/// Hands out the next ticket number of a competition.
///
/// Numbers start at 1 and increase by one per ticket. The numbering lock is
/// held until the unit of work ends, so two concurrent allocations in the
/// same competition never read the same maximum.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketNumberer;

impl TicketNumberer {
    /// Creates a numberer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Next free number in `competition_id`.
    ///
    /// The caller must insert the ticket carrying this number before asking
    /// for another one in the same unit of work.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::Store`] if the numbering lock times out
    /// - [`AllocationError::InvariantViolation`] if the number space is exhausted
    pub async fn next_number<T: TicketStore>(
        &self,
        tx: &mut T,
        competition_id: CompetitionId,
    ) -> Result<u32> {
        tx.lock_ticket_numbering(competition_id).await?;
        let current = tx.max_ticket_number(competition_id).await?.unwrap_or(0);
        current.checked_add(1).ok_or_else(|| {
            AllocationError::invariant(format!("ticket numbers exhausted in {competition_id}"))
        })
    }
}
