//! Ready-made entities for tests.
//!
//! Every fixture is valid on its own; tests override fields with struct
//! update syntax:
//!
//! ```
//! use prizedraw_core::model::Competition;
//! use prizedraw_testing::fixtures;
//!
//! let capped = Competition {
//!     max_entries_per_user: Some(2),
//!     ..fixtures::competition(10)
//! };
//! assert_eq!(capped.total_tickets, 10);
//! ```

use crate::mocks::test_epoch;
use chrono::Duration;
use prizedraw_core::model::{
    Competition, CompetitionStatus, InstantWinSlot, Prize, Ticket, TicketType, Voucher,
    VoucherReward, VoucherStatus,
};
use prizedraw_core::{CompetitionId, InstantWinId, Money, TicketId, UserId, VoucherId};

/// Active £1-per-ticket competition with no entry cap and nothing sold.
#[must_use]
pub fn competition(total_tickets: u32) -> Competition {
    Competition {
        id: CompetitionId::new(),
        title: "Test competition".to_string(),
        price_per_ticket: Money::from_pounds(1),
        total_tickets,
        sold_tickets: 0,
        max_entries_per_user: None,
        status: CompetitionStatus::Active,
        is_free: false,
    }
}

/// Active free-entry competition.
#[must_use]
pub fn free_competition(total_tickets: u32) -> Competition {
    Competition {
        price_per_ticket: Money::ZERO,
        is_free: true,
        ..competition(total_tickets)
    }
}

/// Paid ticket with the given number.
#[must_use]
pub fn ticket(competition_id: CompetitionId, user_id: UserId, ticket_number: u32) -> Ticket {
    Ticket {
        id: TicketId::new(),
        competition_id,
        user_id,
        ticket_number,
        ticket_type: TicketType::Competition,
        is_instant_win: false,
        universal_ticket_id: None,
        purchase_id: None,
        created_at: test_epoch(),
    }
}

/// Active single-use voucher, valid from a day before the test clock and
/// never expiring.
#[must_use]
pub fn voucher(code: &str, reward: VoucherReward) -> Voucher {
    Voucher {
        id: VoucherId::new(),
        code: code.to_string(),
        status: VoucherStatus::Active,
        reward,
        usage_limit: None,
        usage_count: 0,
        starts_at: test_epoch() - Duration::days(1),
        expires_at: None,
        allow_multiple_per_user: false,
    }
}

/// Unclaimed instant-win slot.
#[must_use]
pub fn instant_win(
    competition_id: CompetitionId,
    ticket_number: u32,
    prize: Prize,
    max_winners: u32,
) -> InstantWinSlot {
    InstantWinSlot {
        id: InstantWinId::new(),
        competition_id,
        ticket_number,
        prize,
        max_winners,
        current_winners: 0,
        claimed_by: None,
        claimed_at: None,
        title: None,
        description: None,
        image_url: None,
    }
}
