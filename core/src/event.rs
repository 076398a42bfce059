//! Domain events emitted after an allocation commits.
//!
//! Events flow to notification collaborators (email, push) through an
//! [`EventPublisher`]. Publishing happens strictly after the unit of work has
//! committed, so a failed delivery can never undo an allocation.
//!
//! ```text
//! ┌──────────────┐    commit    ┌─────────────────┐    publish    ┌──────────────┐
//! │ Unit of work │ ───────────► │  Orchestrator   │ ────────────► │  Publisher   │
//! └──────────────┘              └─────────────────┘               └──────┬───────┘
//!                                                                        │
//!                                                          email / push / analytics
//! ```

use crate::ids::{CompetitionId, InstantWinId, PaymentReference, PurchaseId, UserId};
use crate::model::Prize;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Ticket numbers allocated in one competition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedNumbers {
    /// Competition
    pub competition_id: CompetitionId,
    /// Numbers issued, in allocation order
    pub ticket_numbers: Vec<u32>,
}

/// Facts published to downstream collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Tickets were allocated and paid for
    PurchaseCompleted {
        /// Purchase row, absent for free and universal-ticket entries
        purchase_id: Option<PurchaseId>,
        /// Buyer
        user_id: UserId,
        /// Numbers issued per competition
        allocations: Vec<AllocatedNumbers>,
        /// Amount charged
        amount: Money,
        /// Funding path name
        funding: String,
        /// Commit time
        occurred_at: DateTime<Utc>,
    },

    /// An instant-win slot was claimed and its prize disbursed
    InstantWinClaimed {
        /// Slot
        instant_win_id: InstantWinId,
        /// Competition
        competition_id: CompetitionId,
        /// Winner
        user_id: UserId,
        /// Winning number
        ticket_number: u32,
        /// Prize disbursed
        prize: Prize,
        /// Commit time
        occurred_at: DateTime<Utc>,
    },

    /// A checkout is waiting for external payment
    PaymentRequired {
        /// Pending purchase
        purchase_id: PurchaseId,
        /// Buyer
        user_id: UserId,
        /// Reference the gateway must confirm
        payment_reference: PaymentReference,
        /// Amount the gateway must collect
        amount: Money,
        /// Creation time
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Stable event type name
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::PurchaseCompleted { .. } => "purchase_completed",
            Self::InstantWinClaimed { .. } => "instant_win_claimed",
            Self::PaymentRequired { .. } => "payment_required",
        }
    }

    /// User the event concerns
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        match self {
            Self::PurchaseCompleted { user_id, .. }
            | Self::InstantWinClaimed { user_id, .. }
            | Self::PaymentRequired { user_id, .. } => *user_id,
        }
    }
}

/// Errors that can occur while handing an event to a collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventPublishError {
    /// No subscriber is listening
    #[error("No subscribers for {0}")]
    NoSubscribers(&'static str),

    /// Transport-level failure
    #[error("Publish failed: {0}")]
    Transport(String),
}

/// Sink for domain events.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so publishers can be shared as
/// `Arc<dyn EventPublisher>`.
pub trait EventPublisher: Send + Sync {
    /// Deliver one event.
    ///
    /// # Errors
    ///
    /// Returns [`EventPublishError`] if delivery fails. Callers log and drop
    /// the error.
    fn publish(
        &self,
        event: DomainEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventPublishError>> + Send + '_>>;
}
