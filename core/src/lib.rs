//! # Prize Draw Core
//!
//! Domain types and persistence traits for the ticket allocation and
//! settlement engine.
//!
//! - **Model**: competitions, tickets, instant-win slots, wallets, purchases,
//!   vouchers and spending limits ([`model`])
//! - **Store**: the unit-of-work seam every component is generic over
//!   ([`store`])
//! - **Events**: facts published after commit ([`event`])
//! - **Environment**: injected capabilities such as the [`Clock`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod environment;
pub mod error;
pub mod event;
pub mod ids;
pub mod model;
pub mod money;
pub mod store;

pub use environment::{Clock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use event::{AllocatedNumbers, DomainEvent, EventPublishError, EventPublisher};
pub use ids::{
    CompetitionId, InstantWinId, PaymentReference, PrizeClaimId, PurchaseId, TicketId,
    UniversalTicketId, UserId, VoucherId, WalletId, WalletTransactionId,
};
pub use money::Money;
pub use store::{
    CompetitionStore, InstantWinStore, PrizeStore, PurchaseStore, SettingsStore,
    SpendingLimitStore, TicketStore, TransactionalStore, UnitOfWork, VoucherStore, WalletStore,
};
