//! # Prize Draw Engine
//!
//! Ticket allocation and settlement for prize-draw competitions.
//!
//! The [`AllocationOrchestrator`] turns a purchase request into numbered
//! tickets in a single unit of work. It validates the competition, applies a
//! voucher, enforces responsible-spending limits, takes payment from one of
//! several funding paths, and claims any instant-win prize the issued numbers
//! hit. Either every effect commits or none does.
//!
//! ```text
//!  request ─► settings gate ─► lock competitions ─► price + voucher
//!                                                        │
//!      events ◄─ commit ◄─ number + claim ◄─ reserve funds ◄─ limits
//! ```
//!
//! # Components
//!
//! - [`wallet`]: cash and site-credit ledger
//! - [`spending`]: daily, weekly, monthly and per-purchase caps
//! - [`voucher`]: discount codes
//! - [`numbering`]: gapless per-competition ticket numbers
//! - [`instant_win`]: exactly-once prize claims
//! - [`funding`]: free, universal-ticket, wallet and external payment paths
//! - [`admin`]: instant-win seeding and overrides
//! - [`settings`]: cached platform settings
//!
//! # Example
//!
//! ```no_run
//! use prizedraw_engine::{AllocationOrchestrator, AllocationRequest, FundingChoice, WalletSelection};
//! use prizedraw_core::{CompetitionId, UserId};
//! use prizedraw_testing::InMemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), prizedraw_engine::AllocationError> {
//! let orchestrator = AllocationOrchestrator::builder(Arc::new(InMemoryStore::new())).build();
//! let outcome = orchestrator
//!     .allocate(AllocationRequest {
//!         user_id: UserId::new(),
//!         competition_id: CompetitionId::new(),
//!         quantity: 2,
//!         funding: FundingChoice::Wallet(WalletSelection::Cash),
//!         voucher_code: None,
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod funding;
pub mod instant_win;
pub mod metrics;
pub mod numbering;
pub mod orchestrator;
pub mod retry;
pub mod settings;
pub mod spending;
pub mod voucher;
pub mod wallet;

pub use admin::{AdminError, ClaimOverride, InstantWinAdmin, InstantWinDraft};
pub use config::{Config, ConfigError};
pub use error::{AllocationError, ErrorKind, Result, VoucherRejection};
pub use events::{BroadcastEventPublisher, TracingEventPublisher};
pub use funding::{FundingChoice, WalletSelection};
pub use instant_win::ClaimedPrize;
pub use orchestrator::{
    AllocatedTicket, AllocationOrchestrator, AllocationOrchestratorBuilder, AllocationOutcome,
    AllocationRequest, AllocationResult, BulkAllocationRequest, CompetitionStock, PendingCharge,
    ReservationRequest,
};
pub use retry::{RetryPolicy, retry_allocation};
pub use settings::SettingsCache;
pub use wallet::WalletLedger;
