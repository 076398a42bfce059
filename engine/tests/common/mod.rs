//! Shared harness for engine integration tests.

#![allow(dead_code)] // Each test binary uses a different subset
#![allow(clippy::panic)]

use prizedraw_core::model::{Competition, PurchaseLine, WalletKind};
use prizedraw_core::{CompetitionId, Money, UserId};
use prizedraw_engine::{
    AllocationError, AllocationOrchestrator, AllocationOutcome, AllocationRequest,
    AllocationResult, FundingChoice, WalletSelection,
};
use prizedraw_testing::{InMemoryStore, ManualClock, RecordingEventPublisher, test_epoch};
use std::sync::Arc;

/// Engine wired to in-memory collaborators.
pub struct Harness {
    pub store: InMemoryStore,
    pub events: RecordingEventPublisher,
    pub clock: ManualClock,
    pub engine: Arc<AllocationOrchestrator<InMemoryStore>>,
}

pub fn harness() -> Harness {
    let store = InMemoryStore::new();
    let events = RecordingEventPublisher::new();
    let clock = ManualClock::new(test_epoch());
    let engine = AllocationOrchestrator::builder(Arc::new(store.clone()))
        .clock(Arc::new(clock.clone()))
        .publisher(Arc::new(events.clone()))
        .build();

    Harness {
        store,
        events,
        clock,
        engine: Arc::new(engine),
    }
}

impl Harness {
    /// Seed a competition and return its id
    pub fn competition(&self, competition: Competition) -> CompetitionId {
        let id = competition.id;
        self.store.seed_competition(competition);
        id
    }

    /// A fresh user holding `cash` in the cash wallet
    pub fn user_with_cash(&self, cash: Money) -> UserId {
        let user = UserId::new();
        self.store.seed_wallet(user, WalletKind::Cash, cash);
        user
    }

    /// Buy `quantity` tickets paying from the cash wallet
    pub async fn buy_with_cash(
        &self,
        user_id: UserId,
        competition_id: CompetitionId,
        quantity: u32,
    ) -> Result<AllocationOutcome, AllocationError> {
        self.engine
            .allocate(AllocationRequest {
                user_id,
                competition_id,
                quantity,
                funding: FundingChoice::Wallet(WalletSelection::Cash),
                voucher_code: None,
            })
            .await
    }
}

pub fn line(competition_id: CompetitionId, quantity: u32) -> PurchaseLine {
    PurchaseLine {
        competition_id,
        quantity,
    }
}

/// Unwrap an outcome that must have issued tickets
pub fn allocated(outcome: AllocationOutcome) -> AllocationResult {
    match outcome {
        AllocationOutcome::Allocated(result) => result,
        AllocationOutcome::PaymentRequired(charge) => {
            panic!("expected an allocation, got a pending charge: {charge:?}")
        }
    }
}

/// Ticket numbers of a result, in allocation order
pub fn numbers(result: &AllocationResult) -> Vec<u32> {
    result.tickets.iter().map(|ticket| ticket.ticket_number).collect()
}
