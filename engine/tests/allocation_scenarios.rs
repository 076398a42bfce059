//! End-to-end allocation scenarios over the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use chrono::Duration;
use common::{allocated, harness, line, numbers};
use prizedraw_core::model::{
    Competition, CompetitionStatus, LimitKind, PlatformSettings, Prize, PurchaseStatus,
    SpendingLimitRecord, TicketType, Voucher, VoucherReward, WalletKind,
};
use prizedraw_core::{CompetitionId, DomainEvent, EventPublishError, Money, StoreError, UserId};
use prizedraw_engine::{
    AllocationError, AllocationRequest, BulkAllocationRequest, ErrorKind, FundingChoice,
    RetryPolicy, VoucherRejection, WalletSelection, retry_allocation,
};
use prizedraw_testing::{FailPoint, fixtures, test_epoch};

// ============================================================================
// Worked examples
// ============================================================================

#[tokio::test]
async fn test_last_ticket_cannot_be_oversold() {
    let h = harness();
    let competition_id = h.competition(Competition {
        price_per_ticket: Money::from_pounds(2),
        ..fixtures::competition(10)
    });
    let early_bird = h.user_with_cash(Money::from_pounds(50));
    allocated(h.buy_with_cash(early_bird, competition_id, 9).await.unwrap());

    let buyer = h.user_with_cash(Money::from_pounds(10));
    let err = h.buy_with_cash(buyer, competition_id, 2).await.unwrap_err();
    assert_eq!(
        err,
        AllocationError::CompetitionFull {
            id: competition_id,
            requested: 2,
            remaining: 1,
        }
    );
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.store.wallet_balance(buyer, WalletKind::Cash), Money::from_pounds(10));

    let result = allocated(h.buy_with_cash(buyer, competition_id, 1).await.unwrap());
    assert_eq!(numbers(&result), vec![10]);
    assert_eq!(result.charged, Money::from_pounds(2));
    assert_eq!(result.stock[0].remaining, 0);
    assert_eq!(h.store.wallet_balance(buyer, WalletKind::Cash), Money::from_pounds(8));
}

#[tokio::test]
async fn test_free_competition_enforces_entry_cap() {
    let h = harness();
    let competition_id = h.competition(Competition {
        max_entries_per_user: Some(2),
        ..fixtures::free_competition(100)
    });
    let user = UserId::new();

    let err = h.buy_with_cash(user, competition_id, 3).await.unwrap_err();
    assert_eq!(
        err,
        AllocationError::EntryCapExceeded {
            id: competition_id,
            cap: 2,
            owned: 0,
            requested: 3,
        }
    );

    // No wallet exists: free entries never touch funds.
    let result = allocated(h.buy_with_cash(user, competition_id, 2).await.unwrap());
    assert_eq!(result.funding, "free");
    assert_eq!(result.charged, Money::ZERO);
    assert_eq!(result.purchase_id, None);
    assert_eq!(numbers(&result), vec![1, 2]);

    let err = h.buy_with_cash(user, competition_id, 1).await.unwrap_err();
    assert!(matches!(err, AllocationError::EntryCapExceeded { owned: 2, .. }));
}

#[tokio::test]
async fn test_cash_instant_win_is_paid_into_wallet() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(100));
    let slot_id = h.store.seed_instant_win(fixtures::instant_win(
        competition_id,
        5,
        Prize::cash(Money::from_pounds(25)),
        1,
    ));
    let user = h.user_with_cash(Money::from_pounds(10));

    let result = allocated(h.buy_with_cash(user, competition_id, 6).await.unwrap());

    assert_eq!(numbers(&result), vec![1, 2, 3, 4, 5, 6]);
    let winning: Vec<u32> = result
        .tickets
        .iter()
        .filter(|ticket| ticket.is_instant_win)
        .map(|ticket| ticket.ticket_number)
        .collect();
    assert_eq!(winning, vec![5]);
    assert_eq!(result.instant_wins.len(), 1);
    assert_eq!(result.instant_wins[0].instant_win_id, slot_id);

    // £10 - £6 + £25
    assert_eq!(h.store.wallet_balance(user, WalletKind::Cash), Money::from_pounds(29));
    let slot = h.store.instant_win(slot_id).unwrap();
    assert_eq!(slot.claimed_by, Some(user));
    assert_eq!(slot.claimed_at, Some(test_epoch()));
}

#[tokio::test]
async fn test_non_cash_prizes_are_disbursed() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(100));
    h.store
        .seed_instant_win(fixtures::instant_win(competition_id, 1, Prize::points(500), 1));
    h.store
        .seed_instant_win(fixtures::instant_win(competition_id, 2, Prize::free_tickets(2), 1));
    h.store.seed_instant_win(fixtures::instant_win(
        competition_id,
        3,
        Prize::physical("Games console", Money::from_pounds(400)),
        1,
    ));
    h.store.seed_instant_win(fixtures::instant_win(
        competition_id,
        4,
        Prize::site_credit(Money::from_pounds(5)),
        1,
    ));
    let user = h.user_with_cash(Money::from_pounds(4));

    let result = allocated(h.buy_with_cash(user, competition_id, 4).await.unwrap());
    assert_eq!(result.instant_wins.len(), 4);

    assert_eq!(h.store.points(user), 500);
    let minted = h.store.universal_tickets(user);
    assert_eq!(minted.len(), 2);
    assert!(minted.iter().all(|ticket| ticket.expires_at == Some(test_epoch() + Duration::days(90))));
    let claims = h.store.prize_claims(user);
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].prize_name, "Games console");
    assert_eq!(h.store.wallet_balance(user, WalletKind::Credit), Money::from_pounds(5));
    assert_eq!(h.store.wallet_balance(user, WalletKind::Cash), Money::ZERO);
}

#[tokio::test]
async fn test_multi_winner_slot_fills_then_closes() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(100));
    let slot_id = h.store.seed_instant_win(fixtures::instant_win(
        competition_id,
        1,
        Prize::points(10),
        2,
    ));
    let user = h.user_with_cash(Money::from_pounds(1));

    let result = allocated(h.buy_with_cash(user, competition_id, 1).await.unwrap());
    assert_eq!(result.instant_wins.len(), 1);

    let slot = h.store.instant_win(slot_id).unwrap();
    assert_eq!(slot.current_winners, 1);
    assert_eq!(slot.claimed_by, None, "a slot with room left stays open");
    assert!(slot.is_claimable());
}

// ============================================================================
// Funding paths
// ============================================================================

#[tokio::test]
async fn test_universal_tickets_fund_paid_entries() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(100));
    let user = UserId::new();
    let credits = h.store.seed_universal_tickets(user, 3);

    let result = allocated(
        h.engine
            .allocate(AllocationRequest {
                user_id: user,
                competition_id,
                quantity: 2,
                funding: FundingChoice::UniversalTickets,
                voucher_code: None,
            })
            .await
            .unwrap(),
    );

    assert_eq!(result.funding, "universal_tickets");
    assert_eq!(result.charged, Money::ZERO);
    assert!(result.tickets.iter().all(|t| t.ticket_type == TicketType::Universal));

    let tickets = h.store.user_tickets(user);
    let redeemed: Vec<_> = tickets.iter().filter_map(|t| t.universal_ticket_id).collect();
    assert_eq!(redeemed.len(), 2);
    assert!(redeemed.iter().all(|id| credits.contains(id)));
    let used = h.store.universal_tickets(user).iter().filter(|t| t.is_used).count();
    assert_eq!(used, 2);

    let err = h
        .engine
        .allocate(AllocationRequest {
            user_id: user,
            competition_id,
            quantity: 2,
            funding: FundingChoice::UniversalTickets,
            voucher_code: None,
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AllocationError::InsufficientUniversalTickets {
            available: 1,
            requested: 2,
        }
    );
    assert_eq!(err.kind(), ErrorKind::Funds);
}

#[tokio::test]
async fn test_credit_then_cash_splits_the_charge() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(100));
    let user = h.user_with_cash(Money::from_pounds(10));
    h.store.seed_wallet(user, WalletKind::Credit, Money::from_pence(150));

    let result = allocated(
        h.engine
            .allocate(AllocationRequest {
                user_id: user,
                competition_id,
                quantity: 4,
                funding: FundingChoice::Wallet(WalletSelection::CreditThenCash),
                voucher_code: None,
            })
            .await
            .unwrap(),
    );

    assert_eq!(result.breakdown.credit_used, Money::from_pence(150));
    assert_eq!(result.breakdown.cash_used, Money::from_pence(250));
    assert_eq!(h.store.wallet_balance(user, WalletKind::Credit), Money::ZERO);
    assert_eq!(h.store.wallet_balance(user, WalletKind::Cash), Money::from_pence(750));

    let purchase = h.store.purchase(result.purchase_id.unwrap()).unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Paid);
    assert_eq!(purchase.amount, Money::from_pounds(4));
}

#[tokio::test]
async fn test_bulk_allocation_is_one_purchase() {
    let h = harness();
    let first = h.competition(fixtures::competition(10));
    let second = h.competition(Competition {
        price_per_ticket: Money::from_pounds(3),
        ..fixtures::competition(10)
    });
    let user = h.user_with_cash(Money::from_pounds(20));

    let result = allocated(
        h.engine
            .allocate_bulk(BulkAllocationRequest {
                user_id: user,
                items: vec![line(first, 2), line(second, 1), line(first, 1)],
                funding: FundingChoice::Wallet(WalletSelection::Cash),
                voucher_code: None,
            })
            .await
            .unwrap(),
    );

    assert_eq!(result.tickets.len(), 4);
    assert_eq!(result.charged, Money::from_pounds(6));
    assert_eq!(result.stock.len(), 2);
    assert_eq!(h.store.competition(first).unwrap().sold_tickets, 3);
    assert_eq!(h.store.competition(second).unwrap().sold_tickets, 1);
    assert_eq!(h.store.purchases(user).len(), 1);
    assert_eq!(h.store.wallet_transactions(user, WalletKind::Cash).len(), 1);
    assert_eq!(h.store.wallet_balance(user, WalletKind::Cash), Money::from_pounds(14));
}

#[tokio::test]
async fn test_bulk_allocation_rejects_whole_request_when_one_line_fails() {
    let h = harness();
    let open = h.competition(fixtures::competition(10));
    let closed = h.competition(Competition {
        status: CompetitionStatus::Closed,
        ..fixtures::competition(10)
    });
    let user = h.user_with_cash(Money::from_pounds(20));

    let err = h
        .engine
        .allocate_bulk(BulkAllocationRequest {
            user_id: user,
            items: vec![line(open, 2), line(closed, 1)],
            funding: FundingChoice::Wallet(WalletSelection::Cash),
            voucher_code: None,
        })
        .await
        .unwrap_err();

    assert_eq!(
        err,
        AllocationError::CompetitionNotActive {
            id: closed,
            status: CompetitionStatus::Closed,
        }
    );
    assert_eq!(h.store.competition(open).unwrap().sold_tickets, 0);
    assert!(h.store.tickets(open).is_empty());
    assert_eq!(h.store.wallet_balance(user, WalletKind::Cash), Money::from_pounds(20));
}

// ============================================================================
// Vouchers
// ============================================================================

#[tokio::test]
async fn test_percentage_voucher_discounts_and_records_usage() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(100));
    let voucher_id = h.store.seed_voucher(fixtures::voucher(
        "SPRING25",
        VoucherReward::PercentageDiscount { basis_points: 2_500 },
    ));
    let user = h.user_with_cash(Money::from_pounds(10));

    let request = AllocationRequest {
        user_id: user,
        competition_id,
        quantity: 4,
        funding: FundingChoice::Wallet(WalletSelection::Cash),
        voucher_code: Some(" spring25 ".to_string()),
    };
    let result = allocated(h.engine.allocate(request.clone()).await.unwrap());

    assert_eq!(result.base_amount, Money::from_pounds(4));
    assert_eq!(result.discount, Money::from_pounds(1));
    assert_eq!(result.charged, Money::from_pounds(3));
    assert_eq!(h.store.wallet_balance(user, WalletKind::Cash), Money::from_pounds(7));

    let usages = h.store.voucher_usages(voucher_id);
    assert_eq!(usages.len(), 1);
    assert_eq!(Some(usages[0].purchase_id), result.purchase_id);

    let err = h.engine.allocate(request).await.unwrap_err();
    assert_eq!(
        err,
        AllocationError::VoucherInvalid {
            reason: VoucherRejection::AlreadyUsed,
        }
    );
}

#[tokio::test]
async fn test_free_entry_voucher_covers_a_single_ticket() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(100));
    h.store
        .seed_voucher(fixtures::voucher("FREEBIE", VoucherReward::FreeEntry));
    let user = UserId::new();

    let mut request = AllocationRequest {
        user_id: user,
        competition_id,
        quantity: 2,
        funding: FundingChoice::Wallet(WalletSelection::Cash),
        voucher_code: Some("FREEBIE".to_string()),
    };
    let err = h.engine.allocate(request.clone()).await.unwrap_err();
    assert_eq!(
        err,
        AllocationError::VoucherInvalid {
            reason: VoucherRejection::FreeEntryRequiresSingleTicket { quantity: 2 },
        }
    );

    request.quantity = 1;
    let result = allocated(h.engine.allocate(request).await.unwrap());
    assert_eq!(result.charged, Money::ZERO);
    assert_eq!(result.discount, Money::from_pounds(1));
    assert_eq!(h.store.user_tickets(user).len(), 1);
}

#[tokio::test]
async fn test_voucher_rejections() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(100));
    let free_id = h.competition(fixtures::free_competition(100));
    h.store.seed_voucher(fixtures::voucher(
        "TOPUP",
        VoucherReward::SiteCredit { amount: Money::from_pounds(5) },
    ));
    h.store.seed_voucher(Voucher {
        expires_at: Some(test_epoch()),
        ..fixtures::voucher("OLD", VoucherReward::FixedDiscount { amount: Money::from_pounds(1) })
    });
    h.store.seed_voucher(Voucher {
        starts_at: test_epoch() + Duration::days(1),
        ..fixtures::voucher("SOON", VoucherReward::FixedDiscount { amount: Money::from_pounds(1) })
    });
    let user = h.user_with_cash(Money::from_pounds(10));

    let attempt = |competition_id, code: &str| AllocationRequest {
        user_id: user,
        competition_id,
        quantity: 1,
        funding: FundingChoice::Wallet(WalletSelection::Cash),
        voucher_code: Some(code.to_string()),
    };

    let cases = [
        (attempt(competition_id, "NOPE"), AllocationError::VoucherInvalid { reason: VoucherRejection::NotFound }),
        (attempt(competition_id, "OLD"), AllocationError::VoucherInvalid { reason: VoucherRejection::Expired }),
        (attempt(competition_id, "SOON"), AllocationError::VoucherInvalid { reason: VoucherRejection::NotYetValid }),
        (attempt(competition_id, "TOPUP"), AllocationError::UnsupportedVoucherType { reward: "site_credit" }),
        (attempt(free_id, "OLD"), AllocationError::VoucherInvalid { reason: VoucherRejection::NotApplicable }),
    ];

    for (request, expected) in cases {
        let err = h.engine.allocate(request).await.unwrap_err();
        assert_eq!(err, expected);
    }
    assert_eq!(h.store.wallet_balance(user, WalletKind::Cash), Money::from_pounds(10));
    assert!(h.store.user_tickets(user).is_empty());
}

// ============================================================================
// Gates & limits
// ============================================================================

#[tokio::test]
async fn test_purchases_disabled_and_quantity_bounds() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(1_000));
    let user = h.user_with_cash(Money::from_pounds(1_000));

    let err = h.buy_with_cash(user, competition_id, 0).await.unwrap_err();
    assert_eq!(err, AllocationError::InvalidQuantity { requested: 0, max: 100 });

    let err = h.buy_with_cash(user, competition_id, 101).await.unwrap_err();
    assert_eq!(err, AllocationError::InvalidQuantity { requested: 101, max: 100 });

    h.store.set_settings(PlatformSettings {
        purchases_enabled: false,
        max_quantity_per_request: 100,
    });
    h.engine.settings().invalidate().await;

    let err = h.buy_with_cash(user, competition_id, 1).await.unwrap_err();
    assert_eq!(err, AllocationError::PurchasesDisabled);
    assert!(!err.is_retryable());

    h.store.set_settings(PlatformSettings {
        purchases_enabled: true,
        max_quantity_per_request: 5,
    });
    h.engine.settings().invalidate().await;

    let err = h.buy_with_cash(user, competition_id, 6).await.unwrap_err();
    assert_eq!(err, AllocationError::InvalidQuantity { requested: 6, max: 5 });
    allocated(h.buy_with_cash(user, competition_id, 5).await.unwrap());
}

#[tokio::test]
async fn test_spending_limits_block_and_roll_over() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(1_000));
    let user = h.user_with_cash(Money::from_pounds(100));
    h.store.seed_spending_limits(SpendingLimitRecord {
        daily_limit: Some(Money::from_pounds(5)),
        ..SpendingLimitRecord::unlimited(user, test_epoch().date_naive())
    });

    allocated(h.buy_with_cash(user, competition_id, 3).await.unwrap());

    let err = h.buy_with_cash(user, competition_id, 3).await.unwrap_err();
    assert_eq!(
        err,
        AllocationError::LimitExceeded {
            limit: LimitKind::Daily,
            cap: Money::from_pounds(5),
            spent: Money::from_pounds(3),
            remaining: Money::from_pounds(2),
            attempted: Money::from_pounds(3),
        }
    );

    h.clock.advance(Duration::days(1));
    allocated(h.buy_with_cash(user, competition_id, 3).await.unwrap());

    let record = h.store.spending_limits(user).unwrap();
    assert_eq!(record.daily_spent, Money::from_pounds(3));
    assert_eq!(record.weekly_spent, Money::from_pounds(6));
}

#[tokio::test]
async fn test_spend_is_tracked_without_caps() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(100));
    let user = h.user_with_cash(Money::from_pounds(10));

    allocated(h.buy_with_cash(user, competition_id, 2).await.unwrap());

    let record = h.store.spending_limits(user).unwrap();
    assert_eq!(record.daily_spent, Money::from_pounds(2));
    assert_eq!(record.daily_limit, None);
}

// ============================================================================
// Atomicity
// ============================================================================

#[tokio::test]
async fn test_failure_at_any_write_leaves_nothing_behind() {
    let points = [
        FailPoint::AddSoldTickets,
        FailPoint::InsertTicket,
        FailPoint::RecordInstantWinClaim,
        FailPoint::AppendWalletTransaction,
        FailPoint::UpdatePurchaseStatus,
        FailPoint::RecordVoucherUsage,
        FailPoint::SaveSpendingLimits,
        FailPoint::Commit,
    ];

    for point in points {
        let h = harness();
        let competition_id = h.competition(fixtures::competition(10));
        let slot_id = h.store.seed_instant_win(fixtures::instant_win(
            competition_id,
            1,
            Prize::cash(Money::from_pounds(5)),
            1,
        ));
        let voucher_id = h.store.seed_voucher(fixtures::voucher(
            "HALF",
            VoucherReward::PercentageDiscount { basis_points: 5_000 },
        ));
        let user = h.user_with_cash(Money::from_pounds(10));
        h.store.fail_next(point, StoreError::Database(format!("{point:?} failed")));

        let err = h
            .engine
            .allocate(AllocationRequest {
                user_id: user,
                competition_id,
                quantity: 2,
                funding: FundingChoice::Wallet(WalletSelection::Cash),
                voucher_code: Some("HALF".to_string()),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AllocationError::Store(_)), "{point:?}: {err:?}");
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert_eq!(h.store.competition(competition_id).unwrap().sold_tickets, 0, "{point:?}");
        assert!(h.store.tickets(competition_id).is_empty(), "{point:?}");
        assert_eq!(h.store.wallet_balance(user, WalletKind::Cash), Money::from_pounds(10), "{point:?}");
        assert!(h.store.wallet_transactions(user, WalletKind::Cash).is_empty(), "{point:?}");
        assert!(h.store.purchases(user).is_empty(), "{point:?}");
        assert!(h.store.voucher_usages(voucher_id).is_empty(), "{point:?}");
        assert!(h.store.instant_win(slot_id).unwrap().is_claimable(), "{point:?}");
        assert!(h.store.spending_limits(user).is_none(), "{point:?}");
        assert!(h.events.events().is_empty(), "{point:?}");
        assert_eq!(h.store.commits(), 0, "{point:?}");
    }
}

#[tokio::test]
async fn test_failure_after_redeeming_universal_tickets_restores_them() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(10));
    let user = UserId::new();
    h.store.seed_universal_tickets(user, 2);
    h.store.fail_next(FailPoint::MarkUniversalTicketUsed, StoreError::LockTimeout);

    let err = h
        .engine
        .allocate(AllocationRequest {
            user_id: user,
            competition_id,
            quantity: 2,
            funding: FundingChoice::UniversalTickets,
            voucher_code: None,
        })
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(h.store.universal_tickets(user).iter().all(|t| !t.is_used));
    assert!(h.store.user_tickets(user).is_empty());
}

#[tokio::test]
async fn test_retry_recovers_from_lock_timeout() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(10));
    let user = h.user_with_cash(Money::from_pounds(5));
    h.store.fail_next(FailPoint::LockCompetition, StoreError::LockTimeout);
    h.store.fail_next(FailPoint::LockCompetition, StoreError::Deadlock);

    let policy = RetryPolicy::builder()
        .initial_delay(std::time::Duration::from_millis(1))
        .build();
    let outcome = retry_allocation(&policy, || h.buy_with_cash(user, competition_id, 2))
        .await
        .unwrap();

    assert_eq!(numbers(&allocated(outcome)), vec![1, 2]);
    assert_eq!(h.store.commits(), 1);
    assert_eq!(h.store.wallet_balance(user, WalletKind::Cash), Money::from_pounds(3));
}

#[tokio::test]
async fn test_retry_does_not_repeat_business_rejections() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(10));
    let user = h.user_with_cash(Money::ZERO);
    let mut attempts = 0;

    let err = retry_allocation(&RetryPolicy::default(), || {
        attempts += 1;
        h.buy_with_cash(user, competition_id, 1)
    })
    .await
    .unwrap_err();

    assert!(matches!(err, AllocationError::InsufficientFunds { .. }));
    assert_eq!(attempts, 1);
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_completion_event_lists_numbers_per_competition() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(10));
    let user = h.user_with_cash(Money::from_pounds(5));

    let result = allocated(h.buy_with_cash(user, competition_id, 3).await.unwrap());

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        DomainEvent::PurchaseCompleted {
            purchase_id,
            user_id,
            allocations,
            amount,
            funding,
            occurred_at,
        } => {
            assert_eq!(*purchase_id, result.purchase_id);
            assert_eq!(*user_id, user);
            assert_eq!(allocations.len(), 1);
            assert_eq!(allocations[0].competition_id, competition_id);
            assert_eq!(allocations[0].ticket_numbers, vec![1, 2, 3]);
            assert_eq!(*amount, Money::from_pounds(3));
            assert_eq!(funding, "wallet_cash");
            assert_eq!(*occurred_at, test_epoch());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_publish_failure_does_not_undo_allocation() {
    let h = harness();
    let competition_id = h.competition(fixtures::competition(10));
    let user = h.user_with_cash(Money::from_pounds(5));
    h.events
        .fail_with(EventPublishError::Transport("broker down".to_string()));

    let result = allocated(h.buy_with_cash(user, competition_id, 2).await.unwrap());

    assert_eq!(result.tickets.len(), 2);
    assert_eq!(h.store.tickets(competition_id).len(), 2);
    assert_eq!(h.store.commits(), 1);
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn test_rejections_publish_nothing() {
    let h = harness();
    let competition_id = h.competition(Competition {
        status: CompetitionStatus::Draft,
        ..fixtures::competition(10)
    });
    let user = h.user_with_cash(Money::from_pounds(5));

    let err = h.buy_with_cash(user, competition_id, 1).await.unwrap_err();
    assert!(matches!(err, AllocationError::CompetitionNotActive { .. }));

    let missing = h.buy_with_cash(user, CompetitionId::new(), 1).await.unwrap_err();
    assert!(matches!(missing, AllocationError::CompetitionNotFound(_)));

    assert!(h.events.events().is_empty());
}
