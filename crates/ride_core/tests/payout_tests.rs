mod support;

use bevy_ecs::prelude::World;
use ride_core::dispatch::{record_driver_response, DriverReply};
use ride_core::ecs::{Currency, FleetOwnerId, Owner};
use ride_core::otp::PickupOtp;
use ride_core::payout::{
    create_batch, execute_batch, PayoutBatch, PayoutBatchStatus, PayoutError, PayoutItemStatus,
};
use ride_core::settlement::{
    confirm_payment, EntryType, FinancialLedger, LedgerParty, PaymentMethod, TxnType, WalletKey,
    WalletParty, Wallets,
};
use ride_core::telemetry::PlatformTelemetry;
use ride_core::trip::{complete_trip, request_trip, start_trip};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use support::world::{
    cell_at_ring, ride_ask, seed_cell, spawn_driver, spawn_rider, TestWorldBuilder, TENANT,
};

const PERIOD_START: u64 = 0;
const PERIOD_END: u64 = 7 * 24 * 3_600 * 1_000;

fn key(party: WalletParty) -> WalletKey {
    WalletKey {
        tenant: TENANT,
        party,
        currency: Currency::Inr,
    }
}

fn seed_wallet(world: &mut World, party: WalletParty, amount: Decimal) {
    world.resource_mut::<Wallets>().apply_delta(key(party), amount);
}

fn fleet_party(id: u64) -> WalletParty {
    WalletParty::Owner(Owner::Fleet(FleetOwnerId(id)))
}

#[test]
fn batch_snapshots_only_positive_balances() {
    let mut world = TestWorldBuilder::new().build();
    seed_wallet(&mut world, fleet_party(1), dec!(100.00));
    seed_wallet(&mut world, WalletParty::Tenant, dec!(50.00));
    // A cash collector in the red gets nothing until they are positive again.
    seed_wallet(&mut world, fleet_party(2), dec!(-20.00));

    let batch = create_batch(&mut world, TENANT, Currency::Inr, PERIOD_START, PERIOD_END);
    let stored = world.get::<PayoutBatch>(batch).expect("batch");

    assert_eq!(stored.items.len(), 2);
    assert_eq!(stored.total_amount, dec!(150.00));
    assert_eq!(stored.status, PayoutBatchStatus::Pending);
    assert!(stored
        .items
        .iter()
        .all(|item| item.status == PayoutItemStatus::Pending));
    // Deterministic order: the tenant wallet sorts before owner wallets.
    assert_eq!(stored.items[0].party, WalletParty::Tenant);
    assert_eq!(stored.items[1].party, fleet_party(1));
}

#[test]
fn execution_pays_items_and_drains_wallets() {
    let mut world = TestWorldBuilder::new().build();
    seed_wallet(&mut world, fleet_party(1), dec!(100.00));
    seed_wallet(&mut world, WalletParty::Tenant, dec!(50.00));

    let batch = create_batch(&mut world, TENANT, Currency::Inr, PERIOD_START, PERIOD_END);
    let summary = execute_batch(&mut world, batch, "2026-08-w1").expect("execute");

    assert_eq!(summary.paid, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_paid, dec!(150.00));

    assert_eq!(world.resource::<Wallets>().balance(key(fleet_party(1))), Decimal::ZERO);
    assert_eq!(
        world
            .resource::<Wallets>()
            .balance(key(WalletParty::Tenant)),
        Decimal::ZERO
    );

    let ledger = world.resource::<FinancialLedger>();
    assert_eq!(ledger.entries().len(), 2);
    assert!(ledger
        .entries()
        .iter()
        .all(|e| e.txn == TxnType::Payout && e.entry == EntryType::Debit));

    let stored = world.get::<PayoutBatch>(batch).expect("batch");
    assert_eq!(stored.status, PayoutBatchStatus::Completed);
    assert_eq!(stored.idempotency_key.as_deref(), Some("2026-08-w1"));
    assert!(stored.executed_at.is_some());
}

#[test]
fn reexecuting_with_the_same_key_replays_without_paying_again() {
    let mut world = TestWorldBuilder::new().build();
    seed_wallet(&mut world, fleet_party(1), dec!(100.00));

    let batch = create_batch(&mut world, TENANT, Currency::Inr, PERIOD_START, PERIOD_END);
    let first = execute_batch(&mut world, batch, "2026-08-w1").expect("execute");
    let second = execute_batch(&mut world, batch, "2026-08-w1").expect("replay");

    assert_eq!(first, second);
    assert_eq!(world.resource::<FinancialLedger>().entries().len(), 1);
    assert_eq!(world.resource::<Wallets>().balance(key(fleet_party(1))), Decimal::ZERO);
    assert_eq!(world.resource::<PlatformTelemetry>().payout_items_paid, 1);
}

#[test]
fn reexecuting_with_a_different_key_conflicts() {
    let mut world = TestWorldBuilder::new().build();
    seed_wallet(&mut world, fleet_party(1), dec!(100.00));

    let batch = create_batch(&mut world, TENANT, Currency::Inr, PERIOD_START, PERIOD_END);
    execute_batch(&mut world, batch, "2026-08-w1").expect("execute");

    let err = execute_batch(&mut world, batch, "2026-08-w2").expect_err("conflict");
    assert_eq!(err, PayoutError::KeyConflict { batch });
    assert_eq!(world.resource::<FinancialLedger>().entries().len(), 1);
}

#[test]
fn a_shortfall_fails_only_that_item() {
    let mut world = TestWorldBuilder::new().build();
    seed_wallet(&mut world, fleet_party(1), dec!(100.00));
    seed_wallet(&mut world, WalletParty::Tenant, dec!(50.00));

    let batch = create_batch(&mut world, TENANT, Currency::Inr, PERIOD_START, PERIOD_END);
    // The owner's balance moves below the snapshot before the batch runs.
    seed_wallet(&mut world, fleet_party(1), dec!(-60.00));

    let summary = execute_batch(&mut world, batch, "2026-08-w1").expect("execute");
    assert_eq!(summary.paid, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.total_paid, dec!(50.00));

    let stored = world.get::<PayoutBatch>(batch).expect("batch");
    let owner_item = stored
        .items
        .iter()
        .find(|item| item.party == fleet_party(1))
        .expect("owner item");
    assert_eq!(owner_item.status, PayoutItemStatus::Failed);

    // The failed item's wallet is untouched; it rolls to the next period.
    assert_eq!(
        world.resource::<Wallets>().balance(key(fleet_party(1))),
        dec!(40.00)
    );
    assert_eq!(
        world
            .resource::<Wallets>()
            .balance(key(WalletParty::Tenant)),
        Decimal::ZERO
    );
    let telemetry = world.resource::<PlatformTelemetry>();
    assert_eq!(telemetry.payout_items_paid, 1);
    assert_eq!(telemetry.payout_items_failed, 1);
}

#[test]
fn wallets_reconcile_with_the_ledger_across_settlement_and_payout() {
    let mut world = TestWorldBuilder::new().build();
    let driver = spawn_driver(&mut world, 1, cell_at_ring(seed_cell(), 2));
    let rider = spawn_rider(&mut world);
    let requested = request_trip(
        &mut world,
        ride_ask(rider, seed_cell(), cell_at_ring(seed_cell(), 15)),
    )
    .expect("request");
    record_driver_response(&mut world, requested.trip, driver, DriverReply::Accept)
        .expect("accept");
    let code = world
        .get::<PickupOtp>(requested.trip)
        .expect("otp")
        .code
        .clone();
    start_trip(&mut world, requested.trip, &code).expect("start");
    complete_trip(&mut world, requested.trip, dec!(5), dec!(10)).expect("complete");
    confirm_payment(&mut world, requested.trip, PaymentMethod::Online).expect("settle");

    let owner_wallet = WalletParty::Owner(Owner::Driver(driver));
    let owner_ledger = LedgerParty::Owner(Owner::Driver(driver));
    let reconcile = |world: &World, wallet: WalletParty, ledger: LedgerParty| {
        assert_eq!(
            world.resource::<Wallets>().balance(key(wallet)),
            world
                .resource::<FinancialLedger>()
                .signed_sum(TENANT, ledger, Currency::Inr)
        );
    };

    reconcile(&world, owner_wallet, owner_ledger);
    reconcile(&world, WalletParty::Tenant, LedgerParty::Tenant(TENANT));

    let batch = create_batch(&mut world, TENANT, Currency::Inr, PERIOD_START, PERIOD_END);
    let summary = execute_batch(&mut world, batch, "2026-08-w1").expect("execute");
    assert_eq!(summary.paid, 2);

    // Every paid item posted a debit matching the wallet decrement, so the
    // wallet stays a pure cache over the ledger through the whole cycle.
    reconcile(&world, owner_wallet, owner_ledger);
    reconcile(&world, WalletParty::Tenant, LedgerParty::Tenant(TENANT));
    assert_eq!(
        world.resource::<Wallets>().balance(key(owner_wallet)),
        Decimal::ZERO
    );
}

#[test]
fn empty_wallets_yield_an_empty_batch() {
    let mut world = TestWorldBuilder::new().build();
    let batch = create_batch(&mut world, TENANT, Currency::Inr, PERIOD_START, PERIOD_END);
    let summary = execute_batch(&mut world, batch, "2026-08-w1").expect("execute");
    assert_eq!(summary.paid, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_paid, Decimal::ZERO);
}
