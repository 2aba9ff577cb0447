//! Payment confirmation: one operation that freezes the payment, posts the
//! ledger rows, updates wallets, and closes the trip. Everything is resolved
//! and validated before the first write, so a failed confirmation leaves the
//! books untouched.

use bevy_ecs::prelude::{Entity, World};
use rust_decimal::Decimal;

use crate::clock::PlatformClock;
use crate::ecs::{Actor, StatusHistory, Trip, TripStatus, TripTiming, Vehicle};
use crate::pricing::Fare;
use crate::telemetry::PlatformTelemetry;

use super::split::compute_split;
use super::{
    CommissionRules, CommissionScope, FinancialLedger, LedgerEntry, LedgerParty, Payment,
    PaymentMethod, PaymentStatus, Receipt, SettlementError, TxnType, WalletKey, WalletParty,
    Wallets,
};

/// `ConfirmPayment(trip, method)`.
///
/// Splits the frozen fare into platform / owner / tenant amounts, posts the
/// credit rows (plus, for cash fares, the owner's cash-collected debit),
/// applies the wallet deltas, and moves the trip to `completed`.
///
/// Confirming an already-settled trip returns the stored receipt and writes
/// nothing, so payment-provider retries are harmless.
pub fn confirm_payment(
    world: &mut World,
    trip_entity: Entity,
    method: PaymentMethod,
) -> Result<Receipt, SettlementError> {
    let now = world.resource::<PlatformClock>().now();

    let trip = world
        .get::<Trip>(trip_entity)
        .ok_or(SettlementError::TripNotFound(trip_entity))?;
    let payment = world
        .get::<Payment>(trip_entity)
        .ok_or(SettlementError::PaymentNotFound(trip_entity))?;
    if payment.status == PaymentStatus::Successful {
        if let Some(receipt) = payment.receipt.clone() {
            tracing::debug!(trip = ?trip_entity, "payment already settled, replaying receipt");
            return Ok(receipt);
        }
    }
    if trip.status != TripStatus::PaymentPending {
        return Err(SettlementError::TripNotPayable {
            trip: trip_entity,
            status: trip.status,
        });
    }
    let fare = world
        .get::<Fare>(trip_entity)
        .ok_or(SettlementError::MissingFare(trip_entity))?
        .0
        .clone();
    let driver = trip.driver.ok_or(SettlementError::MissingDriver(trip_entity))?;
    let owner = world
        .get::<Vehicle>(driver)
        .ok_or(SettlementError::MissingVehicle(driver))?
        .owner;

    let tenant = trip.tenant;
    let category = trip.category;
    let distance_km = trip
        .actual_distance_km
        .unwrap_or(trip.estimated_distance_km);

    let rules = world.resource::<CommissionRules>();
    let platform_rule = rules
        .resolve(tenant, CommissionScope::Platform, category, distance_km, now)
        .ok_or(SettlementError::MissingCommissionRule {
            scope: CommissionScope::Platform,
            tenant,
        })?
        .clone();
    let owner_rule = rules
        .resolve(tenant, CommissionScope::Owner, category, distance_km, now)
        .ok_or(SettlementError::MissingCommissionRule {
            scope: CommissionScope::Owner,
            tenant,
        })?
        .clone();

    let split = compute_split(fare.final_fare, &platform_rule, &owner_rule)?;
    // Tax was charged to the rider inside the fare; it comes out of the
    // platform's cut, never the owner's or tenant's.
    let platform_net = split.platform_gross - fare.tax;
    if platform_net < Decimal::ZERO {
        return Err(SettlementError::TaxExceedsPlatformFee {
            tax: fare.tax,
            platform_fee: split.platform_gross,
        });
    }

    let currency = fare.currency;
    let receipt = Receipt {
        trip: trip_entity,
        method,
        currency,
        final_fare: fare.final_fare,
        platform_fee: platform_net,
        tax: fare.tax,
        owner_amount: split.owner_amount,
        tenant_amount: split.tenant_amount,
        owner,
        settled_at: now,
    };

    // All validation passed; everything below must land together.
    {
        let mut ledger = world.resource_mut::<FinancialLedger>();
        if platform_net > Decimal::ZERO {
            ledger.append(LedgerEntry::credit(
                tenant,
                currency,
                LedgerParty::Platform,
                TxnType::PlatformFee,
                platform_net,
                Some(trip_entity),
                now,
            ));
        }
        if fare.tax > Decimal::ZERO {
            ledger.append(LedgerEntry::credit(
                tenant,
                currency,
                LedgerParty::Tax,
                TxnType::Tax,
                fare.tax,
                Some(trip_entity),
                now,
            ));
        }
        if split.owner_amount > Decimal::ZERO {
            ledger.append(LedgerEntry::credit(
                tenant,
                currency,
                LedgerParty::Owner(owner),
                TxnType::OwnerEarning,
                split.owner_amount,
                Some(trip_entity),
                now,
            ));
        }
        if split.tenant_amount > Decimal::ZERO {
            ledger.append(LedgerEntry::credit(
                tenant,
                currency,
                LedgerParty::Tenant(tenant),
                TxnType::TenantShare,
                split.tenant_amount,
                Some(trip_entity),
                now,
            ));
        }
        // A cash fare never reached the platform: the owner collected it and
        // owes everything but their own cut back.
        if method == PaymentMethod::Offline {
            ledger.append(LedgerEntry::debit(
                tenant,
                currency,
                LedgerParty::Owner(owner),
                TxnType::CashCollected,
                fare.final_fare,
                Some(trip_entity),
                now,
            ));
        }
    }
    {
        let owner_delta = match method {
            PaymentMethod::Online => split.owner_amount,
            PaymentMethod::Offline => split.owner_amount - fare.final_fare,
        };
        let mut wallets = world.resource_mut::<Wallets>();
        wallets.apply_delta(
            WalletKey {
                tenant,
                party: WalletParty::Owner(owner),
                currency,
            },
            owner_delta,
        );
        wallets.apply_delta(
            WalletKey {
                tenant,
                party: WalletParty::Tenant,
                currency,
            },
            split.tenant_amount,
        );
    }
    if let Some(mut payment) = world.get_mut::<Payment>(trip_entity) {
        payment.status = PaymentStatus::Successful;
        payment.method = Some(method);
        payment.receipt = Some(receipt.clone());
    }
    if let Some(mut trip) = world.get_mut::<Trip>(trip_entity) {
        trip.status = TripStatus::Completed;
    }
    if let Some(mut timing) = world.get_mut::<TripTiming>(trip_entity) {
        timing.completed_at = Some(now);
    }
    if let Some(mut history) = world.get_mut::<StatusHistory>(trip_entity) {
        history.record(
            Some(TripStatus::PaymentPending),
            TripStatus::Completed,
            Actor::Settlement,
            now,
        );
    }
    world.resource_mut::<PlatformTelemetry>().payments_settled += 1;
    tracing::info!(
        trip = ?trip_entity,
        ?method,
        fare = %fare.final_fare,
        platform = %platform_net,
        owner = %split.owner_amount,
        tenant_share = %split.tenant_amount,
        "payment settled"
    );
    Ok(receipt)
}
