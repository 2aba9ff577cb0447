//! Payout batch creation and execution.

use bevy_ecs::prelude::{Entity, World};
use rust_decimal::Decimal;

use crate::clock::PlatformClock;
use crate::ecs::{Currency, TenantId};
use crate::settlement::{
    FinancialLedger, LedgerEntry, LedgerParty, TxnType, WalletKey, WalletParty, Wallets,
};
use crate::telemetry::PlatformTelemetry;

use super::{
    PayoutBatch, PayoutBatchStatus, PayoutError, PayoutItem, PayoutItemStatus, PayoutSummary,
};

fn ledger_party(tenant: TenantId, party: WalletParty) -> LedgerParty {
    match party {
        WalletParty::Owner(owner) => LedgerParty::Owner(owner),
        WalletParty::Tenant => LedgerParty::Tenant(tenant),
    }
}

/// Snapshot every positive wallet balance for one tenant and currency into a
/// pending batch. Items are ordered by party so batch contents are
/// deterministic for a given wallet state.
pub fn create_batch(
    world: &mut World,
    tenant: TenantId,
    currency: Currency,
    period_start: u64,
    period_end: u64,
) -> Entity {
    let now = world.resource::<PlatformClock>().now();
    let mut items: Vec<PayoutItem> = world
        .resource::<Wallets>()
        .iter()
        .filter(|(key, balance)| {
            key.tenant == tenant && key.currency == currency && **balance > Decimal::ZERO
        })
        .map(|(key, balance)| PayoutItem {
            party: key.party,
            amount: *balance,
            status: PayoutItemStatus::Pending,
        })
        .collect();
    items.sort_by_key(|item| item.party);
    let total_amount = items.iter().map(|item| item.amount).sum();

    let batch = world
        .spawn(PayoutBatch {
            tenant,
            currency,
            period_start,
            period_end,
            items,
            total_amount,
            status: PayoutBatchStatus::Pending,
            idempotency_key: None,
            created_at: now,
            executed_at: None,
        })
        .id();
    tracing::info!(?batch, ?tenant, ?currency, "payout batch created");
    batch
}

fn summarize(batch_entity: Entity, batch: &PayoutBatch) -> PayoutSummary {
    let paid = batch
        .items
        .iter()
        .filter(|i| i.status == PayoutItemStatus::Paid)
        .count();
    let failed = batch
        .items
        .iter()
        .filter(|i| i.status == PayoutItemStatus::Failed)
        .count();
    let total_paid = batch
        .items
        .iter()
        .filter(|i| i.status == PayoutItemStatus::Paid)
        .map(|i| i.amount)
        .sum();
    PayoutSummary {
        batch: batch_entity,
        paid,
        failed,
        total_paid,
    }
}

/// Execute a pending batch under an idempotency key.
///
/// Re-executing with the key it already ran under replays the stored result
/// and writes nothing; a different key on an executed batch is a conflict.
/// Each item pays only if the wallet still covers the snapshot amount;
/// shortfalls mark that item failed and the rest proceed.
pub fn execute_batch(
    world: &mut World,
    batch_entity: Entity,
    idempotency_key: &str,
) -> Result<PayoutSummary, PayoutError> {
    let batch = world
        .get::<PayoutBatch>(batch_entity)
        .ok_or(PayoutError::BatchNotFound(batch_entity))?
        .clone();
    if batch.status == PayoutBatchStatus::Completed {
        if batch.idempotency_key.as_deref() == Some(idempotency_key) {
            tracing::debug!(batch = ?batch_entity, "payout batch already executed, replaying");
            return Ok(summarize(batch_entity, &batch));
        }
        return Err(PayoutError::KeyConflict {
            batch: batch_entity,
        });
    }

    let now = world.resource::<PlatformClock>().now();
    let tenant = batch.tenant;
    let currency = batch.currency;
    let mut items = batch.items.clone();

    for item in &mut items {
        let key = WalletKey {
            tenant,
            party: item.party,
            currency,
        };
        let covered = world.resource::<Wallets>().balance(key) >= item.amount;
        if !covered {
            item.status = PayoutItemStatus::Failed;
            world.resource_mut::<PlatformTelemetry>().payout_items_failed += 1;
            tracing::warn!(batch = ?batch_entity, party = ?item.party, amount = %item.amount, "payout item failed, balance below snapshot");
            continue;
        }
        world
            .resource_mut::<FinancialLedger>()
            .append(LedgerEntry::debit(
                tenant,
                currency,
                ledger_party(tenant, item.party),
                TxnType::Payout,
                item.amount,
                None,
                now,
            ));
        world
            .resource_mut::<Wallets>()
            .apply_delta(key, -item.amount);
        item.status = PayoutItemStatus::Paid;
        world.resource_mut::<PlatformTelemetry>().payout_items_paid += 1;
    }

    let summary = {
        let Some(mut stored) = world.get_mut::<PayoutBatch>(batch_entity) else {
            return Err(PayoutError::BatchNotFound(batch_entity));
        };
        stored.items = items;
        stored.status = PayoutBatchStatus::Completed;
        stored.idempotency_key = Some(idempotency_key.to_string());
        stored.executed_at = Some(now);
        summarize(batch_entity, &*stored)
    };
    tracing::info!(
        batch = ?batch_entity,
        paid = summary.paid,
        failed = summary.failed,
        total = %summary.total_paid,
        "payout batch executed"
    );
    Ok(summary)
}
