//! Settlement primitives: the append-only financial ledger, materialized
//! wallets, commission rules, and the payment row.
//!
//! Wallets are a cache over the ledger: a wallet's balance must always equal
//! the signed sum of that entity's ledger rows. Both are only ever written
//! inside the settlement or payout transaction, ledger first.

pub mod engine;
pub mod split;

use std::collections::HashMap;

use bevy_ecs::prelude::{Component, Entity, Resource};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ecs::{Currency, Owner, TenantId, TripStatus, VehicleCategory};

pub use engine::confirm_payment;
pub use split::{compute_split, FareSplit};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettlementError {
    #[error("trip {0:?} not found")]
    TripNotFound(Entity),
    #[error("no payment row for trip {0:?}")]
    PaymentNotFound(Entity),
    #[error("trip {trip:?} is not awaiting payment (status {status:?})")]
    TripNotPayable { trip: Entity, status: TripStatus },
    #[error("no fare row for trip {0:?}")]
    MissingFare(Entity),
    #[error("trip {0:?} has no assigned driver")]
    MissingDriver(Entity),
    #[error("driver {0:?} has no active vehicle")]
    MissingVehicle(Entity),
    #[error("no effective {scope:?} commission rule for tenant {tenant:?}")]
    MissingCommissionRule {
        scope: CommissionScope,
        tenant: TenantId,
    },
    #[error("fare split does not sum to the final fare (fare {fare}, split {split})")]
    SplitInvariant { fare: Decimal, split: Decimal },
    #[error("tax {tax} exceeds the platform fee {platform_fee}")]
    TaxExceedsPlatformFee { tax: Decimal, platform_fee: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Collected by the platform; earnings are credited out.
    Online,
    /// Cash collected by the driver; the owner owes the non-owner share.
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Initiated,
    Successful,
    Failed,
}

/// One payment row per trip; amount frozen from the fare at creation, status
/// mutated exactly once by the settlement engine.
#[derive(Debug, Clone, Component)]
pub struct Payment {
    pub trip: Entity,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub method: Option<PaymentMethod>,
    pub receipt: Option<Receipt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub trip: Entity,
    pub method: PaymentMethod,
    pub currency: Currency,
    pub final_fare: Decimal,
    pub platform_fee: Decimal,
    pub tax: Decimal,
    pub owner_amount: Decimal,
    pub tenant_amount: Decimal,
    pub owner: Owner,
    pub settled_at: u64,
}

/// The party a ledger row belongs to. Platform and tax rows carry no entity
/// id by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LedgerParty {
    Platform,
    Tax,
    Tenant(TenantId),
    Owner(Owner),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnType {
    PlatformFee,
    Tax,
    OwnerEarning,
    TenantShare,
    /// Offline fare collected in cash by the owner's driver.
    CashCollected,
    Payout,
}

/// One immutable ledger row. Exactly one of `credited_at` / `debited_at` is
/// set, enforced by the constructors.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub tenant: TenantId,
    pub currency: Currency,
    pub party: LedgerParty,
    pub txn: TxnType,
    pub amount: Decimal,
    pub entry: EntryType,
    pub trip: Option<Entity>,
    pub credited_at: Option<u64>,
    pub debited_at: Option<u64>,
}

impl LedgerEntry {
    pub fn credit(
        tenant: TenantId,
        currency: Currency,
        party: LedgerParty,
        txn: TxnType,
        amount: Decimal,
        trip: Option<Entity>,
        at: u64,
    ) -> Self {
        debug_assert!(amount > Decimal::ZERO, "ledger amounts must be positive");
        Self {
            tenant,
            currency,
            party,
            txn,
            amount,
            entry: EntryType::Credit,
            trip,
            credited_at: Some(at),
            debited_at: None,
        }
    }

    pub fn debit(
        tenant: TenantId,
        currency: Currency,
        party: LedgerParty,
        txn: TxnType,
        amount: Decimal,
        trip: Option<Entity>,
        at: u64,
    ) -> Self {
        debug_assert!(amount > Decimal::ZERO, "ledger amounts must be positive");
        Self {
            tenant,
            currency,
            party,
            txn,
            amount,
            entry: EntryType::Debit,
            trip,
            credited_at: None,
            debited_at: Some(at),
        }
    }

    pub fn signed_amount(&self) -> Decimal {
        match self.entry {
            EntryType::Credit => self.amount,
            EntryType::Debit => -self.amount,
        }
    }
}

/// Append-only. Rows are never edited or removed.
#[derive(Debug, Default, Resource)]
pub struct FinancialLedger {
    entries: Vec<LedgerEntry>,
}

impl FinancialLedger {
    pub fn append(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Signed sum of one party's rows in one currency; what the matching
    /// wallet balance must equal.
    pub fn signed_sum(&self, tenant: TenantId, party: LedgerParty, currency: Currency) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.tenant == tenant && e.party == party && e.currency == currency)
            .map(LedgerEntry::signed_amount)
            .sum()
    }
}

/// The party a wallet belongs to; the tenant's own wallet is `Tenant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WalletParty {
    Tenant,
    Owner(Owner),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletKey {
    pub tenant: TenantId,
    pub party: WalletParty,
    pub currency: Currency,
}

/// Materialized balances, one per (party, currency). Only mutated inside
/// settlement/payout operations, after the matching ledger rows are posted.
#[derive(Debug, Default, Resource)]
pub struct Wallets {
    balances: HashMap<WalletKey, Decimal>,
}

impl Wallets {
    pub fn balance(&self, key: WalletKey) -> Decimal {
        self.balances.get(&key).copied().unwrap_or(Decimal::ZERO)
    }

    /// Creates the wallet if absent.
    pub fn apply_delta(&mut self, key: WalletKey, delta: Decimal) {
        *self.balances.entry(key).or_insert(Decimal::ZERO) += delta;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WalletKey, &Decimal)> {
        self.balances.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommissionScope {
    /// The platform's cut of the final fare.
    Platform,
    /// The vehicle owner's cut of the distributable amount.
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommissionKind {
    Flat(Decimal),
    Percentage(Decimal),
}

/// Commission rule resolved by (tenant, scope, category, distance slab,
/// effective window).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionRule {
    pub tenant: TenantId,
    pub scope: CommissionScope,
    /// `None` applies to every category.
    pub category: Option<VehicleCategory>,
    pub min_distance_km: Decimal,
    pub max_distance_km: Option<Decimal>,
    pub kind: CommissionKind,
    pub cap: Option<Decimal>,
    pub effective_from: u64,
    pub effective_to: Option<u64>,
}

#[derive(Debug, Clone, Default, Resource)]
pub struct CommissionRules {
    pub rules: Vec<CommissionRule>,
}

impl CommissionRules {
    pub fn resolve(
        &self,
        tenant: TenantId,
        scope: CommissionScope,
        category: VehicleCategory,
        distance_km: Decimal,
        now: u64,
    ) -> Option<&CommissionRule> {
        self.rules
            .iter()
            .filter(|rule| {
                rule.tenant == tenant
                    && rule.scope == scope
                    && rule.category.map_or(true, |c| c == category)
                    && rule.min_distance_km <= distance_km
                    && rule.max_distance_km.map_or(true, |max| distance_km < max)
                    && rule.effective_from <= now
                    && rule.effective_to.map_or(true, |to| now < to)
            })
            .max_by_key(|rule| rule.effective_from)
    }
}
