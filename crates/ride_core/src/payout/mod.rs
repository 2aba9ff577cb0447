//! Payouts: periodic disbursement of positive wallet balances.
//!
//! A batch snapshots who is owed what; executing it posts the payout debits
//! and drains the wallets. Execution is idempotent under a caller-supplied
//! key so a retried disbursement job cannot pay anyone twice.

pub mod engine;

use bevy_ecs::prelude::{Component, Entity};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::ecs::{Currency, TenantId};
use crate::settlement::WalletParty;

pub use engine::{create_batch, execute_batch};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayoutError {
    #[error("payout batch {0:?} not found")]
    BatchNotFound(Entity),
    #[error("payout batch {batch:?} was already executed under a different key")]
    KeyConflict { batch: Entity },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutItemStatus {
    Pending,
    Paid,
    /// Left for the next batch; one bad item never blocks the rest.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutItem {
    pub party: WalletParty,
    pub amount: Decimal,
    pub status: PayoutItemStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutBatchStatus {
    Pending,
    Completed,
}

/// A snapshot of owed balances for one tenant and currency over a period.
/// Item amounts are frozen at creation; balances keep moving underneath.
#[derive(Debug, Clone, Component)]
pub struct PayoutBatch {
    pub tenant: TenantId,
    pub currency: Currency,
    pub period_start: u64,
    pub period_end: u64,
    pub items: Vec<PayoutItem>,
    pub total_amount: Decimal,
    pub status: PayoutBatchStatus,
    pub idempotency_key: Option<String>,
    pub created_at: u64,
    pub executed_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutSummary {
    pub batch: Entity,
    pub paid: usize,
    pub failed: usize,
    pub total_paid: Decimal,
}
