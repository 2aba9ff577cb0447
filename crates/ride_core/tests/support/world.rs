#![allow(dead_code)]

use std::sync::Once;

use bevy_ecs::prelude::{Entity, World};
use h3o::CellIndex;
use ride_core::clock::PlatformClock;
use ride_core::dispatch::DispatchConfig;
use ride_core::ecs::{
    CityId, Currency, Driver, DriverRuntimeStatus, FleetOwnerId, Owner, Rider, TenantId, Vehicle,
    VehicleCategory, VehicleId,
};
use ride_core::geo::{DriverGeoIndex, FleetKey, NotificationOutbox};
use ride_core::otp::OtpConfig;
use ride_core::pricing::{Coupon, CouponBook, RateCard, RateRule, SurgeZone, SurgeZones};
use ride_core::settlement::{
    CommissionKind, CommissionRule, CommissionRules, CommissionScope, FinancialLedger, Wallets,
};
use ride_core::telemetry::PlatformTelemetry;
use ride_core::trip::RideAsk;
use rust_decimal_macros::dec;

pub const TENANT: TenantId = TenantId(1);
pub const CITY: CityId = CityId(7);
pub const POSITION_TTL_MS: u64 = 60 * 60 * 1_000;

/// Resolution-9 pickup anchor. Tier geometry in the dispatch tests depends
/// on res-9 ring spacing; `fixture_rings_match_the_tier_radii` pins it.
pub fn seed_cell() -> CellIndex {
    CellIndex::try_from(0x8928308280fffff).expect("cell")
}

/// A cell exactly `k` rings away from `origin`. At resolution 9 one ring is
/// roughly 0.26-0.30 km center to center.
pub fn cell_at_ring(origin: CellIndex, k: u32) -> CellIndex {
    origin
        .grid_disk::<Vec<_>>(k)
        .into_iter()
        .find(|c| origin.grid_distance(*c).ok() == Some(k as i32))
        .expect("ring cell")
}

pub fn default_rate_rule() -> RateRule {
    RateRule {
        tenant: TENANT,
        city: CITY,
        category: VehicleCategory::Sedan,
        currency: Currency::Inr,
        base_fare: dec!(50),
        per_km: dec!(10),
        per_minute: dec!(2),
        tax_percent: dec!(5),
        effective_from: 0,
        effective_to: None,
    }
}

pub fn commission_rule(scope: CommissionScope, kind: CommissionKind) -> CommissionRule {
    CommissionRule {
        tenant: TENANT,
        scope,
        category: None,
        min_distance_km: dec!(0),
        max_distance_km: None,
        kind,
        cap: None,
        effective_from: 0,
        effective_to: None,
    }
}

/// Populates a world with every shared resource the engines read, using a
/// single-tenant setup: one rate rule, 20% platform / 75% owner commissions,
/// default dispatch tiers.
pub struct TestWorldBuilder {
    rates: RateCard,
    surges: SurgeZones,
    coupons: CouponBook,
    commissions: CommissionRules,
    dispatch: DispatchConfig,
}

impl Default for TestWorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorldBuilder {
    pub fn new() -> Self {
        Self {
            rates: RateCard {
                rules: vec![default_rate_rule()],
            },
            surges: SurgeZones::default(),
            coupons: CouponBook::default(),
            commissions: CommissionRules {
                rules: vec![
                    commission_rule(
                        CommissionScope::Platform,
                        CommissionKind::Percentage(dec!(20)),
                    ),
                    commission_rule(CommissionScope::Owner, CommissionKind::Percentage(dec!(75))),
                ],
            },
            dispatch: DispatchConfig::default(),
        }
    }

    pub fn with_rate_rule(mut self, rule: RateRule) -> Self {
        self.rates.rules.push(rule);
        self
    }

    pub fn with_surge_zone(mut self, zone: SurgeZone) -> Self {
        self.surges.zones.push(zone);
        self
    }

    pub fn with_coupon(mut self, coupon: Coupon) -> Self {
        self.coupons.coupons.push(coupon);
        self
    }

    pub fn with_commission_rules(mut self, rules: Vec<CommissionRule>) -> Self {
        self.commissions = CommissionRules { rules };
        self
    }

    pub fn with_dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    pub fn build(self) -> World {
        init_tracing();
        let mut world = World::new();
        world.insert_resource(PlatformClock::default());
        world.insert_resource(PlatformTelemetry::default());
        world.insert_resource(DriverGeoIndex::default());
        world.insert_resource(NotificationOutbox::default());
        world.insert_resource(OtpConfig::default());
        world.insert_resource(self.dispatch);
        world.insert_resource(self.rates);
        world.insert_resource(self.surges);
        world.insert_resource(self.coupons);
        world.insert_resource(self.commissions);
        world.insert_resource(FinancialLedger::default());
        world.insert_resource(Wallets::default());
        world
    }
}

/// Opt-in engine logs for tests, e.g. `RUST_LOG=ride_core=debug`.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn fleet_key() -> FleetKey {
    FleetKey {
        tenant: TENANT,
        city: CITY,
        category: VehicleCategory::Sedan,
    }
}

pub fn register_position(world: &mut World, driver: Entity, cell: CellIndex) {
    let now = world.resource::<PlatformClock>().now();
    world.resource_mut::<DriverGeoIndex>().set_position(
        fleet_key(),
        driver,
        cell,
        POSITION_TTL_MS,
        now,
    );
}

/// An available owner-driver with a sedan, registered in the geo index.
pub fn spawn_driver(world: &mut World, vehicle_id: u64, cell: CellIndex) -> Entity {
    let entity = world
        .spawn(Driver {
            tenant: TENANT,
            city: CITY,
            status: DriverRuntimeStatus::Available,
            active_trip: None,
        })
        .id();
    world.entity_mut(entity).insert(Vehicle {
        id: VehicleId(vehicle_id),
        category: VehicleCategory::Sedan,
        owner: Owner::Driver(entity),
    });
    register_position(world, entity, cell);
    entity
}

/// Like [spawn_driver], but the vehicle belongs to a fleet.
pub fn spawn_fleet_driver(
    world: &mut World,
    vehicle_id: u64,
    cell: CellIndex,
    fleet: FleetOwnerId,
) -> Entity {
    let entity = world
        .spawn(Driver {
            tenant: TENANT,
            city: CITY,
            status: DriverRuntimeStatus::Available,
            active_trip: None,
        })
        .id();
    world.entity_mut(entity).insert(Vehicle {
        id: VehicleId(vehicle_id),
        category: VehicleCategory::Sedan,
        owner: Owner::Fleet(fleet),
    });
    register_position(world, entity, cell);
    entity
}

pub fn spawn_rider(world: &mut World) -> Entity {
    world.spawn(Rider).id()
}

pub fn ride_ask(rider: Entity, pickup: CellIndex, dropoff: CellIndex) -> RideAsk {
    RideAsk {
        rider,
        tenant: TENANT,
        city: CITY,
        category: VehicleCategory::Sedan,
        pickup,
        dropoff,
        pickup_address: "12 MG Road".to_string(),
        dropoff_address: "Terminal 2, Airport Road".to_string(),
    }
}
