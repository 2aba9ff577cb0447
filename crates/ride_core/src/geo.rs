//! Geo index: H3-based driver position store with liveness TTLs, plus the
//! notification channel dispatch publishes driver offers on.
//!
//! Positions are written by the driver heartbeat collaborator and read by
//! the dispatch engine. Pings carry an expiry; lapsed pings are invisible to
//! queries and pruned on the next write for the same key.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use bevy_ecs::prelude::{Entity, Resource};
use h3o::CellIndex;
use lru::LruCache;

use crate::ecs::{CityId, TenantId, VehicleCategory};

/// Keys the geo index by dispatchable fleet: one tenant's drivers of one
/// category in one city.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FleetKey {
    pub tenant: TenantId,
    pub city: CityId,
    pub category: VehicleCategory,
}

#[derive(Debug, Clone, Copy)]
struct DriverPing {
    cell: CellIndex,
    expires_at: u64,
}

/// Last known driver positions with short-lived liveness.
#[derive(Debug, Default, Resource)]
pub struct DriverGeoIndex {
    positions: HashMap<FleetKey, HashMap<Entity, DriverPing>>,
}

impl DriverGeoIndex {
    pub fn set_position(
        &mut self,
        key: FleetKey,
        driver: Entity,
        cell: CellIndex,
        ttl_ms: u64,
        now: u64,
    ) {
        let fleet = self.positions.entry(key).or_default();
        fleet.retain(|_, ping| ping.expires_at > now);
        fleet.insert(
            driver,
            DriverPing {
                cell,
                expires_at: now + ttl_ms,
            },
        );
    }

    pub fn remove(&mut self, key: FleetKey, driver: Entity) {
        if let Some(fleet) = self.positions.get_mut(&key) {
            fleet.remove(&driver);
            if fleet.is_empty() {
                self.positions.remove(&key);
            }
        }
    }

    /// Live drivers within `radius_km` of `origin`, ascending by distance,
    /// at most `limit`, excluding `exclude`. Distance ties break on entity
    /// id so results are deterministic.
    pub fn query_nearest(
        &self,
        key: FleetKey,
        origin: CellIndex,
        radius_km: f64,
        limit: usize,
        exclude: &HashSet<Entity>,
        now: u64,
    ) -> Vec<(Entity, f64)> {
        let Some(fleet) = self.positions.get(&key) else {
            return Vec::new();
        };

        let mut hits: Vec<(Entity, f64)> = fleet
            .iter()
            .filter(|(driver, ping)| ping.expires_at > now && !exclude.contains(driver))
            .map(|(driver, ping)| (*driver, distance_km_between_cells(ping.cell, origin)))
            .filter(|(_, distance)| *distance <= radius_km)
            .collect();

        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        hits.truncate(limit);
        hits
    }
}

/// One driver push sent on the geo-index publish channel.
#[derive(Debug, Clone)]
pub struct DriverNotification {
    pub channel: String,
    pub driver: Entity,
    pub trip: Entity,
    pub batch: Entity,
    pub sent_at: u64,
}

/// Records every outbound driver push. A deployment drains this into the
/// geo-index `Publish` channel; tests assert on it directly.
#[derive(Debug, Default, Resource)]
pub struct NotificationOutbox {
    pub notifications: Vec<DriverNotification>,
}

impl NotificationOutbox {
    pub fn publish(&mut self, notification: DriverNotification) {
        self.notifications.push(notification);
    }
}

fn distance_km_between_cells_uncached(a: CellIndex, b: CellIndex) -> f64 {
    let a: h3o::LatLng = a.into();
    let b: h3o::LatLng = b.into();
    let (lat1, lon1) = (a.lat().to_radians(), a.lng().to_radians());
    let (lat2, lon2) = (b.lat().to_radians(), b.lng().to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    6371.0 * c
}

fn get_distance_cache() -> &'static Mutex<LruCache<(CellIndex, CellIndex), f64>> {
    static CACHE: OnceLock<Mutex<LruCache<(CellIndex, CellIndex), f64>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(50_000).expect("cache size must be non-zero"),
        ))
    })
}

/// Haversine distance between two H3 cells with LRU caching.
pub fn distance_km_between_cells(a: CellIndex, b: CellIndex) -> f64 {
    // Symmetric key (smaller cell first) to maximize cache hits
    let key = if a < b { (a, b) } else { (b, a) };

    let mut cache = match get_distance_cache().lock() {
        Ok(guard) => guard,
        Err(_) => return distance_km_between_cells_uncached(key.0, key.1),
    };

    *cache.get_or_insert(key, || distance_km_between_cells_uncached(key.0, key.1))
}
