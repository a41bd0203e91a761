//! In-memory spatial index over pharmacy coordinates.
//!
//! The index is a rebuildable cache: the persistence collaborator is the
//! system of record for pharmacy locations, and [`SpatialIndex::rebuild`]
//! reloads everything from it after a restart or suspected corruption.
//!
//! Queries are a linear haversine scan. At city scale (thousands of
//! pharmacies) that is well under a millisecond; the ranking contract is
//! what matters, not the structure behind it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;

use crate::error::{LocatorError, LocatorResult};
use crate::geo::haversine::haversine_km;
use crate::model::{Coordinate, Pharmacy, PharmacyId};
use crate::store::LocatorStore;

/// A pharmacy returned by a spatial query, with its distance from the
/// query point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub pharmacy_id: PharmacyId,
    pub distance_km: f64,
}

/// Pharmacy id -> coordinate map guarded by a single `RwLock`.
///
/// Readers see a consistent snapshot of the whole map for the duration of
/// one query. [`SpatialIndex::register`] and [`SpatialIndex::deregister`]
/// hold a per-id async lock across the store write and the index write, so
/// the index always ends on the location the store kept last.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    entries: RwLock<HashMap<PharmacyId, Coordinate>>,
    write_locks: Mutex<HashMap<PharmacyId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or move a pharmacy.
    pub fn upsert(&self, pharmacy_id: PharmacyId, latitude: f64, longitude: f64) -> LocatorResult<()> {
        let coordinate = Coordinate::new(latitude, longitude)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(pharmacy_id, coordinate);
        Ok(())
    }

    /// Drop a pharmacy. Returns `true` if it was indexed.
    pub fn remove(&self, pharmacy_id: PharmacyId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&pharmacy_id).is_some()
    }

    pub fn location(&self, pharmacy_id: PharmacyId) -> Option<Coordinate> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&pharmacy_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All pharmacies within `radius_km` of the point, nearest first.
    /// Distance ties are broken by ascending pharmacy id.
    pub fn query_radius(&self, latitude: f64, longitude: f64, radius_km: f64) -> LocatorResult<Vec<Neighbor>> {
        let origin = Coordinate::new(latitude, longitude)?;
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(LocatorError::InvalidRadius { radius_km });
        }

        let mut hits = self.scan(&origin, |distance| distance <= radius_km);
        hits.sort_by(compare_neighbors);
        Ok(hits)
    }

    /// The `k` pharmacies nearest to the point, nearest first.
    pub fn k_nearest(&self, latitude: f64, longitude: f64, k: usize) -> LocatorResult<Vec<Neighbor>> {
        let origin = Coordinate::new(latitude, longitude)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits = self.scan(&origin, |_| true);
        hits.sort_by(compare_neighbors);
        hits.truncate(k);
        Ok(hits)
    }

    /// Persist a pharmacy and index its location.
    ///
    /// The store is written first; the index only sees a location once it
    /// is durable.
    pub async fn register(&self, store: &dyn LocatorStore, pharmacy: &Pharmacy) -> LocatorResult<()> {
        let lock = self.write_lock(pharmacy.id);
        let _guard = lock.lock().await;

        store.save_pharmacy(pharmacy).await?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(pharmacy.id, pharmacy.location);
        Ok(())
    }

    /// Delete a pharmacy from the store and the index. Returns `true` if the
    /// store held it.
    pub async fn deregister(&self, store: &dyn LocatorStore, pharmacy_id: PharmacyId) -> LocatorResult<bool> {
        let lock = self.write_lock(pharmacy_id);
        let _guard = lock.lock().await;

        let existed = store.remove_pharmacy(pharmacy_id).await?;
        self.remove(pharmacy_id);
        Ok(existed)
    }

    fn write_lock(&self, pharmacy_id: PharmacyId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(pharmacy_id).or_default().clone()
    }

    /// Replace the whole index with the given pharmacies.
    pub fn replace_all(&self, pharmacies: &[Pharmacy]) {
        let fresh: HashMap<PharmacyId, Coordinate> =
            pharmacies.iter().map(|p| (p.id, p.location)).collect();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        *entries = fresh;
    }

    /// Reload every pharmacy location from the store of record.
    pub async fn rebuild(&self, store: &dyn LocatorStore) -> LocatorResult<usize> {
        let pharmacies = store.load_pharmacies().await?;
        self.replace_all(&pharmacies);
        tracing::info!("Spatial index rebuilt with {} pharmacies", pharmacies.len());
        Ok(pharmacies.len())
    }

    fn scan(&self, origin: &Coordinate, keep: impl Fn(f64) -> bool) -> Vec<Neighbor> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter_map(|(id, coordinate)| {
                let distance_km = haversine_km(origin, coordinate);
                keep(distance_km).then_some(Neighbor {
                    pharmacy_id: *id,
                    distance_km,
                })
            })
            .collect()
    }
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| a.pharmacy_id.cmp(&b.pharmacy_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use uuid::Uuid;

    use crate::model::VerificationStatus;
    use crate::store::MemoryStore;

    fn id(n: u128) -> PharmacyId {
        PharmacyId(Uuid::from_u128(n))
    }

    // Lagos, roughly: Yaba as the query point, others scattered around it.
    const ORIGIN: (f64, f64) = (6.5095, 3.3711);

    fn seeded_index() -> SpatialIndex {
        let index = SpatialIndex::new();
        index.upsert(id(1), 6.5244, 3.3792).unwrap(); // ~1.9 km
        index.upsert(id(2), 6.4281, 3.4219).unwrap(); // ~10.6 km
        index.upsert(id(3), 6.6018, 3.3515).unwrap(); // ~10.4 km
        index.upsert(id(4), 7.3775, 3.9470).unwrap(); // Ibadan, far away
        index
    }

    #[test]
    fn empty_index_returns_empty_results() {
        let index = SpatialIndex::new();
        assert!(index.query_radius(ORIGIN.0, ORIGIN.1, 10.0).unwrap().is_empty());
        assert!(index.k_nearest(ORIGIN.0, ORIGIN.1, 3).unwrap().is_empty());
    }

    #[test]
    fn query_radius_returns_only_pharmacies_inside_radius_nearest_first() {
        let index = seeded_index();
        let hits = index.query_radius(ORIGIN.0, ORIGIN.1, 15.0).unwrap();

        let ids: Vec<PharmacyId> = hits.iter().map(|h| h.pharmacy_id).collect();
        assert_eq!(ids, vec![id(1), id(3), id(2)]);
        assert!(hits.iter().all(|h| h.distance_km <= 15.0));
    }

    #[test]
    fn distance_ties_break_by_pharmacy_id() {
        let index = SpatialIndex::new();
        index.upsert(id(9), 6.5244, 3.3792).unwrap();
        index.upsert(id(5), 6.5244, 3.3792).unwrap();
        index.upsert(id(7), 6.5244, 3.3792).unwrap();

        let hits = index.query_radius(ORIGIN.0, ORIGIN.1, 5.0).unwrap();
        let ids: Vec<PharmacyId> = hits.iter().map(|h| h.pharmacy_id).collect();
        assert_eq!(ids, vec![id(5), id(7), id(9)]);
    }

    #[test]
    fn upsert_moves_an_existing_pharmacy() {
        let index = seeded_index();
        index.upsert(id(4), 6.5100, 3.3700).unwrap();

        assert_eq!(index.len(), 4);
        let nearest = index.k_nearest(ORIGIN.0, ORIGIN.1, 1).unwrap();
        assert_eq!(nearest[0].pharmacy_id, id(4));
    }

    #[test]
    fn remove_drops_pharmacy_from_results() {
        let index = seeded_index();
        assert!(index.remove(id(1)));
        assert!(!index.remove(id(1)));

        let hits = index.query_radius(ORIGIN.0, ORIGIN.1, 15.0).unwrap();
        assert!(hits.iter().all(|h| h.pharmacy_id != id(1)));
    }

    #[test]
    fn k_nearest_truncates_to_k() {
        let index = seeded_index();
        let hits = index.k_nearest(ORIGIN.0, ORIGIN.1, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].pharmacy_id, id(1));
    }

    #[test]
    fn k_nearest_with_k_larger_than_index_returns_everything() {
        let index = seeded_index();
        assert_eq!(index.k_nearest(ORIGIN.0, ORIGIN.1, 50).unwrap().len(), 4);
    }

    #[test]
    fn invalid_coordinates_are_rejected_on_upsert_and_query() {
        let index = SpatialIndex::new();
        assert!(matches!(
            index.upsert(id(1), 91.0, 0.0),
            Err(LocatorError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            index.query_radius(0.0, 181.0, 1.0),
            Err(LocatorError::InvalidCoordinate { .. })
        ));
        assert!(index.k_nearest(-95.0, 0.0, 1).is_err());
    }

    #[test]
    fn negative_radius_is_rejected() {
        let index = seeded_index();
        assert!(matches!(
            index.query_radius(ORIGIN.0, ORIGIN.1, -1.0),
            Err(LocatorError::InvalidRadius { .. })
        ));
    }

    #[tokio::test]
    async fn rebuild_replaces_contents_from_store() {
        let store = MemoryStore::new();
        store
            .save_pharmacy(&Pharmacy {
                id: id(42),
                location: Coordinate::new(6.5244, 3.3792).unwrap(),
                status: VerificationStatus::Verified,
                service_radius_km: None,
            })
            .await
            .unwrap();

        let index = seeded_index();
        let count = index.rebuild(&store).await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(index.len(), 1);
        assert!(index.location(id(42)).is_some());
        assert!(index.location(id(1)).is_none());
    }

    #[tokio::test]
    async fn rebuild_against_offline_store_keeps_existing_entries() {
        let store = MemoryStore::new();
        store.set_offline(true);

        let index = seeded_index();
        let result = index.rebuild(&store).await;

        assert!(matches!(result, Err(LocatorError::StoreUnavailable { .. })));
        assert_eq!(index.len(), 4);
    }

    fn pharmacy(n: u128, latitude: f64, longitude: f64) -> Pharmacy {
        Pharmacy {
            id: id(n),
            location: Coordinate::new(latitude, longitude).unwrap(),
            status: VerificationStatus::Verified,
            service_radius_km: None,
        }
    }

    #[tokio::test]
    async fn register_and_deregister_keep_store_and_index_together() {
        let store = MemoryStore::new();
        let index = SpatialIndex::new();

        index.register(&store, &pharmacy(1, 6.5244, 3.3792)).await.unwrap();
        assert_eq!(index.location(id(1)), Some(Coordinate::new(6.5244, 3.3792).unwrap()));
        assert_eq!(store.load_pharmacies().await.unwrap().len(), 1);

        assert!(index.deregister(&store, id(1)).await.unwrap());
        assert!(!index.deregister(&store, id(1)).await.unwrap());
        assert!(index.is_empty());
        assert!(store.load_pharmacies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_against_offline_store_leaves_index_untouched() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let index = SpatialIndex::new();

        assert!(index.register(&store, &pharmacy(1, 6.5244, 3.3792)).await.is_err());
        assert!(index.location(id(1)).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_moves_end_on_the_stored_location() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(SpatialIndex::new());

        // The first move lands in the store, then stalls before indexing.
        store.set_write_latency(Duration::from_millis(100));
        let slow = {
            let (store, index) = (store.clone(), index.clone());
            tokio::spawn(async move { index.register(store.as_ref(), &pharmacy(1, 1.0, 1.0)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.set_write_latency(Duration::ZERO);
        let fast = {
            let (store, index) = (store.clone(), index.clone());
            tokio::spawn(async move { index.register(store.as_ref(), &pharmacy(1, 2.0, 2.0)).await })
        };

        slow.await.unwrap().unwrap();
        fast.await.unwrap().unwrap();

        let stored = store.load_pharmacies().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].location, Coordinate::new(2.0, 2.0).unwrap());
        assert_eq!(index.location(id(1)), Some(stored[0].location));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn removal_during_a_slow_registration_leaves_nothing_behind() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(SpatialIndex::new());

        store.set_write_latency(Duration::from_millis(100));
        let register = {
            let (store, index) = (store.clone(), index.clone());
            tokio::spawn(async move { index.register(store.as_ref(), &pharmacy(1, 1.0, 1.0)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.set_write_latency(Duration::ZERO);
        let removed = index.deregister(store.as_ref(), id(1)).await.unwrap();

        register.await.unwrap().unwrap();
        assert!(removed);
        assert!(store.load_pharmacies().await.unwrap().is_empty());
        assert!(index.location(id(1)).is_none());
    }

    proptest! {
        #[test]
        fn radius_results_are_sorted_and_within_radius(
            points in prop::collection::vec((-60.0f64..60.0, -170.0f64..170.0), 0..40),
            origin in (-60.0f64..60.0, -170.0f64..170.0),
            radius in 0.0f64..5_000.0,
        ) {
            let index = SpatialIndex::new();
            for (n, (lat, lon)) in points.iter().enumerate() {
                index.upsert(id(n as u128), *lat, *lon).unwrap();
            }

            let hits = index.query_radius(origin.0, origin.1, radius).unwrap();
            let centre = Coordinate::new(origin.0, origin.1).unwrap();

            for pair in hits.windows(2) {
                prop_assert!(pair[0].distance_km <= pair[1].distance_km);
            }
            for hit in &hits {
                let at = index.location(hit.pharmacy_id).unwrap();
                prop_assert!(haversine_km(&centre, &at) <= radius + 1e-9);
            }
        }
    }
}
