//! Ranked availability search and price comparison.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::error::{LocatorError, LocatorResult};
use crate::geo::SpatialIndex;
use crate::inventory::InventoryLedger;
use crate::model::{Coordinate, DrugId, PharmacyId};
use crate::ratings::RatingAggregator;
use crate::search::catalog::DrugCatalog;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub drug_id: DrugId,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    /// Zero or negative yields an empty result.
    pub max_results: i64,
    pub max_price: Option<Decimal>,
    pub min_rating: Option<f64>,
}

impl SearchRequest {
    pub fn new(drug_id: DrugId, latitude: f64, longitude: f64, radius_km: f64, max_results: i64) -> Self {
        Self {
            drug_id,
            latitude,
            longitude,
            radius_km,
            max_results,
            max_price: None,
            min_rating: None,
        }
    }

    pub fn with_max_price(mut self, max_price: Decimal) -> Self {
        self.max_price = Some(max_price);
        self
    }

    pub fn with_min_rating(mut self, min_rating: f64) -> Self {
        self.min_rating = Some(min_rating);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub pharmacy_id: PharmacyId,
    pub distance_km: f64,
    pub price: Decimal,
    pub quantity: u32,
    pub rating: f64,
    pub rating_count: u64,
}

/// Distance, then price, then rating (higher first), then id.
fn rank(a: &SearchHit, b: &SearchHit) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| a.price.cmp(&b.price))
        .then_with(|| b.rating.total_cmp(&a.rating))
        .then_with(|| a.pharmacy_id.cmp(&b.pharmacy_id))
}

pub struct AvailabilitySearch {
    index: Arc<SpatialIndex>,
    ledger: Arc<InventoryLedger>,
    ratings: Arc<RatingAggregator>,
    catalog: Arc<dyn DrugCatalog>,
}

impl AvailabilitySearch {
    pub fn new(
        index: Arc<SpatialIndex>,
        ledger: Arc<InventoryLedger>,
        ratings: Arc<RatingAggregator>,
        catalog: Arc<dyn DrugCatalog>,
    ) -> Self {
        Self {
            index,
            ledger,
            ratings,
            catalog,
        }
    }

    /// Pharmacies within `radius_km` that have the drug on hand, ranked.
    pub async fn find(
        &self,
        drug_id: DrugId,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        max_results: i64,
    ) -> LocatorResult<Vec<SearchHit>> {
        self.find_with(SearchRequest::new(drug_id, latitude, longitude, radius_km, max_results))
            .await
    }

    /// [`find`](Self::find) with optional price and rating filters.
    ///
    /// Dropping the returned future abandons the search at the next
    /// candidate; nothing is written, so there is nothing to undo.
    pub async fn find_with(&self, request: SearchRequest) -> LocatorResult<Vec<SearchHit>> {
        if !request.radius_km.is_finite() || request.radius_km <= 0.0 {
            return Err(LocatorError::InvalidRadius {
                radius_km: request.radius_km,
            });
        }
        Coordinate::new(request.latitude, request.longitude)?;

        if request.max_results <= 0 {
            return Ok(Vec::new());
        }

        if !self.catalog.contains(request.drug_id).await? {
            return Err(LocatorError::DrugNotFound(request.drug_id));
        }

        let candidates = self
            .index
            .query_radius(request.latitude, request.longitude, request.radius_km)?;

        let mut hits = Vec::new();
        for neighbor in candidates {
            let record = match self.ledger.get(neighbor.pharmacy_id, request.drug_id).await {
                Ok(record) if record.in_stock() => record,
                Ok(_) | Err(LocatorError::NotFound { .. }) => continue,
                Err(err) => return Err(err),
            };
            if request.max_price.is_some_and(|max| record.price > max) {
                continue;
            }

            let rating = self.ratings.get(neighbor.pharmacy_id).await;
            if request.min_rating.is_some_and(|min| rating.mean < min) {
                continue;
            }

            hits.push(SearchHit {
                pharmacy_id: neighbor.pharmacy_id,
                distance_km: neighbor.distance_km,
                price: record.price,
                quantity: record.quantity,
                rating: rating.mean,
                rating_count: rating.count,
            });
        }

        hits.sort_by(rank);
        hits.truncate(usize::try_from(request.max_results).unwrap_or(usize::MAX));

        tracing::debug!(
            "Search for {} within {} km returned {} hits",
            request.drug_id,
            request.radius_km,
            hits.len()
        );
        Ok(hits)
    }

    /// Price of the drug at each listed pharmacy that holds a record for it.
    /// Pharmacies without a record are left out, not reported as errors.
    pub async fn compare_price(
        &self,
        drug_id: DrugId,
        pharmacy_ids: &[PharmacyId],
    ) -> LocatorResult<BTreeMap<PharmacyId, Decimal>> {
        let unique: BTreeSet<PharmacyId> = pharmacy_ids.iter().copied().collect();

        let mut lookups = JoinSet::new();
        for pharmacy_id in unique {
            let ledger = self.ledger.clone();
            lookups.spawn(async move { (pharmacy_id, ledger.get(pharmacy_id, drug_id).await) });
        }

        let mut prices = BTreeMap::new();
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((pharmacy_id, Ok(record))) => {
                    prices.insert(pharmacy_id, record.price);
                }
                Ok((_, Err(LocatorError::NotFound { .. }))) => {}
                Ok((_, Err(err))) => return Err(err),
                Err(err) => {
                    tracing::error!("Price lookup task failed: {}", err);
                }
            }
        }
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::inventory::LedgerConfig;
    use crate::model::Drug;
    use crate::store::MemoryStore;

    // Ikeja, Lagos
    const LAT: f64 = 6.6018;
    const LON: f64 = 3.3515;

    struct World {
        store: Arc<MemoryStore>,
        index: Arc<SpatialIndex>,
        ledger: Arc<InventoryLedger>,
        ratings: Arc<RatingAggregator>,
        search: AvailabilitySearch,
        drug: DrugId,
    }

    fn world() -> World {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(SpatialIndex::new());
        let ledger = Arc::new(InventoryLedger::new(store.clone(), LedgerConfig::default()));
        let ratings = Arc::new(RatingAggregator::new(store.clone()));
        let search = AvailabilitySearch::new(index.clone(), ledger.clone(), ratings.clone(), store.clone());

        let drug = DrugId::new();
        store.add_drug(Drug {
            id: drug,
            category_id: None,
            name: "Paracetamol 500mg".into(),
        });

        World {
            store,
            index,
            ledger,
            ratings,
            search,
            drug,
        }
    }

    impl World {
        async fn pharmacy(&self, lat: f64, lon: f64, quantity: u32, price: i64, scores: &[i64]) -> PharmacyId {
            let id = PharmacyId::new();
            self.index.upsert(id, lat, lon).unwrap();
            self.ledger
                .upsert(id, self.drug, quantity, Decimal::from(price), None)
                .await
                .unwrap();
            for s in scores {
                self.ratings.add_rating(id, *s).await.unwrap();
            }
            id
        }
    }

    #[tokio::test]
    async fn equal_distance_cheaper_pharmacy_ranks_first() {
        let w = world();
        // both ~2 km north of the query point
        let a = w.pharmacy(LAT + 0.018, LON, 5, 10, &[4]).await;
        let b = w.pharmacy(LAT + 0.018, LON, 5, 8, &[5, 4]).await;

        let hits = w.search.find(w.drug, LAT, LON, 5.0, 10).await.unwrap();

        let order: Vec<PharmacyId> = hits.iter().map(|h| h.pharmacy_id).collect();
        assert_eq!(order, vec![b, a]);
        assert_eq!(hits[0].rating, 4.5);
        assert_eq!(hits[0].rating_count, 2);
    }

    #[tokio::test]
    async fn equal_distance_and_price_prefers_higher_rating() {
        let w = world();
        let low = w.pharmacy(LAT, LON + 0.01, 5, 10, &[3]).await;
        let high = w.pharmacy(LAT, LON + 0.01, 5, 10, &[5]).await;

        let hits = w.search.find(w.drug, LAT, LON, 5.0, 10).await.unwrap();
        assert_eq!(hits[0].pharmacy_id, high);
        assert_eq!(hits[1].pharmacy_id, low);
    }

    #[tokio::test]
    async fn nearer_beats_cheaper() {
        let w = world();
        let far_cheap = w.pharmacy(LAT + 0.03, LON, 5, 1, &[]).await;
        let near_dear = w.pharmacy(LAT + 0.01, LON, 5, 50, &[]).await;

        let hits = w.search.find(w.drug, LAT, LON, 10.0, 10).await.unwrap();
        let order: Vec<PharmacyId> = hits.iter().map(|h| h.pharmacy_id).collect();
        assert_eq!(order, vec![near_dear, far_cheap]);
        assert!(hits.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
    }

    #[tokio::test]
    async fn out_of_stock_and_out_of_range_are_excluded() {
        let w = world();
        w.pharmacy(LAT + 0.01, LON, 0, 5, &[]).await;
        w.pharmacy(LAT + 1.0, LON, 5, 5, &[]).await;
        let ok = w.pharmacy(LAT + 0.02, LON, 3, 5, &[]).await;

        let hits = w.search.find(w.drug, LAT, LON, 5.0, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pharmacy_id, ok);
        assert_eq!(hits[0].quantity, 3);
    }

    #[tokio::test]
    async fn zero_radius_is_invalid() {
        let w = world();
        assert!(matches!(
            w.search.find(w.drug, LAT, LON, 0.0, 10).await,
            Err(LocatorError::InvalidRadius { .. })
        ));
        assert!(w.search.find(w.drug, LAT, LON, -3.0, 10).await.is_err());
    }

    #[tokio::test]
    async fn bad_coordinate_is_rejected() {
        let w = world();
        assert!(matches!(
            w.search.find(w.drug, 91.0, LON, 5.0, 10).await,
            Err(LocatorError::InvalidCoordinate { .. })
        ));
    }

    #[tokio::test]
    async fn no_stocking_pharmacy_is_an_empty_result() {
        let w = world();
        let other = w.pharmacy(LAT, LON, 5, 5, &[]).await;
        w.index.remove(other);

        assert!(w.search.find(w.drug, LAT, LON, 5.0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_positive_limit_returns_empty_without_catalog_lookup() {
        let w = world();
        w.pharmacy(LAT, LON, 5, 5, &[]).await;
        w.store.set_offline(true);

        assert!(w.search.find(w.drug, LAT, LON, 5.0, 0).await.unwrap().is_empty());
        assert!(w.search.find(w.drug, LAT, LON, 5.0, -4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_drug_fails_before_spatial_work() {
        let w = world();
        let unknown = DrugId::new();
        assert_eq!(
            w.search.find(unknown, LAT, LON, 5.0, 10).await,
            Err(LocatorError::DrugNotFound(unknown))
        );
    }

    #[tokio::test]
    async fn unreachable_catalog_fails_fast() {
        let w = world();
        w.pharmacy(LAT, LON, 5, 5, &[]).await;
        w.store.set_offline(true);

        assert!(matches!(
            w.search.find(w.drug, LAT, LON, 5.0, 10).await,
            Err(LocatorError::StoreUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn results_are_truncated_to_limit() {
        let w = world();
        for i in 0..5 {
            w.pharmacy(LAT + 0.001 * f64::from(i), LON, 5, 5, &[]).await;
        }
        assert_eq!(w.search.find(w.drug, LAT, LON, 5.0, 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn filters_drop_expensive_and_poorly_rated() {
        let w = world();
        w.pharmacy(LAT, LON + 0.001, 5, 30, &[5]).await;
        w.pharmacy(LAT, LON + 0.002, 5, 10, &[1]).await;
        let good = w.pharmacy(LAT, LON + 0.003, 5, 12, &[4]).await;

        let request = SearchRequest::new(w.drug, LAT, LON, 5.0, 10)
            .with_max_price(Decimal::from(20))
            .with_min_rating(3.0);
        let hits = w.search.find_with(request).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pharmacy_id, good);
    }

    #[tokio::test]
    async fn compare_price_skips_pharmacies_without_the_drug() {
        let w = world();
        let a = w.pharmacy(LAT, LON, 5, 10, &[]).await;
        let b = w.pharmacy(LAT, LON, 0, 7, &[]).await;
        let missing = PharmacyId::new();

        let prices = w.search.compare_price(w.drug, &[a, b, missing, a]).await.unwrap();

        assert_eq!(prices.len(), 2);
        assert_eq!(prices[&a], Decimal::from(10));
        assert_eq!(prices[&b], Decimal::from(7));
    }
}
