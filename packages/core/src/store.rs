//! Persistence collaborator interface.
//!
//! `LocatorStore` is the system of record behind every in-memory component:
//! the ledger, alert engine and rating aggregator write through it before
//! committing in memory, and rebuild from it on startup. The SQLite
//! implementation lives in [`crate::repository`]; [`MemoryStore`] serves
//! tests and local runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::alerts::Alert;
use crate::error::StoreError;
use crate::inventory::{InventoryKey, InventoryRecord, PriceHistoryEntry};
use crate::model::{Drug, DrugId, Pharmacy, PharmacyId};
use crate::ratings::RatingAggregate;
use crate::search::catalog::DrugCatalog;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait LocatorStore: Send + Sync {
    /// Insert or replace the record for its (pharmacy, drug) key.
    async fn save_inventory(&self, record: &InventoryRecord) -> StoreResult<()>;

    async fn load_inventory(&self) -> StoreResult<Vec<InventoryRecord>>;

    /// Insert or replace the record and, when given, append its
    /// price-history entry. Both land or neither does.
    async fn save_inventory_with_history(
        &self,
        record: &InventoryRecord,
        history: Option<&PriceHistoryEntry>,
    ) -> StoreResult<()>;

    /// Every entry for the key, oldest first.
    async fn load_price_history(&self, key: InventoryKey) -> StoreResult<Vec<PriceHistoryEntry>>;

    /// Insert or replace an alert by id.
    async fn save_alert(&self, alert: &Alert) -> StoreResult<()>;

    async fn load_alerts(&self) -> StoreResult<Vec<Alert>>;

    async fn save_rating(&self, aggregate: &RatingAggregate) -> StoreResult<()>;

    async fn load_ratings(&self) -> StoreResult<Vec<RatingAggregate>>;

    async fn save_pharmacy(&self, pharmacy: &Pharmacy) -> StoreResult<()>;

    async fn remove_pharmacy(&self, pharmacy_id: PharmacyId) -> StoreResult<bool>;

    async fn load_pharmacies(&self) -> StoreResult<Vec<Pharmacy>>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    inventory: BTreeMap<InventoryKey, InventoryRecord>,
    price_history: BTreeMap<InventoryKey, Vec<PriceHistoryEntry>>,
    alerts: Vec<Alert>,
    alert_positions: HashMap<Uuid, usize>,
    ratings: BTreeMap<PharmacyId, RatingAggregate>,
    pharmacies: BTreeMap<PharmacyId, Pharmacy>,
    drugs: BTreeMap<DrugId, Drug>,
}

/// In-memory store with an offline switch for exercising failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
    offline: AtomicBool,
    reject_history: AtomicBool,
    write_latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While set, any inventory write that carries a price-history entry
    /// fails with `StoreError::Unavailable` and writes nothing.
    pub fn set_reject_history(&self, reject: bool) {
        self.reject_history.store(reject, Ordering::SeqCst);
    }

    /// Delay applied after each committed write, before the call returns.
    pub fn set_write_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.write_latency_ms.store(millis, Ordering::SeqCst);
    }

    pub fn add_drug(&self, drug: Drug) {
        self.with_tables(|t| {
            t.drugs.insert(drug.id, drug);
        });
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }

    async fn settle(&self) {
        let millis = self.write_latency_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    /// Apply a write under the table lock, then wait out the write latency.
    async fn write<T>(&self, f: impl FnOnce(&mut MemoryTables) -> T) -> StoreResult<T> {
        let out = self.online(f)?;
        self.settle().await;
        Ok(out)
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut MemoryTables) -> T) -> T {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tables)
    }

    fn online<T>(&self, f: impl FnOnce(&mut MemoryTables) -> T) -> StoreResult<T> {
        self.check_online()?;
        Ok(self.with_tables(f))
    }
}

#[async_trait]
impl LocatorStore for MemoryStore {
    async fn save_inventory(&self, record: &InventoryRecord) -> StoreResult<()> {
        self.write(|t| {
            t.inventory.insert(record.key(), record.clone());
        })
        .await
    }

    async fn save_inventory_with_history(
        &self,
        record: &InventoryRecord,
        history: Option<&PriceHistoryEntry>,
    ) -> StoreResult<()> {
        if history.is_some() && self.reject_history.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("price history writes rejected".to_string()));
        }
        self.write(|t| {
            t.inventory.insert(record.key(), record.clone());
            if let Some(entry) = history {
                t.price_history.entry(record.key()).or_default().push(entry.clone());
            }
        })
        .await
    }

    async fn load_inventory(&self) -> StoreResult<Vec<InventoryRecord>> {
        self.online(|t| t.inventory.values().cloned().collect())
    }

    async fn load_price_history(&self, key: InventoryKey) -> StoreResult<Vec<PriceHistoryEntry>> {
        self.online(|t| t.price_history.get(&key).cloned().unwrap_or_default())
    }

    async fn save_alert(&self, alert: &Alert) -> StoreResult<()> {
        self.write(|t| {
            if let Some(pos) = t.alert_positions.get(&alert.id).copied() {
                t.alerts[pos] = alert.clone();
            } else {
                t.alert_positions.insert(alert.id, t.alerts.len());
                t.alerts.push(alert.clone());
            }
        })
        .await
    }

    async fn load_alerts(&self) -> StoreResult<Vec<Alert>> {
        self.online(|t| t.alerts.clone())
    }

    async fn save_rating(&self, aggregate: &RatingAggregate) -> StoreResult<()> {
        self.write(|t| {
            t.ratings.insert(aggregate.pharmacy_id, aggregate.clone());
        })
        .await
    }

    async fn load_ratings(&self) -> StoreResult<Vec<RatingAggregate>> {
        self.online(|t| t.ratings.values().cloned().collect())
    }

    async fn save_pharmacy(&self, pharmacy: &Pharmacy) -> StoreResult<()> {
        self.write(|t| {
            t.pharmacies.insert(pharmacy.id, pharmacy.clone());
        })
        .await
    }

    async fn remove_pharmacy(&self, pharmacy_id: PharmacyId) -> StoreResult<bool> {
        self.write(|t| t.pharmacies.remove(&pharmacy_id).is_some()).await
    }

    async fn load_pharmacies(&self) -> StoreResult<Vec<Pharmacy>> {
        self.online(|t| t.pharmacies.values().cloned().collect())
    }
}

#[async_trait]
impl DrugCatalog for MemoryStore {
    async fn contains(&self, drug_id: DrugId) -> StoreResult<bool> {
        self.online(|t| t.drugs.contains_key(&drug_id))
    }
}
