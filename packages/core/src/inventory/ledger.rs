//! The inventory ledger.
//!
//! Each (pharmacy, drug) key owns a slot behind its own async mutex, so
//! writes to one key are linearized while writes to different keys run
//! independently. The slot map itself sits behind a short-lived std mutex
//! that is never held across an `.await`.
//!
//! Write path, under the key's lock:
//! 1. validate and build the next record
//! 2. persist record (and price-history entry, if the price moved)
//! 3. commit to memory
//! 4. push an [`InventoryChange`] onto the change queue
//!
//! A store failure at step 2 returns `StoreUnavailable` and leaves the
//! in-memory record as it was.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{LocatorError, LocatorResult};
use crate::inventory::analysis::{AvailabilityStatus, ExpiryReport, PriceAnalysis};
use crate::inventory::types::*;
use crate::model::{DrugId, PharmacyId};
use crate::store::LocatorStore;

/// Default reorder threshold for records created without one.
pub const DEFAULT_LOW_STOCK_THRESHOLD: u32 = 10;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub low_stock_default_threshold: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            low_stock_default_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    record: Option<InventoryRecord>,
    /// In-memory price-history window, oldest first.
    history: Vec<PriceHistoryEntry>,
}

type SharedSlot = Arc<AsyncMutex<Slot>>;

pub struct InventoryLedger {
    config: LedgerConfig,
    store: Arc<dyn LocatorStore>,
    slots: Mutex<HashMap<InventoryKey, SharedSlot>>,
    changes: Option<UnboundedSender<InventoryChange>>,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn LocatorStore>, config: LedgerConfig) -> Self {
        Self {
            config,
            store,
            slots: Mutex::new(HashMap::new()),
            changes: None,
        }
    }

    /// Publish every committed change on `sender`.
    pub fn with_change_sender(mut self, sender: UnboundedSender<InventoryChange>) -> Self {
        self.changes = Some(sender);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ---- slot bookkeeping ----

    fn slot(&self, key: InventoryKey) -> SharedSlot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key).or_default().clone()
    }

    /// Drop a slot whose first write failed, unless another writer has
    /// picked it up since.
    fn forget_if_empty(&self, key: InventoryKey, slot: &SharedSlot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let unused = match slots.get(&key) {
            // one reference in the map, one held by the caller
            Some(current) if Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2 => {
                current.try_lock().map(|g| g.record.is_none()).unwrap_or(false)
            }
            _ => false,
        };
        if unused {
            slots.remove(&key);
        }
    }

    fn existing_slot(&self, key: &InventoryKey) -> Option<SharedSlot> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(key).cloned()
    }

    fn slots_matching(&self, keep: impl Fn(&InventoryKey) -> bool) -> Vec<(InventoryKey, SharedSlot)> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<(InventoryKey, SharedSlot)> = slots
            .iter()
            .filter(|(key, _)| keep(key))
            .map(|(key, slot)| (*key, slot.clone()))
            .collect();
        matching.sort_by_key(|(key, _)| *key);
        matching
    }

    async fn records_matching(&self, keep: impl Fn(&InventoryKey) -> bool) -> Vec<InventoryRecord> {
        let mut records = Vec::new();
        for (_, slot) in self.slots_matching(keep) {
            if let Some(record) = slot.lock().await.record.clone() {
                records.push(record);
            }
        }
        records
    }

    fn emit(&self, change: InventoryChange) {
        if let Some(sender) = &self.changes {
            if sender.send(change).is_err() {
                tracing::warn!("Inventory change queue closed; alert evaluation will rely on the sweep");
            }
        }
    }

    // ---- reads ----

    pub async fn get(&self, pharmacy_id: PharmacyId, drug_id: DrugId) -> LocatorResult<InventoryRecord> {
        let key = InventoryKey::new(pharmacy_id, drug_id);
        let slot = self
            .existing_slot(&key)
            .ok_or_else(|| LocatorError::not_found(pharmacy_id, drug_id))?;
        let guard = slot.lock().await;
        guard
            .record
            .clone()
            .ok_or_else(|| LocatorError::not_found(pharmacy_id, drug_id))
    }

    /// Every pharmacy holding a record for the drug, by pharmacy id.
    pub async fn list_by_drug(&self, drug_id: DrugId) -> Vec<(PharmacyId, InventoryRecord)> {
        self.records_matching(|key| key.drug_id == drug_id)
            .await
            .into_iter()
            .map(|record| (record.pharmacy_id, record))
            .collect()
    }

    pub async fn list_by_pharmacy(&self, pharmacy_id: PharmacyId) -> Vec<InventoryRecord> {
        self.records_matching(|key| key.pharmacy_id == pharmacy_id).await
    }

    /// Point-in-time copy of every live record. Each record is read under
    /// its own lock; the set as a whole is not a transactional snapshot.
    pub async fn snapshot(&self) -> Vec<InventoryRecord> {
        self.records_matching(|_| true).await
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// In-memory price history for the key, oldest first. Empty when the
    /// key has never been written.
    pub async fn price_history(&self, pharmacy_id: PharmacyId, drug_id: DrugId) -> Vec<PriceHistoryEntry> {
        match self.existing_slot(&InventoryKey::new(pharmacy_id, drug_id)) {
            Some(slot) => slot.lock().await.history.clone(),
            None => Vec::new(),
        }
    }

    /// Complete price history from the store of record, oldest first.
    pub async fn full_price_history(
        &self,
        pharmacy_id: PharmacyId,
        drug_id: DrugId,
    ) -> LocatorResult<Vec<PriceHistoryEntry>> {
        let history = self
            .store
            .load_price_history(InventoryKey::new(pharmacy_id, drug_id))
            .await?;
        Ok(history)
    }

    // ---- writes ----

    /// Replace quantity, price and expiry for the key, creating the record
    /// if needed.
    pub async fn upsert(
        &self,
        pharmacy_id: PharmacyId,
        drug_id: DrugId,
        quantity: u32,
        price: Decimal,
        expiry_date: Option<NaiveDate>,
    ) -> LocatorResult<InventoryRecord> {
        self.apply(pharmacy_id, drug_id, InventoryUpdate::new(quantity, price, expiry_date))
            .await
    }

    /// Full replacement write. The new record supersedes the old one.
    pub async fn apply(
        &self,
        pharmacy_id: PharmacyId,
        drug_id: DrugId,
        update: InventoryUpdate,
    ) -> LocatorResult<InventoryRecord> {
        validate_price(update.price)?;
        if let Some(cost) = update.cost_price {
            if cost <= Decimal::ZERO {
                return Err(LocatorError::invalid_price("cost price must be positive"));
            }
        }

        let key = InventoryKey::new(pharmacy_id, drug_id);
        let slot = self.slot(key);
        let mut guard = slot.lock().await;

        let now = next_timestamp(&guard);
        let previous = guard.record.clone();
        let reorder_threshold = update
            .reorder_threshold
            .or_else(|| previous.as_ref().map(|r| r.reorder_threshold))
            .unwrap_or(self.config.low_stock_default_threshold);

        let next = InventoryRecord {
            pharmacy_id,
            drug_id,
            quantity: update.quantity,
            price: update.price,
            cost_price: update.cost_price,
            expiry_date: update.expiry_date,
            reorder_threshold,
            last_updated: now,
        };

        let history_entry = match &previous {
            Some(prev) if prev.price == next.price => None,
            _ => Some(PriceHistoryEntry {
                pharmacy_id,
                drug_id,
                price: next.price,
                previous_price: previous.as_ref().map(|p| p.price),
                reason: update.reason.clone(),
                changed_at: now,
            }),
        };

        if let Err(err) = self.store.save_inventory_with_history(&next, history_entry.as_ref()).await {
            drop(guard);
            if previous.is_none() {
                self.forget_if_empty(key, &slot);
            }
            return Err(err.into());
        }

        guard.record = Some(next.clone());
        if let Some(entry) = history_entry {
            guard.history.push(entry);
        }
        drop(guard);

        tracing::debug!(
            "Inventory {}:{} set to qty {} @ {}",
            pharmacy_id,
            drug_id,
            next.quantity,
            next.price
        );

        self.emit(InventoryChange {
            previous,
            current: next.clone(),
            changed_at: now,
        });
        Ok(next)
    }

    /// Read-modify-write of the quantity. A delta that would take stock
    /// below zero is rejected with `NegativeStock`, never clamped.
    pub async fn adjust_quantity(&self, pharmacy_id: PharmacyId, drug_id: DrugId, delta: i64) -> LocatorResult<u32> {
        let key = InventoryKey::new(pharmacy_id, drug_id);
        let slot = self
            .existing_slot(&key)
            .ok_or_else(|| LocatorError::not_found(pharmacy_id, drug_id))?;
        let mut guard = slot.lock().await;

        let current = guard
            .record
            .clone()
            .ok_or_else(|| LocatorError::not_found(pharmacy_id, drug_id))?;

        let target = i64::from(current.quantity)
            .checked_add(delta)
            .ok_or_else(|| LocatorError::invalid_quantity(format!("adjustment of {} overflows", delta)))?;
        if target < 0 {
            return Err(LocatorError::NegativeStock {
                available: current.quantity,
                requested: delta,
            });
        }
        let quantity = u32::try_from(target)
            .map_err(|_| LocatorError::invalid_quantity(format!("quantity {} exceeds the supported maximum", target)))?;

        let now = next_timestamp(&guard);
        let next = InventoryRecord {
            quantity,
            last_updated: now,
            ..current.clone()
        };

        self.store.save_inventory(&next).await?;
        guard.record = Some(next.clone());
        drop(guard);

        self.emit(InventoryChange {
            previous: Some(current),
            current: next,
            changed_at: now,
        });
        Ok(quantity)
    }

    /// Apply one price adjustment to several drugs of a pharmacy. Drugs the
    /// pharmacy does not stock are skipped. Returns how many were updated.
    pub async fn bulk_adjust_price(
        &self,
        pharmacy_id: PharmacyId,
        drug_ids: &[DrugId],
        adjustment: PriceAdjustment,
        reason: &str,
    ) -> LocatorResult<usize> {
        let mut updated = 0;
        for drug_id in drug_ids {
            let current = match self.get(pharmacy_id, *drug_id).await {
                Ok(record) => record,
                Err(LocatorError::NotFound { .. }) => continue,
                Err(err) => return Err(err),
            };

            let update = InventoryUpdate {
                quantity: current.quantity,
                price: adjustment.apply(current.price),
                cost_price: current.cost_price,
                expiry_date: current.expiry_date,
                reorder_threshold: Some(current.reorder_threshold),
                reason: Some(reason.to_string()),
            };
            self.apply(pharmacy_id, *drug_id, update).await?;
            updated += 1;
        }

        tracing::info!(
            "Bulk price update for pharmacy {}: {} of {} items updated",
            pharmacy_id,
            updated,
            drug_ids.len()
        );
        Ok(updated)
    }

    /// Trim each key's in-memory price-history window to its most recent
    /// `max_entries`. The store keeps every entry. Returns how many
    /// entries were dropped from memory.
    pub async fn compact_price_history(&self, max_entries: usize) -> usize {
        let mut dropped = 0;
        for (_, slot) in self.slots_matching(|_| true) {
            let mut guard = slot.lock().await;
            let excess = guard.history.len().saturating_sub(max_entries);
            if excess > 0 {
                guard.history.drain(..excess);
                dropped += excess;
            }
        }
        dropped
    }

    /// Reload every record and its price history from the store of record.
    pub async fn restore(&self) -> LocatorResult<usize> {
        let records = self.store.load_inventory().await?;
        let mut restored = HashMap::with_capacity(records.len());
        for record in records {
            let history = self.store.load_price_history(record.key()).await?;
            restored.insert(
                record.key(),
                Arc::new(AsyncMutex::new(Slot {
                    record: Some(record),
                    history,
                })),
            );
        }

        let count = restored.len();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        *slots = restored;
        tracing::info!("Inventory ledger restored with {} records", count);
        Ok(count)
    }

    // ---- reporting ----

    /// Price spread for a drug across pharmacies that have it in stock.
    pub async fn price_analysis(&self, drug_id: DrugId) -> Option<PriceAnalysis> {
        let prices: Vec<Decimal> = self
            .list_by_drug(drug_id)
            .await
            .into_iter()
            .filter(|(_, record)| record.in_stock())
            .map(|(_, record)| record.price)
            .collect();
        PriceAnalysis::from_prices(&prices)
    }

    pub async fn availability_status(&self, drug_id: DrugId) -> AvailabilityStatus {
        let records: Vec<InventoryRecord> = self
            .list_by_drug(drug_id)
            .await
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        AvailabilityStatus::of(&records)
    }

    pub async fn expiry_report(&self, pharmacy_id: PharmacyId, today: NaiveDate) -> ExpiryReport {
        ExpiryReport::build(&self.list_by_pharmacy(pharmacy_id).await, today)
    }

    /// Sum of `price x quantity` over the pharmacy's records.
    pub async fn inventory_value(&self, pharmacy_id: PharmacyId) -> Decimal {
        self.list_by_pharmacy(pharmacy_id)
            .await
            .iter()
            .map(InventoryRecord::stock_value)
            .sum()
    }
}

fn validate_price(price: Decimal) -> LocatorResult<()> {
    if price <= Decimal::ZERO {
        return Err(LocatorError::invalid_price(format!("price must be positive, got {}", price)));
    }
    Ok(())
}

/// Wall-clock now, never earlier than the slot's last write, so history
/// stays ordered by timestamp even if the clock steps back.
fn next_timestamp(slot: &Slot) -> DateTime<Utc> {
    let now = Utc::now();
    match &slot.record {
        Some(record) if record.last_updated > now => record.last_updated,
        _ => now,
    }
}
