//! SQLite-backed store of record.
//!
//! All SQL lives here. Ids are stored as UUID text, prices as decimal text
//! and timestamps as RFC 3339 text. A row that does not parse back into its
//! domain type is reported as `StoreError::Corrupt` rather than skipped.

use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::alerts::{Alert, AlertKind, Trigger};
use crate::error::StoreError;
use crate::inventory::{InventoryKey, InventoryRecord, PriceHistoryEntry};
use crate::model::{Coordinate, Drug, DrugId, Pharmacy, PharmacyId, VerificationStatus};
use crate::ratings::RatingAggregate;
use crate::search::catalog::DrugCatalog;
use crate::store::{LocatorStore, StoreResult};

pub struct SqliteRepository {
    pool: SqlitePool,
}

fn parse<T>(column: &str, raw: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|err| StoreError::Corrupt(format!("column {} holds {:?}: {}", column, raw, err)))
}

fn parse_opt<T>(column: &str, raw: Option<String>) -> StoreResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    raw.map(|value| parse(column, &value)).transpose()
}

fn parse_ts(column: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("column {} holds {:?}: {}", column, raw, err)))
}

fn parse_ts_opt(column: &str, raw: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    raw.map(|value| parse_ts(column, &value)).transpose()
}

fn to_u32(column: &str, raw: i64) -> StoreResult<u32> {
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("column {} out of range: {}", column, raw)))
}

fn inventory_from_row(row: &SqliteRow) -> StoreResult<InventoryRecord> {
    Ok(InventoryRecord {
        pharmacy_id: parse("pharmacy_id", &row.try_get::<String, _>("pharmacy_id")?)?,
        drug_id: parse("drug_id", &row.try_get::<String, _>("drug_id")?)?,
        quantity: to_u32("quantity", row.try_get("quantity")?)?,
        price: parse("price", &row.try_get::<String, _>("price")?)?,
        cost_price: parse_opt("cost_price", row.try_get("cost_price")?)?,
        expiry_date: parse_opt::<NaiveDate>("expiry_date", row.try_get("expiry_date")?)?,
        reorder_threshold: to_u32("reorder_threshold", row.try_get("reorder_threshold")?)?,
        last_updated: parse_ts("last_updated", &row.try_get::<String, _>("last_updated")?)?,
    })
}

fn history_from_row(row: &SqliteRow) -> StoreResult<PriceHistoryEntry> {
    Ok(PriceHistoryEntry {
        pharmacy_id: parse("pharmacy_id", &row.try_get::<String, _>("pharmacy_id")?)?,
        drug_id: parse("drug_id", &row.try_get::<String, _>("drug_id")?)?,
        price: parse("price", &row.try_get::<String, _>("price")?)?,
        previous_price: parse_opt("previous_price", row.try_get("previous_price")?)?,
        reason: row.try_get("reason")?,
        changed_at: parse_ts("changed_at", &row.try_get::<String, _>("changed_at")?)?,
    })
}

fn alert_from_row(row: &SqliteRow) -> StoreResult<Alert> {
    let trigger_raw: String = row.try_get("trigger_value")?;
    let trigger: Trigger = serde_json::from_str(&trigger_raw)
        .map_err(|err| StoreError::Corrupt(format!("column trigger_value holds {:?}: {}", trigger_raw, err)))?;

    Ok(Alert {
        id: parse::<Uuid>("id", &row.try_get::<String, _>("id")?)?,
        pharmacy_id: parse("pharmacy_id", &row.try_get::<String, _>("pharmacy_id")?)?,
        drug_id: parse("drug_id", &row.try_get::<String, _>("drug_id")?)?,
        kind: parse::<AlertKind>("kind", &row.try_get::<String, _>("kind")?)?,
        raised_at: parse_ts("raised_at", &row.try_get::<String, _>("raised_at")?)?,
        resolved_at: parse_ts_opt("resolved_at", row.try_get("resolved_at")?)?,
        trigger,
    })
}

fn rating_from_row(row: &SqliteRow) -> StoreResult<RatingAggregate> {
    let count: i64 = row.try_get("count")?;
    Ok(RatingAggregate {
        pharmacy_id: parse("pharmacy_id", &row.try_get::<String, _>("pharmacy_id")?)?,
        mean: row.try_get("mean")?,
        count: u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative rating count {}", count)))?,
        sum: row.try_get("sum")?,
        updated_at: parse_ts_opt("updated_at", row.try_get("updated_at")?)?,
    })
}

fn pharmacy_from_row(row: &SqliteRow) -> StoreResult<Pharmacy> {
    let latitude: f64 = row.try_get("latitude")?;
    let longitude: f64 = row.try_get("longitude")?;
    let location = Coordinate::new(latitude, longitude).map_err(|err| StoreError::Corrupt(err.to_string()))?;

    Ok(Pharmacy {
        id: parse("id", &row.try_get::<String, _>("id")?)?,
        location,
        status: parse::<VerificationStatus>("status", &row.try_get::<String, _>("status")?)?,
        service_radius_km: row.try_get("service_radius_km")?,
    })
}

async fn upsert_inventory_row(conn: &mut SqliteConnection, record: &InventoryRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO inventory_records
         (pharmacy_id, drug_id, quantity, price, cost_price, expiry_date, reorder_threshold, last_updated)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (pharmacy_id, drug_id) DO UPDATE SET
            quantity = excluded.quantity,
            price = excluded.price,
            cost_price = excluded.cost_price,
            expiry_date = excluded.expiry_date,
            reorder_threshold = excluded.reorder_threshold,
            last_updated = excluded.last_updated",
    )
    .bind(record.pharmacy_id.to_string())
    .bind(record.drug_id.to_string())
    .bind(i64::from(record.quantity))
    .bind(record.price.to_string())
    .bind(record.cost_price.map(|c| c.to_string()))
    .bind(record.expiry_date.map(|d| d.to_string()))
    .bind(i64::from(record.reorder_threshold))
    .bind(record.last_updated.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_history_row(conn: &mut SqliteConnection, entry: &PriceHistoryEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO price_history (pharmacy_id, drug_id, price, previous_price, reason, changed_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.pharmacy_id.to_string())
    .bind(entry.drug_id.to_string())
    .bind(entry.price.to_string())
    .bind(entry.previous_price.map(|p| p.to_string()))
    .bind(entry.reason.clone())
    .bind(entry.changed_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a drug in the local catalog mirror.
    pub async fn insert_drug(&self, drug: &Drug) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO drugs (id, category_id, name) VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET category_id = excluded.category_id, name = excluded.name",
        )
        .bind(drug.id.to_string())
        .bind(drug.category_id.map(|c| c.to_string()))
        .bind(&drug.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LocatorStore for SqliteRepository {
    async fn save_inventory(&self, record: &InventoryRecord) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_inventory_row(&mut conn, record).await?;
        Ok(())
    }

    async fn save_inventory_with_history(
        &self,
        record: &InventoryRecord,
        history: Option<&PriceHistoryEntry>,
    ) -> StoreResult<()> {
        // dropping the transaction without commit rolls the record back
        let mut tx = self.pool.begin().await?;
        upsert_inventory_row(&mut tx, record).await?;
        if let Some(entry) = history {
            insert_history_row(&mut tx, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_inventory(&self) -> StoreResult<Vec<InventoryRecord>> {
        let rows = sqlx::query(
            "SELECT pharmacy_id, drug_id, quantity, price, cost_price, expiry_date, reorder_threshold, last_updated
             FROM inventory_records
             ORDER BY pharmacy_id, drug_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(inventory_from_row).collect()
    }

    async fn load_price_history(&self, key: InventoryKey) -> StoreResult<Vec<PriceHistoryEntry>> {
        // rowid order is append order, which the ledger keeps in timestamp order
        let rows = sqlx::query(
            "SELECT pharmacy_id, drug_id, price, previous_price, reason, changed_at
             FROM price_history
             WHERE pharmacy_id = ? AND drug_id = ?
             ORDER BY id ASC",
        )
        .bind(key.pharmacy_id.to_string())
        .bind(key.drug_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(history_from_row).collect()
    }

    async fn save_alert(&self, alert: &Alert) -> StoreResult<()> {
        let trigger = serde_json::to_string(&alert.trigger)
            .map_err(|err| StoreError::Corrupt(format!("unserializable trigger: {}", err)))?;

        sqlx::query(
            "INSERT INTO alerts (id, pharmacy_id, drug_id, kind, raised_at, resolved_at, trigger_value)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                resolved_at = excluded.resolved_at,
                trigger_value = excluded.trigger_value",
        )
        .bind(alert.id.to_string())
        .bind(alert.pharmacy_id.to_string())
        .bind(alert.drug_id.to_string())
        .bind(alert.kind.as_str())
        .bind(alert.raised_at.to_rfc3339())
        .bind(alert.resolved_at.map(|ts| ts.to_rfc3339()))
        .bind(trigger)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_alerts(&self) -> StoreResult<Vec<Alert>> {
        let rows = sqlx::query(
            "SELECT id, pharmacy_id, drug_id, kind, raised_at, resolved_at, trigger_value
             FROM alerts
             ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(alert_from_row).collect()
    }

    async fn save_rating(&self, aggregate: &RatingAggregate) -> StoreResult<()> {
        let count = i64::try_from(aggregate.count)
            .map_err(|_| StoreError::Corrupt(format!("rating count {} too large", aggregate.count)))?;

        sqlx::query(
            "INSERT INTO rating_aggregates (pharmacy_id, mean, count, sum, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (pharmacy_id) DO UPDATE SET
                mean = excluded.mean,
                count = excluded.count,
                sum = excluded.sum,
                updated_at = excluded.updated_at",
        )
        .bind(aggregate.pharmacy_id.to_string())
        .bind(aggregate.mean)
        .bind(count)
        .bind(aggregate.sum)
        .bind(aggregate.updated_at.map(|ts| ts.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_ratings(&self) -> StoreResult<Vec<RatingAggregate>> {
        let rows = sqlx::query("SELECT pharmacy_id, mean, count, sum, updated_at FROM rating_aggregates")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(rating_from_row).collect()
    }

    async fn save_pharmacy(&self, pharmacy: &Pharmacy) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO pharmacies (id, latitude, longitude, status, service_radius_km)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                status = excluded.status,
                service_radius_km = excluded.service_radius_km",
        )
        .bind(pharmacy.id.to_string())
        .bind(pharmacy.location.latitude())
        .bind(pharmacy.location.longitude())
        .bind(pharmacy.status.as_str())
        .bind(pharmacy.service_radius_km)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_pharmacy(&self, pharmacy_id: PharmacyId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM pharmacies WHERE id = ?")
            .bind(pharmacy_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_pharmacies(&self) -> StoreResult<Vec<Pharmacy>> {
        let rows = sqlx::query("SELECT id, latitude, longitude, status, service_radius_km FROM pharmacies")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(pharmacy_from_row).collect()
    }
}

#[async_trait]
impl DrugCatalog for SqliteRepository {
    async fn contains(&self, drug_id: DrugId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM drugs WHERE id = ?")
            .bind(drug_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("cnt")?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::db::create_pool;

    async fn make_repo() -> SqliteRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        SqliteRepository::new(pool)
    }

    fn make_record() -> InventoryRecord {
        InventoryRecord {
            pharmacy_id: PharmacyId::new(),
            drug_id: DrugId::new(),
            quantity: 12,
            price: Decimal::new(1250, 2),
            cost_price: Some(Decimal::new(900, 2)),
            expiry_date: NaiveDate::from_ymd_opt(2027, 1, 31),
            reorder_threshold: 5,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn inventory_upsert_replaces_existing_row() {
        let repo = make_repo().await;
        let mut record = make_record();
        repo.save_inventory(&record).await.unwrap();

        record.quantity = 3;
        record.price = Decimal::new(1100, 2);
        record.cost_price = None;
        repo.save_inventory(&record).await.unwrap();

        let loaded = repo.load_inventory().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].quantity, 3);
        assert_eq!(loaded[0].price, Decimal::new(1100, 2));
        assert_eq!(loaded[0].cost_price, None);
        assert_eq!(loaded[0].expiry_date, record.expiry_date);
    }

    fn history_entry(record: &InventoryRecord, previous: Option<Decimal>) -> PriceHistoryEntry {
        PriceHistoryEntry {
            pharmacy_id: record.pharmacy_id,
            drug_id: record.drug_id,
            price: record.price,
            previous_price: previous,
            reason: None,
            changed_at: record.last_updated,
        }
    }

    #[tokio::test]
    async fn price_history_comes_back_oldest_first() {
        let repo = make_repo().await;
        let mut record = make_record();
        let start = Utc::now() - Duration::minutes(10);

        let prices = [(10, None), (12, Some(10)), (9, Some(12))];
        for (i, (price, previous)) in prices.iter().enumerate() {
            record.price = Decimal::from(*price);
            record.last_updated = start + Duration::minutes(i as i64);
            let mut entry = history_entry(&record, previous.map(Decimal::from));
            entry.reason = (i == 2).then(|| "Clearance".to_string());
            repo.save_inventory_with_history(&record, Some(&entry)).await.unwrap();
        }

        let history = repo.load_price_history(record.key()).await.unwrap();
        let got: Vec<Decimal> = history.iter().map(|e| e.price).collect();
        assert_eq!(got, vec![Decimal::from(10), Decimal::from(12), Decimal::from(9)]);
        assert_eq!(history[1].previous_price, Some(Decimal::from(10)));
        assert_eq!(history[2].reason.as_deref(), Some("Clearance"));
        assert_eq!(repo.load_inventory().await.unwrap()[0].price, Decimal::from(9));

        let other = InventoryKey::new(record.pharmacy_id, DrugId::new());
        assert!(repo.load_price_history(other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_history_insert_rolls_back_record() {
        let repo = make_repo().await;
        let mut record = make_record();
        repo.save_inventory_with_history(&record, Some(&history_entry(&record, None)))
            .await
            .unwrap();

        sqlx::query("DROP TABLE price_history").execute(repo.pool()).await.unwrap();

        let old_price = record.price;
        record.price = Decimal::new(2000, 2);
        let entry = history_entry(&record, Some(old_price));
        assert!(repo.save_inventory_with_history(&record, Some(&entry)).await.is_err());

        let loaded = repo.load_inventory().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].price, old_price);
    }

    #[tokio::test]
    async fn alert_save_is_an_upsert_by_id() {
        let repo = make_repo().await;
        let record = make_record();
        let mut alert = Alert::raise(record.key(), AlertKind::LowStock, Trigger::Quantity(3), Utc::now());
        repo.save_alert(&alert).await.unwrap();

        alert.trigger = Trigger::Quantity(1);
        alert.resolved_at = Some(Utc::now());
        repo.save_alert(&alert).await.unwrap();

        let loaded = repo.load_alerts().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, alert.id);
        assert_eq!(loaded[0].kind, AlertKind::LowStock);
        assert_eq!(loaded[0].trigger, Trigger::Quantity(1));
        assert!(loaded[0].is_resolved());
    }

    #[tokio::test]
    async fn price_trigger_survives_storage() {
        let repo = make_repo().await;
        let record = make_record();
        let alert = Alert::raise(
            record.key(),
            AlertKind::PriceDrop,
            Trigger::Price(Decimal::new(799, 2)),
            Utc::now(),
        );
        repo.save_alert(&alert).await.unwrap();

        let loaded = repo.load_alerts().await.unwrap();
        assert_eq!(loaded[0].trigger, Trigger::Price(Decimal::new(799, 2)));
    }

    #[tokio::test]
    async fn rating_aggregate_is_replaced_per_pharmacy() {
        let repo = make_repo().await;
        let pharmacy = PharmacyId::new();
        let mut agg = RatingAggregate::empty(pharmacy);
        agg.count = 2;
        agg.sum = 9.0;
        agg.mean = 4.5;
        agg.updated_at = Some(Utc::now());
        repo.save_rating(&agg).await.unwrap();

        agg.count = 3;
        repo.save_rating(&agg).await.unwrap();

        let loaded = repo.load_ratings().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].count, 3);
        assert_eq!(loaded[0].mean, 4.5);
    }

    #[tokio::test]
    async fn pharmacy_save_and_remove() {
        let repo = make_repo().await;
        let pharmacy = Pharmacy {
            id: PharmacyId::new(),
            location: Coordinate::new(6.5244, 3.3792).unwrap(),
            status: VerificationStatus::Verified,
            service_radius_km: Some(8.0),
        };
        repo.save_pharmacy(&pharmacy).await.unwrap();

        assert_eq!(repo.load_pharmacies().await.unwrap(), vec![pharmacy.clone()]);
        assert!(repo.remove_pharmacy(pharmacy.id).await.unwrap());
        assert!(!repo.remove_pharmacy(pharmacy.id).await.unwrap());
        assert!(repo.load_pharmacies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn catalog_lookup_reads_drugs_table() {
        let repo = make_repo().await;
        let drug = Drug {
            id: DrugId::new(),
            category_id: Some(Uuid::new_v4()),
            name: "Ibuprofen 200mg".into(),
        };
        repo.insert_drug(&drug).await.unwrap();

        assert!(repo.contains(drug.id).await.unwrap());
        assert!(!repo.contains(DrugId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn unparsable_row_is_reported_corrupt() {
        let repo = make_repo().await;
        sqlx::query(
            "INSERT INTO inventory_records
             (pharmacy_id, drug_id, quantity, price, reorder_threshold, last_updated)
             VALUES ('not-a-uuid', 'x', 1, '1.00', 1, 'yesterday')",
        )
        .execute(repo.pool())
        .await
        .unwrap();

        assert!(matches!(repo.load_inventory().await, Err(StoreError::Corrupt(_))));
    }
}
