//! Alert trigger rules.
//!
//! Pure functions over a single record: no locks, no I/O. The engine
//! reconciles their output against the open alerts for the key.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::alerts::engine::AlertConfig;
use crate::alerts::types::{AlertKind, Trigger};
use crate::error::{LocatorError, LocatorResult};
use crate::inventory::{InventoryChange, InventoryRecord};

/// The stateful alerts that should be open for `record` on `today`.
///
/// At most one of OutOfStock/LowStock and at most one of
/// Expired/ExpiringSoon is returned.
pub fn expected_alerts(
    record: &InventoryRecord,
    today: NaiveDate,
    config: &AlertConfig,
) -> LocatorResult<Vec<(AlertKind, Trigger)>> {
    if record.price <= Decimal::ZERO {
        return Err(LocatorError::corrupt(format!(
            "record {}:{} has non-positive price {}",
            record.pharmacy_id, record.drug_id, record.price
        )));
    }

    let mut expected = Vec::with_capacity(2);

    if record.quantity == 0 {
        expected.push((AlertKind::OutOfStock, Trigger::Quantity(0)));
    } else if record.quantity <= record.reorder_threshold {
        expected.push((AlertKind::LowStock, Trigger::Quantity(record.quantity)));
    }

    if let Some(days) = record.days_until_expiry(today) {
        if record.is_expired(today) {
            expected.push((AlertKind::Expired, Trigger::DaysToExpiry(days)));
        } else if record.in_stock() && days <= config.expiring_soon_window_days {
            expected.push((AlertKind::ExpiringSoon, Trigger::DaysToExpiry(days)));
        }
    }

    Ok(expected)
}

/// The new price, when `change` cut the price by more than the configured
/// fraction of the old one.
pub fn price_drop(change: &InventoryChange, config: &AlertConfig) -> Option<Trigger> {
    let (old, new) = change.price_move()?;
    if old <= Decimal::ZERO || new >= old {
        return None;
    }
    let drop = (old - new) / old;
    (drop > config.price_drop_pct).then_some(Trigger::Price(new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::model::{DrugId, PharmacyId};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()
    }

    fn record(quantity: u32, threshold: u32, expiry: Option<NaiveDate>) -> InventoryRecord {
        InventoryRecord {
            pharmacy_id: PharmacyId::new(),
            drug_id: DrugId::new(),
            quantity,
            price: Decimal::from(10),
            cost_price: None,
            expiry_date: expiry,
            reorder_threshold: threshold,
            last_updated: Utc::now(),
        }
    }

    fn kinds(r: &InventoryRecord) -> Vec<AlertKind> {
        expected_alerts(r, today(), &AlertConfig::default())
            .unwrap()
            .into_iter()
            .map(|(kind, _)| kind)
            .collect()
    }

    fn in_days(days: i64) -> Option<NaiveDate> {
        Some(today() + chrono::Duration::days(days))
    }

    #[test]
    fn empty_shelf_is_out_of_stock_only() {
        assert_eq!(kinds(&record(0, 5, None)), vec![AlertKind::OutOfStock]);
    }

    #[test]
    fn quantity_at_or_below_threshold_is_low_stock() {
        assert_eq!(kinds(&record(3, 5, None)), vec![AlertKind::LowStock]);
        assert_eq!(kinds(&record(5, 5, None)), vec![AlertKind::LowStock]);
        assert!(kinds(&record(6, 5, None)).is_empty());
    }

    #[test]
    fn expiring_soon_inside_window_with_stock() {
        assert_eq!(kinds(&record(50, 5, in_days(30))), vec![AlertKind::ExpiringSoon]);
        assert!(kinds(&record(50, 5, in_days(31))).is_empty());
    }

    #[test]
    fn expiring_soon_needs_stock() {
        assert_eq!(kinds(&record(0, 5, in_days(3))), vec![AlertKind::OutOfStock]);
    }

    #[test]
    fn expired_supersedes_expiring_soon_and_ignores_quantity() {
        assert_eq!(kinds(&record(50, 5, in_days(0))), vec![AlertKind::Expired]);
        assert_eq!(
            kinds(&record(0, 5, in_days(-2))),
            vec![AlertKind::OutOfStock, AlertKind::Expired]
        );
    }

    #[test]
    fn non_positive_price_is_corrupt() {
        let mut r = record(5, 5, None);
        r.price = Decimal::ZERO;
        assert!(matches!(
            expected_alerts(&r, today(), &AlertConfig::default()),
            Err(LocatorError::CorruptRecord { .. })
        ));
    }

    fn change(old: i64, new: i64) -> InventoryChange {
        let mut before = record(5, 1, None);
        before.price = Decimal::from(old);
        let mut after = before.clone();
        after.price = Decimal::from(new);
        InventoryChange {
            previous: Some(before),
            current: after,
            changed_at: Utc::now(),
        }
    }

    #[test]
    fn price_drop_must_exceed_threshold() {
        let config = AlertConfig::default();
        assert_eq!(price_drop(&change(100, 89), &config), Some(Trigger::Price(Decimal::from(89))));
        assert_eq!(price_drop(&change(100, 90), &config), None);
        assert_eq!(price_drop(&change(100, 120), &config), None);
    }

    #[test]
    fn first_price_is_never_a_drop() {
        let mut c = change(100, 50);
        c.previous = None;
        assert_eq!(price_drop(&c, &AlertConfig::default()), None);
    }
}
