//! Derived views over inventory records: price spread, price moves,
//! availability and expiry exposure.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::inventory::types::InventoryRecord;

/// Share of stocking pharmacies that must have the drug on hand for it to
/// count as widely available.
const WIDELY_AVAILABLE_PCT: usize = 70;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceAnalysis {
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub avg_price: Decimal,
    pub median_price: Decimal,
    pub price_spread: Decimal,
    pub pharmacy_count: usize,
    pub below_average: usize,
    pub above_average: usize,
}

impl PriceAnalysis {
    /// `None` for an empty price list.
    pub fn from_prices(prices: &[Decimal]) -> Option<Self> {
        if prices.is_empty() {
            return None;
        }

        let mut sorted = prices.to_vec();
        sorted.sort();

        let min_price = sorted[0];
        let max_price = sorted[sorted.len() - 1];
        let total: Decimal = sorted.iter().sum();
        let avg_price = (total / Decimal::from(sorted.len())).round_dp(2);
        // upper median for even counts
        let median_price = sorted[sorted.len() / 2];

        Some(Self {
            min_price,
            max_price,
            avg_price,
            median_price,
            price_spread: max_price - min_price,
            pharmacy_count: sorted.len(),
            below_average: sorted.iter().filter(|p| **p < avg_price).count(),
            above_average: sorted.iter().filter(|p| **p > avg_price).count(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceDirection {
    Increase,
    Decrease,
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceChange {
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub amount: Decimal,
    /// Relative move in percent, 2 dp. Zero when the old price is zero.
    pub percentage: Decimal,
    pub direction: PriceDirection,
}

impl PriceChange {
    pub fn between(old_price: Decimal, new_price: Decimal) -> Self {
        let amount = new_price - old_price;
        let percentage = if old_price.is_zero() {
            Decimal::ZERO
        } else {
            (amount / old_price * Decimal::ONE_HUNDRED).round_dp(2)
        };
        let direction = if amount > Decimal::ZERO {
            PriceDirection::Increase
        } else if amount < Decimal::ZERO {
            PriceDirection::Decrease
        } else {
            PriceDirection::NoChange
        };

        Self {
            old_price,
            new_price,
            amount,
            percentage,
            direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    NotStocked,
    OutOfStockEverywhere,
    WidelyAvailable,
    LimitedAvailability,
}

impl AvailabilityStatus {
    /// Classify a drug from every record held for it.
    pub fn of(records: &[InventoryRecord]) -> Self {
        if records.is_empty() {
            return AvailabilityStatus::NotStocked;
        }
        let on_hand = records.iter().filter(|r| r.in_stock()).count();
        if on_hand == 0 {
            AvailabilityStatus::OutOfStockEverywhere
        } else if on_hand * 100 >= records.len() * WIDELY_AVAILABLE_PCT {
            AvailabilityStatus::WidelyAvailable
        } else {
            AvailabilityStatus::LimitedAvailability
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpiryBucket {
    pub items: usize,
    pub estimated_loss: Decimal,
}

impl ExpiryBucket {
    fn add(&mut self, record: &InventoryRecord) {
        self.items += 1;
        self.estimated_loss += record.stock_value();
    }
}

/// Stock exposure to expiry at one pharmacy. A record lands in exactly one
/// bucket: expired, within 7 days, or within 30 days.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpiryReport {
    pub expired: ExpiryBucket,
    pub expiring_7_days: ExpiryBucket,
    pub expiring_30_days: ExpiryBucket,
}

impl ExpiryReport {
    pub fn build(records: &[InventoryRecord], today: NaiveDate) -> Self {
        let mut report = ExpiryReport::default();
        for record in records {
            let Some(days) = record.days_until_expiry(today) else {
                continue;
            };
            if days <= 0 {
                report.expired.add(record);
            } else if days <= 7 {
                report.expiring_7_days.add(record);
            } else if days <= 30 {
                report.expiring_30_days.add(record);
            }
        }
        report
    }

    pub fn total_loss(&self) -> Decimal {
        self.expired.estimated_loss + self.expiring_7_days.estimated_loss + self.expiring_30_days.estimated_loss
    }
}
