//! Core data types for the inventory ledger

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::{DrugId, PharmacyId};

/// Ledger key: one live record per (pharmacy, drug) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InventoryKey {
    pub pharmacy_id: PharmacyId,
    pub drug_id: DrugId,
}

impl InventoryKey {
    pub fn new(pharmacy_id: PharmacyId, drug_id: DrugId) -> Self {
        Self { pharmacy_id, drug_id }
    }
}

/// Stock, price and expiry of one drug at one pharmacy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub pharmacy_id: PharmacyId,
    pub drug_id: DrugId,
    pub quantity: u32,
    pub price: Decimal,
    pub cost_price: Option<Decimal>,
    pub expiry_date: Option<NaiveDate>,
    pub reorder_threshold: u32,
    pub last_updated: DateTime<Utc>,
}

impl InventoryRecord {
    pub fn key(&self) -> InventoryKey {
        InventoryKey::new(self.pharmacy_id, self.drug_id)
    }

    pub fn in_stock(&self) -> bool {
        self.quantity > 0
    }

    /// Markup over cost as a percentage, when the cost is known.
    pub fn profit_margin(&self) -> Option<Decimal> {
        match self.cost_price {
            Some(cost) if cost > Decimal::ZERO => {
                Some((self.price - cost) / cost * Decimal::ONE_HUNDRED)
            }
            _ => None,
        }
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.map(|expiry| today >= expiry).unwrap_or(false)
    }

    /// Signed days until expiry; negative once past.
    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expiry_date.map(|expiry| (expiry - today).num_days())
    }

    /// `price x quantity`.
    pub fn stock_value(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// One price change. `previous_price` is empty for the record's first price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub pharmacy_id: PharmacyId,
    pub drug_id: DrugId,
    pub price: Decimal,
    pub previous_price: Option<Decimal>,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Full replacement of a record's mutable fields.
///
/// `reorder_threshold: None` keeps the existing threshold, or falls back to
/// the configured default for a new record.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryUpdate {
    pub quantity: u32,
    pub price: Decimal,
    pub cost_price: Option<Decimal>,
    pub expiry_date: Option<NaiveDate>,
    pub reorder_threshold: Option<u32>,
    pub reason: Option<String>,
}

impl InventoryUpdate {
    pub fn new(quantity: u32, price: Decimal, expiry_date: Option<NaiveDate>) -> Self {
        Self {
            quantity,
            price,
            cost_price: None,
            expiry_date,
            reorder_threshold: None,
            reason: None,
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.reorder_threshold = Some(threshold);
        self
    }

    pub fn with_cost_price(mut self, cost_price: Decimal) -> Self {
        self.cost_price = Some(cost_price);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// How a bulk price update moves each price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PriceAdjustment {
    /// Relative change, e.g. `10` for +10%, `-5` for -5%.
    Percentage(Decimal),
    /// Absolute change added to the current price.
    Fixed(Decimal),
}

impl PriceAdjustment {
    /// Lowest price a bulk update may produce.
    pub fn floor() -> Decimal {
        Decimal::new(1, 2)
    }

    pub fn apply(&self, price: Decimal) -> Decimal {
        let adjusted = match self {
            PriceAdjustment::Percentage(pct) => price * (Decimal::ONE + *pct / Decimal::ONE_HUNDRED),
            PriceAdjustment::Fixed(amount) => price + *amount,
        };
        adjusted.max(Self::floor())
    }
}

/// Emitted on the change queue after every committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryChange {
    pub previous: Option<InventoryRecord>,
    pub current: InventoryRecord,
    pub changed_at: DateTime<Utc>,
}

impl InventoryChange {
    pub fn key(&self) -> InventoryKey {
        self.current.key()
    }

    /// `(old, new)` when this change moved the price of an existing record.
    pub fn price_move(&self) -> Option<(Decimal, Decimal)> {
        let previous = self.previous.as_ref()?;
        (previous.price != self.current.price).then_some((previous.price, self.current.price))
    }
}
