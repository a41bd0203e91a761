//! Alert records and the transitions published for them

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::inventory::InventoryKey;
use crate::model::{DrugId, PharmacyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    LowStock,
    OutOfStock,
    ExpiringSoon,
    Expired,
    PriceDrop,
}

impl AlertKind {
    /// Kinds that stay open until the engine sees the condition clear.
    pub const STATEFUL: [AlertKind; 4] = [
        AlertKind::OutOfStock,
        AlertKind::LowStock,
        AlertKind::Expired,
        AlertKind::ExpiringSoon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::LowStock => "low_stock",
            AlertKind::OutOfStock => "out_of_stock",
            AlertKind::ExpiringSoon => "expiring_soon",
            AlertKind::Expired => "expired",
            AlertKind::PriceDrop => "price_drop",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low_stock" => Ok(AlertKind::LowStock),
            "out_of_stock" => Ok(AlertKind::OutOfStock),
            "expiring_soon" => Ok(AlertKind::ExpiringSoon),
            "expired" => Ok(AlertKind::Expired),
            "price_drop" => Ok(AlertKind::PriceDrop),
            other => Err(format!("unknown alert kind: {}", other)),
        }
    }
}

/// The value that tripped the alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Trigger {
    Quantity(u32),
    DaysToExpiry(i64),
    Price(Decimal),
}

/// An alert. Never deleted; `resolved_at` is set when the condition clears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub pharmacy_id: PharmacyId,
    pub drug_id: DrugId,
    pub kind: AlertKind,
    pub raised_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub trigger: Trigger,
}

impl Alert {
    pub fn raise(key: InventoryKey, kind: AlertKind, trigger: Trigger, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pharmacy_id: key.pharmacy_id,
            drug_id: key.drug_id,
            kind,
            raised_at: at,
            resolved_at: None,
            trigger,
        }
    }

    pub fn key(&self) -> InventoryKey {
        InventoryKey::new(self.pharmacy_id, self.drug_id)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Raised,
    Cleared,
}

/// Published to the notification collaborator on every Clear<->Raised move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTransition {
    pub pharmacy_id: PharmacyId,
    pub drug_id: DrugId,
    pub kind: AlertKind,
    pub state: AlertState,
    pub timestamp: DateTime<Utc>,
}

impl AlertTransition {
    pub fn of(alert: &Alert, state: AlertState, timestamp: DateTime<Utc>) -> Self {
        Self {
            pharmacy_id: alert.pharmacy_id,
            drug_id: alert.drug_id,
            kind: alert.kind,
            state,
            timestamp,
        }
    }
}

/// Outcome of one periodic sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub evaluated: usize,
    pub raised: usize,
    pub resolved: usize,
    pub failures: Vec<SweepFailure>,
}

#[derive(Debug, Clone)]
pub struct SweepFailure {
    pub key: InventoryKey,
    pub error: String,
}
