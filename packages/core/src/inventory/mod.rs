//! Per-pharmacy, per-drug stock ledger.
//!
//! The ledger is the only writer of [`InventoryRecord`]s. Every mutation is
//! persisted through the store first, then committed in memory, then
//! announced as an [`InventoryChange`] on the change queue.

pub mod analysis;
pub mod ledger;
pub mod types;

pub use analysis::{AvailabilityStatus, ExpiryBucket, ExpiryReport, PriceAnalysis, PriceChange, PriceDirection};
pub use ledger::{InventoryLedger, LedgerConfig};
pub use types::*;
