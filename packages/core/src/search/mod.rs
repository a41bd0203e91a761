//! Drug availability search.
//!
//! [`AvailabilitySearch`] combines the spatial index, the inventory ledger
//! and the rating aggregator to answer "who near me has drug D, and at what
//! price". Searches only read; they never take a write lock.

pub mod catalog;
pub mod engine;

pub use catalog::DrugCatalog;
pub use engine::{AvailabilitySearch, SearchHit, SearchRequest};
