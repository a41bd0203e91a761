//! Drug catalog collaborator.

use async_trait::async_trait;

use crate::model::DrugId;
use crate::store::StoreResult;

/// Answers whether a drug exists in the externally owned catalog.
///
/// Searches consult the catalog before any spatial work; an unreachable
/// catalog surfaces as `StoreError::Unavailable`.
#[async_trait]
pub trait DrugCatalog: Send + Sync {
    async fn contains(&self, drug_id: DrugId) -> StoreResult<bool>;
}
