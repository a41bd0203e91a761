//! Running pharmacy ratings.
//!
//! Each incoming score is folded into the pharmacy's aggregate with the
//! incremental mean `mean' = mean + (score - mean) / count'`, so the steady
//! state never rescans review history. [`RatingAggregator::rebuild`] is the
//! recovery path when an aggregate must be recomputed from raw scores.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{LocatorError, LocatorResult};
use crate::model::PharmacyId;
use crate::store::LocatorStore;

pub const MIN_SCORE: i64 = 1;
pub const MAX_SCORE: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingAggregate {
    pub pharmacy_id: PharmacyId,
    pub mean: f64,
    pub count: u64,
    pub sum: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RatingAggregate {
    /// The aggregate of a pharmacy nobody has rated yet.
    pub fn empty(pharmacy_id: PharmacyId) -> Self {
        Self {
            pharmacy_id,
            mean: 0.0,
            count: 0,
            sum: 0.0,
            updated_at: None,
        }
    }

    fn fold(&mut self, score: f64, at: DateTime<Utc>) {
        self.count += 1;
        self.sum += score;
        self.mean += (score - self.mean) / self.count as f64;
        self.updated_at = Some(at);
    }
}

/// Extension point for time-decayed ratings.
///
/// Called on the current aggregate before each new score is folded in.
pub trait RatingDecay: Send + Sync {
    fn apply(&self, aggregate: &mut RatingAggregate, now: DateTime<Utc>);
}

/// Scores never lose weight.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDecay;

impl RatingDecay for NoDecay {
    fn apply(&self, _aggregate: &mut RatingAggregate, _now: DateTime<Utc>) {}
}

pub struct RatingAggregator {
    store: Arc<dyn LocatorStore>,
    decay: Box<dyn RatingDecay>,
    aggregates: RwLock<HashMap<PharmacyId, RatingAggregate>>,
}

fn validate_score(score: i64) -> LocatorResult<f64> {
    if (MIN_SCORE..=MAX_SCORE).contains(&score) {
        Ok(score as f64)
    } else {
        Err(LocatorError::InvalidScore(score))
    }
}

impl RatingAggregator {
    pub fn new(store: Arc<dyn LocatorStore>) -> Self {
        Self::with_decay(store, Box::new(NoDecay))
    }

    pub fn with_decay(store: Arc<dyn LocatorStore>, decay: Box<dyn RatingDecay>) -> Self {
        Self {
            store,
            decay,
            aggregates: RwLock::new(HashMap::new()),
        }
    }

    /// Fold one score into the pharmacy's aggregate.
    ///
    /// The write lock is held across the store write so two ratings for
    /// the same pharmacy cannot interleave.
    pub async fn add_rating(&self, pharmacy_id: PharmacyId, score: i64) -> LocatorResult<RatingAggregate> {
        let score = validate_score(score)?;
        let now = Utc::now();

        let mut aggregates = self.aggregates.write().await;
        let mut next = aggregates
            .get(&pharmacy_id)
            .cloned()
            .unwrap_or_else(|| RatingAggregate::empty(pharmacy_id));
        self.decay.apply(&mut next, now);
        next.fold(score, now);

        self.store.save_rating(&next).await?;
        aggregates.insert(pharmacy_id, next.clone());

        tracing::debug!(
            "Rating for {} now {:.2} over {} scores",
            pharmacy_id,
            next.mean,
            next.count
        );
        Ok(next)
    }

    /// Current aggregate; count 0 and mean 0 if the pharmacy is unrated.
    pub async fn get(&self, pharmacy_id: PharmacyId) -> RatingAggregate {
        self.aggregates
            .read()
            .await
            .get(&pharmacy_id)
            .cloned()
            .unwrap_or_else(|| RatingAggregate::empty(pharmacy_id))
    }

    /// Recompute a pharmacy's aggregate from its complete score list.
    pub async fn rebuild(&self, pharmacy_id: PharmacyId, all_scores: &[i64]) -> LocatorResult<RatingAggregate> {
        let now = Utc::now();
        let mut rebuilt = RatingAggregate::empty(pharmacy_id);
        for score in all_scores {
            rebuilt.fold(validate_score(*score)?, now);
        }

        let mut aggregates = self.aggregates.write().await;
        self.store.save_rating(&rebuilt).await?;
        aggregates.insert(pharmacy_id, rebuilt.clone());

        tracing::info!(
            "Rebuilt rating for {} from {} scores",
            pharmacy_id,
            rebuilt.count
        );
        Ok(rebuilt)
    }

    /// Reload every aggregate from the store of record.
    pub async fn restore(&self) -> LocatorResult<usize> {
        let loaded = self.store.load_ratings().await?;
        let mut aggregates = self.aggregates.write().await;
        aggregates.clear();
        for aggregate in loaded {
            aggregates.insert(aggregate.pharmacy_id, aggregate);
        }
        Ok(aggregates.len())
    }
}
