use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::api::AppState;
use crate::error::LocatorError;
use crate::model::PharmacyId;
use crate::ratings::RatingAggregate;

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub score: i64,
}

/// `POST /pharmacies/:pharmacy_id/ratings`
pub async fn add_rating(
    State(state): State<AppState>,
    Path(pharmacy_id): Path<PharmacyId>,
    Json(body): Json<RatingRequest>,
) -> Result<Json<RatingAggregate>, LocatorError> {
    let aggregate = state.ratings.add_rating(pharmacy_id, body.score).await?;
    Ok(Json(aggregate))
}
