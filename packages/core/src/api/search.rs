//! Search and price comparison endpoints.
//!
//! Routes:
//! - `GET  /search?drug_id&lat&lon&radius_km&limit&max_price&min_rating`
//! - `POST /prices/compare` with `{drug_id, pharmacy_ids}`

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::LocatorError;
use crate::model::{DrugId, PharmacyId};
use crate::search::{SearchHit, SearchRequest};

pub const DEFAULT_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub drug_id: DrugId,
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
    pub limit: Option<i64>,
    pub max_price: Option<Decimal>,
    pub min_rating: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub drug_id: DrugId,
    pub count: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub drug_id: DrugId,
    pub pharmacy_ids: Vec<PharmacyId>,
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub drug_id: DrugId,
    pub prices: BTreeMap<PharmacyId, Decimal>,
}

/// `GET /search`. A negative `limit` behaves like zero.
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, LocatorError> {
    state.metrics.searches_total.inc();

    let mut request = SearchRequest::new(
        params.drug_id,
        params.lat,
        params.lon,
        params.radius_km,
        params.limit.unwrap_or(DEFAULT_LIMIT),
    );
    request.max_price = params.max_price;
    request.min_rating = params.min_rating;

    let results = state.search.find_with(request).await.map_err(|err| {
        state.metrics.search_errors_total.inc();
        err
    })?;

    Ok(Json(SearchResponse {
        drug_id: params.drug_id,
        count: results.len(),
        results,
    }))
}

/// `POST /prices/compare`
pub async fn compare_prices(
    State(state): State<AppState>,
    Json(body): Json<CompareRequest>,
) -> Result<Json<CompareResponse>, LocatorError> {
    let prices = state.search.compare_price(body.drug_id, &body.pharmacy_ids).await?;
    Ok(Json(CompareResponse {
        drug_id: body.drug_id,
        prices,
    }))
}
