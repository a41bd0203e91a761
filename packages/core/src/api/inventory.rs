//! Inventory and price history endpoints.
//!
//! Routes:
//! - `PUT  /inventory/:pharmacy_id/:drug_id`                 replace a record
//! - `POST /inventory/:pharmacy_id/:drug_id/adjust`          apply a stock delta
//! - `GET  /inventory/:pharmacy_id/:drug_id/price-history`   `?full=true` reads the store
//! - `GET  /drugs/:drug_id/price-analysis`

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::LocatorError;
use crate::inventory::{AvailabilityStatus, InventoryRecord, InventoryUpdate, PriceAnalysis, PriceHistoryEntry};
use crate::model::{DrugId, PharmacyId};

#[derive(Debug, Deserialize)]
pub struct UpsertInventoryRequest {
    pub quantity: u32,
    pub price: Decimal,
    pub cost_price: Option<Decimal>,
    pub expiry_date: Option<NaiveDate>,
    pub reorder_threshold: Option<u32>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub delta: i64,
}

#[derive(Debug, Serialize)]
pub struct AdjustResponse {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub full: bool,
}

#[derive(Debug, Serialize)]
pub struct PriceAnalysisResponse {
    pub drug_id: DrugId,
    pub availability: AvailabilityStatus,
    pub analysis: Option<PriceAnalysis>,
}


/// `PUT /inventory/:pharmacy_id/:drug_id`
pub async fn upsert_inventory(
    State(state): State<AppState>,
    Path((pharmacy_id, drug_id)): Path<(PharmacyId, DrugId)>,
    Json(body): Json<UpsertInventoryRequest>,
) -> Result<Json<InventoryRecord>, LocatorError> {
    let update = InventoryUpdate {
        quantity: body.quantity,
        price: body.price,
        cost_price: body.cost_price,
        expiry_date: body.expiry_date,
        reorder_threshold: body.reorder_threshold,
        reason: body.reason,
    };
    let record = state.ledger.apply(pharmacy_id, drug_id, update).await?;
    Ok(Json(record))
}

/// `POST /inventory/:pharmacy_id/:drug_id/adjust`
pub async fn adjust_inventory(
    State(state): State<AppState>,
    Path((pharmacy_id, drug_id)): Path<(PharmacyId, DrugId)>,
    Json(body): Json<AdjustRequest>,
) -> Result<Json<AdjustResponse>, LocatorError> {
    let quantity = state.ledger.adjust_quantity(pharmacy_id, drug_id, body.delta).await?;
    Ok(Json(AdjustResponse { quantity }))
}

/// `GET /inventory/:pharmacy_id/:drug_id/price-history`
pub async fn price_history(
    State(state): State<AppState>,
    Path((pharmacy_id, drug_id)): Path<(PharmacyId, DrugId)>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<PriceHistoryEntry>>, LocatorError> {
    state.ledger.get(pharmacy_id, drug_id).await?;

    let history = if params.full {
        state.ledger.full_price_history(pharmacy_id, drug_id).await?
    } else {
        state.ledger.price_history(pharmacy_id, drug_id).await
    };
    Ok(Json(history))
}

/// `GET /drugs/:drug_id/price-analysis`
pub async fn price_analysis(
    State(state): State<AppState>,
    Path(drug_id): Path<DrugId>,
) -> Json<PriceAnalysisResponse> {
    Json(PriceAnalysisResponse {
        drug_id,
        availability: state.ledger.availability_status(drug_id).await,
        analysis: state.ledger.price_analysis(drug_id).await,
    })
}
