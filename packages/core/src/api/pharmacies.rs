//! Pharmacy location registration.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::api::AppState;
use crate::error::LocatorError;
use crate::model::{Coordinate, Pharmacy, PharmacyId, VerificationStatus};

#[derive(Debug, Deserialize)]
pub struct RegisterPharmacyRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub status: Option<VerificationStatus>,
    pub service_radius_km: Option<f64>,
}

/// `PUT /pharmacies/:pharmacy_id`
pub async fn register_pharmacy(
    State(state): State<AppState>,
    Path(pharmacy_id): Path<PharmacyId>,
    Json(body): Json<RegisterPharmacyRequest>,
) -> Result<Json<Pharmacy>, LocatorError> {
    let location = Coordinate::new(body.latitude, body.longitude)?;
    let pharmacy = Pharmacy {
        id: pharmacy_id,
        location,
        status: body.status.unwrap_or(VerificationStatus::Pending),
        service_radius_km: body.service_radius_km,
    };

    state.index.register(state.store.as_ref(), &pharmacy).await?;
    tracing::info!("Pharmacy {} registered at ({}, {})", pharmacy_id, body.latitude, body.longitude);
    Ok(Json(pharmacy))
}

/// `DELETE /pharmacies/:pharmacy_id`
pub async fn remove_pharmacy(
    State(state): State<AppState>,
    Path(pharmacy_id): Path<PharmacyId>,
) -> Result<StatusCode, LocatorError> {
    let existed = state.index.deregister(state.store.as_ref(), pharmacy_id).await?;
    Ok(if existed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    })
}
