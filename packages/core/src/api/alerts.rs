//! Alert listing.
//!
//! `GET /alerts?pharmacy_id=<uuid>&unresolved=true`. Both filters are
//! optional; without them every alert ever raised is returned, oldest
//! first.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::alerts::Alert;
use crate::api::AppState;
use crate::model::PharmacyId;

#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    pub pharmacy_id: Option<PharmacyId>,
    #[serde(default)]
    pub unresolved: bool,
}

pub async fn list_alerts(State(state): State<AppState>, Query(query): Query<AlertQuery>) -> Json<Vec<Alert>> {
    let alerts = match (query.pharmacy_id, query.unresolved) {
        (Some(pharmacy_id), only_open) => state
            .alerts
            .alerts_for(pharmacy_id)
            .await
            .into_iter()
            .filter(|a| !only_open || !a.is_resolved())
            .collect(),
        (None, true) => state.alerts.unresolved().await,
        (None, false) => state.alerts.all().await,
    };
    Json(alerts)
}
