//! HTTP request layer.
//!
//! [`router`] assembles every route over one shared [`AppState`]. Handlers
//! return [`LocatorError`](crate::error::LocatorError) directly; its
//! `IntoResponse` impl picks the status code.

pub mod alerts;
pub mod health;
pub mod inventory;
pub mod pharmacies;
pub mod ratings;
pub mod search;

use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::alerts::AlertEngine;
use crate::geo::SpatialIndex;
use crate::inventory::InventoryLedger;
use crate::metrics::AppMetrics;
use crate::ratings::RatingAggregator;
use crate::search::AvailabilitySearch;
use crate::store::LocatorStore;

#[derive(Clone)]
pub struct AppState {
    pub search: Arc<AvailabilitySearch>,
    pub index: Arc<SpatialIndex>,
    pub store: Arc<dyn LocatorStore>,
    pub ledger: Arc<InventoryLedger>,
    pub ratings: Arc<RatingAggregator>,
    pub alerts: Arc<AlertEngine>,
    pub metrics: Arc<AppMetrics>,
}

pub fn router(state: AppState) -> Router {
    let metrics = state.metrics.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route(
            "/metrics",
            get(move || {
                let m = metrics.clone();
                async move { render_metrics(&m) }
            }),
        )
        .route("/search", get(search::search))
        .route("/prices/compare", post(search::compare_prices))
        .route("/inventory/:pharmacy_id/:drug_id", put(inventory::upsert_inventory))
        .route("/inventory/:pharmacy_id/:drug_id/adjust", post(inventory::adjust_inventory))
        .route("/inventory/:pharmacy_id/:drug_id/price-history", get(inventory::price_history))
        .route("/drugs/:drug_id/price-analysis", get(inventory::price_analysis))
        .route(
            "/pharmacies/:pharmacy_id",
            put(pharmacies::register_pharmacy).delete(pharmacies::remove_pharmacy),
        )
        .route("/pharmacies/:pharmacy_id/ratings", post(ratings::add_rating))
        .route("/alerts", get(alerts::list_alerts))
        .route_layer(middleware::from_fn_with_state(state.metrics.clone(), track_requests))
        .layer(cors)
        .with_state(state)
}

fn render_metrics(metrics: &AppMetrics) -> Response {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metrics render failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics error").into_response()
        }
    }
}

/// Count and time every routed request, labelled by its route template.
async fn track_requests(State(metrics): State<Arc<AppMetrics>>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let timer = metrics.http_request_duration.start_timer();
    let response = next.run(request).await;
    timer.observe_duration();

    metrics
        .http_requests_total
        .with_label_values(&[&method, &path, response.status().as_str()])
        .inc();
    response
}
