//! Change-queue consumer.
//!
//! Drains [`InventoryChange`] events from the ledger and feeds them to the
//! alert engine, so a ledger write never waits on alert derivation.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::alerts::engine::AlertEngine;
use crate::alerts::types::AlertState;
use crate::inventory::InventoryChange;
use crate::metrics::AppMetrics;

/// Consume change events until every sender is dropped.
pub async fn run_change_consumer(
    engine: Arc<AlertEngine>,
    mut changes: UnboundedReceiver<InventoryChange>,
    metrics: Arc<AppMetrics>,
) {
    tracing::info!("Alert change consumer started");

    while let Some(change) = changes.recv().await {
        handle_change(&engine, &change, &metrics).await;
    }

    tracing::info!("Change queue closed. Alert change consumer stopped");
}

/// Process one event. Extracted for testability.
async fn handle_change(engine: &AlertEngine, change: &InventoryChange, metrics: &AppMetrics) {
    match engine.on_change(change, Utc::now().date_naive()).await {
        Ok(transitions) => {
            for t in &transitions {
                match t.state {
                    AlertState::Raised => metrics.alerts_raised_total.inc(),
                    AlertState::Cleared => metrics.alerts_resolved_total.inc(),
                }
            }
        }
        Err(err) => {
            // the next sweep re-evaluates this key
            tracing::warn!(
                "Alert evaluation failed for {}:{}: {}",
                change.current.pharmacy_id,
                change.current.drug_id,
                err
            );
        }
    }
}
