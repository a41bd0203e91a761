//! Periodic alert sweep.
//!
//! Write-driven evaluation misses conditions that become true with the
//! passage of time, such as a batch reaching its expiry date. The sweep
//! re-evaluates every ledger record on a fixed interval and, when price
//! history retention is configured, compacts the in-memory history window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::signal;
use tokio::time;

use crate::alerts::{AlertEngine, SweepReport};
use crate::inventory::InventoryLedger;
use crate::metrics::AppMetrics;

/// Run the sweep loop until `Ctrl+C` (SIGINT) is received.
///
/// A failing record never stops the loop; its error is logged and counted
/// in `sweep_failures_total`.
pub async fn run_alert_sweep(
    engine: Arc<AlertEngine>,
    ledger: Arc<InventoryLedger>,
    metrics: Arc<AppMetrics>,
    interval_seconds: u64,
    history_retention: Option<usize>,
) {
    let mut interval = time::interval(Duration::from_secs(interval_seconds));

    tracing::info!("Alert sweep started (interval: {}s)", interval_seconds);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep_once(&engine, &ledger, &metrics, history_retention, Utc::now().date_naive()).await;
            }

            _ = signal::ctrl_c() => {
                tracing::info!("Shutdown signal received. Stopping alert sweep.");
                break;
            }
        }
    }

    tracing::info!("Alert sweep stopped cleanly");
}

/// Execute a single sweep cycle. Extracted for testability.
pub async fn sweep_once(
    engine: &AlertEngine,
    ledger: &InventoryLedger,
    metrics: &AppMetrics,
    history_retention: Option<usize>,
    today: NaiveDate,
) -> SweepReport {
    let report = engine.sweep(today).await;

    metrics.sweeps_total.inc();
    metrics.alerts_raised_total.inc_by(report.raised as f64);
    metrics.alerts_resolved_total.inc_by(report.resolved as f64);
    metrics.sweep_failures_total.inc_by(report.failures.len() as f64);
    metrics.inventory_records.set(ledger.len() as f64);

    if report.failures.is_empty() {
        tracing::info!(
            "Alert sweep: {} records, {} raised, {} resolved",
            report.evaluated,
            report.raised,
            report.resolved
        );
    } else {
        tracing::warn!(
            "Alert sweep: {} records, {} raised, {} resolved, {} failed",
            report.evaluated,
            report.raised,
            report.resolved,
            report.failures.len()
        );
    }

    if let Some(max_entries) = history_retention {
        let dropped = ledger.compact_price_history(max_entries).await;
        if dropped > 0 {
            tracing::debug!("Compacted {} in-memory price history entries", dropped);
        }
    }

    report
}
