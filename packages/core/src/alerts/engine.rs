//! Alert derivation and deduplication.
//!
//! The engine keeps an append-only book of every alert it has raised plus
//! an index of the open (unresolved) alert per `(key, kind)`. Every
//! evaluation reconciles the rules' expected set against that index:
//!
//! | expected | open | action                    |
//! |----------|------|---------------------------|
//! | yes      | no   | raise, publish `Raised`   |
//! | yes      | yes  | refresh trigger if moved  |
//! | no       | yes  | resolve, publish `Cleared`|
//! | no       | no   | nothing                   |
//!
//! The book lock is held across the store write, so evaluations of the
//! same key never interleave and a failed write leaves the book untouched.
//!
//! Price drops are events, not state: the rules cannot re-derive one from
//! the current record. A price drop whose write fails is parked and retried
//! at the start of the next sweep.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::alerts::notifier::AlertNotifier;
use crate::alerts::rules;
use crate::alerts::types::*;
use crate::error::LocatorResult;
use crate::inventory::{InventoryChange, InventoryKey, InventoryLedger, InventoryRecord};
use crate::model::{DrugId, PharmacyId};
use crate::store::LocatorStore;

pub const DEFAULT_EXPIRING_SOON_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub expiring_soon_window_days: i64,
    /// Fraction in `[0, 1)`; `0.10` means a cut of more than 10%.
    pub price_drop_pct: Decimal,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            expiring_soon_window_days: DEFAULT_EXPIRING_SOON_WINDOW_DAYS,
            price_drop_pct: Decimal::new(10, 2),
        }
    }
}

#[derive(Debug, Default)]
struct AlertBook {
    alerts: Vec<Alert>,
    /// Position in `alerts` by id.
    positions: HashMap<Uuid, usize>,
    open: HashMap<(InventoryKey, AlertKind), Uuid>,
}

impl AlertBook {
    fn open_alert(&self, key: InventoryKey, kind: AlertKind) -> Option<&Alert> {
        let id = self.open.get(&(key, kind))?;
        self.positions.get(id).map(|pos| &self.alerts[*pos])
    }

    /// Insert or replace by id, keeping the open index in step.
    fn commit(&mut self, alert: Alert) {
        let slot = (alert.key(), alert.kind);
        if alert.is_resolved() {
            if self.open.get(&slot) == Some(&alert.id) {
                self.open.remove(&slot);
            }
        } else if alert.kind != AlertKind::PriceDrop {
            self.open.insert(slot, alert.id);
        }

        match self.positions.get(&alert.id).copied() {
            Some(pos) => self.alerts[pos] = alert,
            None => {
                self.positions.insert(alert.id, self.alerts.len());
                self.alerts.push(alert);
            }
        }
    }
}

pub struct AlertEngine {
    config: AlertConfig,
    ledger: Arc<InventoryLedger>,
    store: Arc<dyn LocatorStore>,
    notifiers: Vec<Arc<dyn AlertNotifier>>,
    book: Mutex<AlertBook>,
    pending_price_drops: Mutex<Vec<Alert>>,
}

impl AlertEngine {
    pub fn new(ledger: Arc<InventoryLedger>, store: Arc<dyn LocatorStore>, config: AlertConfig) -> Self {
        Self {
            config,
            ledger,
            store,
            notifiers: Vec::new(),
            book: Mutex::new(AlertBook::default()),
            pending_price_drops: Mutex::new(Vec::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Reconcile the stateful alerts of one record. Returns the transitions
    /// that were published.
    pub async fn evaluate(&self, record: &InventoryRecord, today: NaiveDate) -> LocatorResult<Vec<AlertTransition>> {
        let expected = rules::expected_alerts(record, today, &self.config)?;
        let key = record.key();
        let now = Utc::now();

        let mut transitions = Vec::new();
        {
            let mut book = self.book.lock().await;
            for kind in AlertKind::STATEFUL {
                let wanted = expected.iter().find(|(k, _)| *k == kind).map(|(_, t)| *t);
                let open = book.open_alert(key, kind).cloned();

                let (next, state) = match (wanted, open) {
                    (Some(trigger), None) => (Alert::raise(key, kind, trigger, now), Some(AlertState::Raised)),
                    (Some(trigger), Some(existing)) if existing.trigger != trigger => {
                        (Alert { trigger, ..existing }, None)
                    }
                    (None, Some(existing)) => (
                        Alert {
                            resolved_at: Some(now),
                            ..existing
                        },
                        Some(AlertState::Cleared),
                    ),
                    _ => continue,
                };

                self.store.save_alert(&next).await?;
                if let Some(state) = state {
                    transitions.push(AlertTransition::of(&next, state, now));
                }
                book.commit(next);
            }
        }

        self.publish(&transitions).await;
        Ok(transitions)
    }

    /// Handle one ledger change: record a price drop if the change carried
    /// one, then re-evaluate the key against its current record.
    ///
    /// The current record is re-read from the ledger because queued events
    /// may be stale by the time they are consumed.
    pub async fn on_change(&self, change: &InventoryChange, today: NaiveDate) -> LocatorResult<Vec<AlertTransition>> {
        let mut transitions = Vec::new();

        if let Some(trigger) = rules::price_drop(change, &self.config) {
            transitions.push(self.record_price_drop(change.key(), trigger, change.changed_at).await?);
        }

        let current = self
            .ledger
            .get(change.current.pharmacy_id, change.current.drug_id)
            .await
            .unwrap_or_else(|_| change.current.clone());
        transitions.extend(self.evaluate(&current, today).await?);
        Ok(transitions)
    }

    async fn record_price_drop(
        &self,
        key: InventoryKey,
        trigger: Trigger,
        at: DateTime<Utc>,
    ) -> LocatorResult<AlertTransition> {
        let mut alert = Alert::raise(key, AlertKind::PriceDrop, trigger, at);
        alert.resolved_at = Some(at);

        match self.commit_price_drop(&alert).await {
            Ok(transition) => Ok(transition),
            Err(err) => {
                self.pending_price_drops.lock().await.push(alert);
                Err(err)
            }
        }
    }

    async fn commit_price_drop(&self, alert: &Alert) -> LocatorResult<AlertTransition> {
        {
            let mut book = self.book.lock().await;
            self.store.save_alert(alert).await?;
            book.commit(alert.clone());
        }

        tracing::info!(
            "Price drop on {}:{} to {:?}",
            alert.pharmacy_id,
            alert.drug_id,
            alert.trigger
        );
        let transition = AlertTransition::of(alert, AlertState::Raised, alert.raised_at);
        self.publish(std::slice::from_ref(&transition)).await;
        Ok(transition)
    }

    /// Retry parked price drops. Returns how many were recorded; the rest
    /// stay parked for the next sweep.
    async fn retry_price_drops(&self) -> usize {
        let parked = std::mem::take(&mut *self.pending_price_drops.lock().await);
        if parked.is_empty() {
            return 0;
        }

        let mut recorded = 0;
        let mut still_pending = Vec::new();
        for alert in parked {
            match self.commit_price_drop(&alert).await {
                Ok(_) => recorded += 1,
                Err(err) => {
                    tracing::warn!(
                        "Price drop on {}:{} still not recorded: {}",
                        alert.pharmacy_id,
                        alert.drug_id,
                        err
                    );
                    still_pending.push(alert);
                }
            }
        }

        self.pending_price_drops.lock().await.extend(still_pending);
        recorded
    }

    /// Price drops waiting for a successful store write.
    pub async fn pending_price_drops(&self) -> usize {
        self.pending_price_drops.lock().await.len()
    }

    /// Evaluate every ledger record. A failing record is reported in the
    /// result and logged; it never stops the sweep.
    pub async fn sweep(&self, today: NaiveDate) -> SweepReport {
        let mut report = SweepReport {
            raised: self.retry_price_drops().await,
            ..SweepReport::default()
        };

        for record in self.ledger.snapshot().await {
            report.evaluated += 1;
            match self.evaluate(&record, today).await {
                Ok(transitions) => {
                    for t in transitions {
                        match t.state {
                            AlertState::Raised => report.raised += 1,
                            AlertState::Cleared => report.resolved += 1,
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "Alert sweep failed for {}:{}: {}",
                        record.pharmacy_id,
                        record.drug_id,
                        err
                    );
                    report.failures.push(SweepFailure {
                        key: record.key(),
                        error: err.to_string(),
                    });
                }
            }
        }

        report
    }

    async fn publish(&self, transitions: &[AlertTransition]) {
        for transition in transitions {
            for notifier in &self.notifiers {
                if let Err(err) = notifier.publish(transition).await {
                    tracing::warn!(
                        "Notifier {} failed for {} on {}:{}: {}",
                        notifier.notifier_name(),
                        transition.kind,
                        transition.pharmacy_id,
                        transition.drug_id,
                        err
                    );
                }
            }
        }
    }

    // ---- queries ----

    /// Every alert ever raised, resolved ones included, oldest first.
    pub async fn all(&self) -> Vec<Alert> {
        self.book.lock().await.alerts.clone()
    }

    /// Every open alert, oldest first.
    pub async fn unresolved(&self) -> Vec<Alert> {
        let book = self.book.lock().await;
        book.alerts.iter().filter(|a| !a.is_resolved()).cloned().collect()
    }

    pub async fn alerts_for(&self, pharmacy_id: PharmacyId) -> Vec<Alert> {
        let book = self.book.lock().await;
        book.alerts
            .iter()
            .filter(|a| a.pharmacy_id == pharmacy_id)
            .cloned()
            .collect()
    }

    /// Full audit trail for one key, resolved alerts included.
    pub async fn history(&self, pharmacy_id: PharmacyId, drug_id: DrugId) -> Vec<Alert> {
        let key = InventoryKey::new(pharmacy_id, drug_id);
        let book = self.book.lock().await;
        book.alerts.iter().filter(|a| a.key() == key).cloned().collect()
    }

    /// Reload the book from the store of record.
    pub async fn restore(&self) -> LocatorResult<usize> {
        let mut loaded = self.store.load_alerts().await?;
        loaded.sort_by_key(|a| a.raised_at);

        let mut book = AlertBook::default();
        for alert in loaded {
            book.commit(alert);
        }

        let count = book.alerts.len();
        *self.book.lock().await = book;
        tracing::info!("Alert engine restored with {} alerts", count);
        Ok(count)
    }
}
