//! Notification collaborator interface.
//!
//! The core never delivers email or push itself; it hands every
//! [`AlertTransition`] to an [`AlertNotifier`] and moves on. A failed
//! publish is logged by the caller and does not roll back the alert.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::alerts::types::AlertTransition;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Delivery failed: {message}")]
    Delivery { message: String },

    #[error("Target rejected notification with HTTP {status}")]
    Rejected { status: u16 },
}

#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn publish(&self, transition: &AlertTransition) -> Result<(), NotifyError>;

    /// Name of this notifier for logging.
    fn notifier_name(&self) -> &str;
}

/// Writes each transition to the tracing log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn publish(&self, transition: &AlertTransition) -> Result<(), NotifyError> {
        tracing::info!(
            pharmacy_id = %transition.pharmacy_id,
            drug_id = %transition.drug_id,
            kind = %transition.kind,
            state = ?transition.state,
            "Alert transition"
        );
        Ok(())
    }

    fn notifier_name(&self) -> &str {
        "log"
    }
}

/// Collects transitions in memory. Handy for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    published: Mutex<Vec<AlertTransition>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<AlertTransition> {
        self.published
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AlertNotifier for MemoryNotifier {
    async fn publish(&self, transition: &AlertTransition) -> Result<(), NotifyError> {
        self.published
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(transition.clone());
        Ok(())
    }

    fn notifier_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::alerts::types::{AlertKind, AlertState};
    use crate::model::{DrugId, PharmacyId};

    fn transition() -> AlertTransition {
        AlertTransition {
            pharmacy_id: PharmacyId::new(),
            drug_id: DrugId::new(),
            kind: AlertKind::OutOfStock,
            state: AlertState::Raised,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_notifier_records_in_order() {
        let notifier = MemoryNotifier::new();
        let first = transition();
        let second = transition();

        notifier.publish(&first).await.unwrap();
        notifier.publish(&second).await.unwrap();

        assert_eq!(notifier.published(), vec![first, second]);
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        assert!(LogNotifier.publish(&transition()).await.is_ok());
        assert_eq!(LogNotifier.notifier_name(), "log");
    }
}
