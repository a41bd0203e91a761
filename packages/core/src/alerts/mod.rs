//! Inventory alerting.
//!
//! [`AlertEngine`] turns ledger state into alerts: stock and expiry
//! conditions that stay open until they clear, plus one-shot price-drop
//! notices. Transitions go out through an [`AlertNotifier`].

pub mod consumer;
pub mod engine;
pub mod notifier;
pub mod rules;
pub mod types;
pub mod webhook;

pub use engine::{AlertConfig, AlertEngine};
pub use notifier::{AlertNotifier, LogNotifier, MemoryNotifier, NotifyError};
pub use types::*;
pub use webhook::WebhookNotifier;
