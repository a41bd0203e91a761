//! Webhook alert delivery.
//!
//! Posts each [`AlertTransition`] as JSON to a configured URL. Server
//! errors and network failures are retried with exponential backoff plus
//! jitter; a 4xx response is final.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;

use crate::alerts::notifier::{AlertNotifier, NotifyError};
use crate::alerts::types::AlertTransition;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    http: Client,
    max_attempts: u32,
    base_delay: Duration,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: Client::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ceiling = (self.base_delay.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
        exp + Duration::from_millis(jitter)
    }

    async fn post_once(&self, transition: &AlertTransition) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .json(transition)
            .send()
            .await
            .map_err(|err| NotifyError::Delivery {
                message: err.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

fn is_retryable(err: &NotifyError) -> bool {
    match err {
        NotifyError::Delivery { .. } => true,
        NotifyError::Rejected { status } => *status >= 500,
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn publish(&self, transition: &AlertTransition) -> Result<(), NotifyError> {
        let mut attempt = 0;
        loop {
            match self.post_once(transition).await {
                Ok(()) => return Ok(()),
                Err(err) if is_retryable(&err) && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        "Webhook delivery to {} failed (attempt {}): {}; retrying in {:?}",
                        self.url,
                        attempt + 1,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn notifier_name(&self) -> &str {
        "webhook"
    }
}
