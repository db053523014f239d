//! HTTP lifecycle hooks.
//!
//! The notifier subscribes to the engine's event bus and POSTs each enabled
//! event to a configured endpoint. Delivery is best effort: failures are
//! logged and counted, and never reach the request that triggered them.

use crate::metrics::record_hook_error;
use hopper_core::HookEvent;
use hopper_core::config::HooksConfig;
use hopper_engine::UploadEvent;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Request timeout for a single delivery attempt.
const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Hook delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("hook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("hook endpoint returned {0}")]
    Status(reqwest::StatusCode),
}

/// Posts lifecycle events to an HTTP endpoint.
#[derive(Clone, Debug)]
pub struct HookNotifier {
    http: reqwest::Client,
    endpoint: String,
    config: HooksConfig,
}

impl HookNotifier {
    /// Build a notifier, or `None` when no endpoint is configured.
    pub fn from_config(config: &HooksConfig) -> Result<Option<Self>, HookError> {
        let Some(endpoint) = config.http_endpoint.clone() else {
            return Ok(None);
        };
        let http = reqwest::Client::builder().timeout(HOOK_TIMEOUT).build()?;
        Ok(Some(Self {
            http,
            endpoint,
            config: config.clone(),
        }))
    }

    pub fn is_enabled(&self, event: HookEvent) -> bool {
        self.config.is_enabled(event)
    }

    /// Deliver events from `events` until the channel closes.
    pub fn spawn(self, events: broadcast::Receiver<UploadEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn run(self, mut events: broadcast::Receiver<UploadEvent>) {
        tracing::info!(endpoint = %self.endpoint, "Hook delivery started");
        loop {
            match events.recv().await {
                Ok(event) => {
                    if !self.is_enabled(event.kind) {
                        continue;
                    }
                    if let Err(err) = self.deliver(&event).await {
                        record_hook_error(event.kind.as_str());
                        tracing::warn!(
                            hook = %event.kind,
                            upload_id = %event.upload.id,
                            error = %err,
                            "Hook delivery failed"
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Hook delivery fell behind; events were dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("Hook delivery stopped");
    }

    /// POST one event, retrying transport errors and 5xx responses.
    pub async fn deliver(&self, event: &UploadEvent) -> Result<(), HookError> {
        let mut attempt = 0;
        loop {
            let result = self
                .http
                .post(&self.endpoint)
                .header("Hook-Name", event.kind.as_str())
                .json(event)
                .send()
                .await;

            let retryable = match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) if response.status().is_server_error() => {
                    HookError::Status(response.status())
                }
                Ok(response) => return Err(HookError::Status(response.status())),
                Err(err) => HookError::Transport(err),
            };

            if attempt >= self.config.http_retry {
                return Err(retryable);
            }
            attempt += 1;
            tracing::debug!(
                hook = %event.kind,
                attempt,
                error = %retryable,
                "Retrying hook delivery"
            );
            tokio::time::sleep(self.config.http_backoff()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_endpoint_means_no_notifier() {
        let config = HooksConfig::default();
        assert!(HookNotifier::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn empty_event_list_enables_everything() {
        let mut config = HooksConfig {
            http_endpoint: Some("http://127.0.0.1:9/hooks".to_string()),
            ..Default::default()
        };
        let notifier = HookNotifier::from_config(&config).unwrap().unwrap();
        assert!(HookEvent::ALL.iter().all(|e| notifier.is_enabled(*e)));

        config.enabled_events = vec![HookEvent::PostFinish];
        let notifier = HookNotifier::from_config(&config).unwrap().unwrap();
        assert!(notifier.is_enabled(HookEvent::PostFinish));
        assert!(!notifier.is_enabled(HookEvent::PostReceive));
    }
}
