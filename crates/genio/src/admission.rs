// Admission gate: acquires a generation slot from the shared counting
// service before a generation-class dispatch proceeds. Advisory by design:
// a broken or saturated counting service must never block a user forever.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use crate::config::AdmissionConfig;
use crate::directory::RelayServer;
use crate::error::DispatchError;

/// Optional sink for coarse progress strings ("Queueing...",
/// "Processing..."). Purely observational.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SlotGateError {
    #[error("slot service request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("slot service returned malformed response: {reason}")]
    Malformed { reason: String },
}

/// Remote procedure `request_generation_slot(cooldown_seconds, server_url)`.
/// Consumed, not owned; its concurrency safety is the service's problem.
#[async_trait]
pub trait SlotGate: Send + Sync {
    /// `Ok(true)` grants a slot, `Ok(false)` denies one. Errors mean the
    /// counting service itself is unreachable or broken.
    async fn request_slot(
        &self,
        server: &RelayServer,
        cooldown: Duration,
    ) -> Result<bool, SlotGateError>;
}

/// HTTP implementation posting the slot RPC as JSON.
pub struct HttpSlotGate {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpSlotGate {
    pub fn new(client: reqwest::Client, endpoint: &str) -> Result<Self, DispatchError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| DispatchError::invalid_url(endpoint, e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl SlotGate for HttpSlotGate {
    async fn request_slot(
        &self,
        server: &RelayServer,
        cooldown: Duration,
    ) -> Result<bool, SlotGateError> {
        let payload = serde_json::json!({
            "cooldown_seconds": cooldown.as_secs(),
            "server_url": server.base_url,
        });
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SlotGateError::Malformed {
                reason: format!("HTTP {status}"),
            });
        }

        let value: serde_json::Value = response.json().await?;
        value.as_bool().ok_or_else(|| SlotGateError::Malformed {
            reason: format!("expected boolean, got `{value}`"),
        })
    }
}

/// Walks the bounded request/backoff loop against a [`SlotGate`].
pub struct AdmissionController {
    gate: Arc<dyn SlotGate>,
    config: AdmissionConfig,
}

impl AdmissionController {
    pub fn new(gate: Arc<dyn SlotGate>, config: AdmissionConfig) -> Self {
        Self { gate, config }
    }

    /// Acquire a generation slot, best-effort. Returns `true` when the
    /// service granted one, `false` when we proceed without (service outage
    /// or denial past the retry bound). Never returns an error: false
    /// negatives here are worse than occasional over-admission.
    pub async fn admit(&self, server: &RelayServer, status: Option<&StatusCallback>) -> bool {
        if let Some(status) = status {
            status("Queueing...");
        }

        let mut granted = false;
        for round in 1..=self.config.max_slot_attempts {
            match self.gate.request_slot(server, self.config.cooldown).await {
                Ok(true) => {
                    debug!(server = %server.id, round, "generation slot granted");
                    granted = true;
                    break;
                }
                Ok(false) => {
                    if round == self.config.max_slot_attempts {
                        warn!(
                            server = %server.id,
                            rounds = round,
                            "slot denied past retry bound; proceeding without one"
                        );
                        break;
                    }
                    debug!(server = %server.id, round, "slot denied, backing off");
                    tokio::time::sleep(self.config.slot_retry_delay).await;
                }
                Err(e) => {
                    // Fail open: the generation itself matters more than
                    // strict quota enforcement.
                    warn!(server = %server.id, error = %e, "slot service unavailable; failing open");
                    break;
                }
            }
        }

        if let Some(status) = status {
            status("Processing...");
        }
        granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gate scripted with a fixed sequence of outcomes.
    struct ScriptedGate {
        script: Mutex<Vec<Result<bool, ()>>>,
        calls: AtomicUsize,
    }

    impl ScriptedGate {
        fn new(script: Vec<Result<bool, ()>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl SlotGate for ScriptedGate {
        async fn request_slot(
            &self,
            _server: &RelayServer,
            _cooldown: Duration,
        ) -> Result<bool, SlotGateError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let mut script = self.script.lock();
            match script.remove(0) {
                Ok(granted) => Ok(granted),
                Err(()) => Err(SlotGateError::Malformed {
                    reason: "outage".to_string(),
                }),
            }
        }
    }

    fn fast_config() -> AdmissionConfig {
        AdmissionConfig {
            cooldown: Duration::from_secs(60),
            max_slot_attempts: 3,
            slot_retry_delay: Duration::from_millis(1),
        }
    }

    fn relay() -> RelayServer {
        RelayServer::new("relay-01", "https://relay-01.genio.app")
    }

    #[tokio::test]
    async fn granted_slot_stops_the_loop() {
        let gate = Arc::new(ScriptedGate::new(vec![Ok(true)]));
        let controller = AdmissionController::new(gate.clone(), fast_config());
        assert!(controller.admit(&relay(), None).await);
        assert_eq!(gate.calls(), 1);
    }

    #[tokio::test]
    async fn denial_retries_then_proceeds_anyway() {
        let gate = Arc::new(ScriptedGate::new(vec![Ok(false), Ok(false), Ok(false)]));
        let controller = AdmissionController::new(gate.clone(), fast_config());
        // Proceeds, but without a slot.
        assert!(!controller.admit(&relay(), None).await);
        assert_eq!(gate.calls(), 3);
    }

    #[tokio::test]
    async fn service_outage_fails_open_immediately() {
        let gate = Arc::new(ScriptedGate::new(vec![Err(())]));
        let controller = AdmissionController::new(gate.clone(), fast_config());
        assert!(!controller.admit(&relay(), None).await);
        assert_eq!(gate.calls(), 1);
    }

    #[tokio::test]
    async fn denial_then_grant_succeeds_within_bound() {
        let gate = Arc::new(ScriptedGate::new(vec![Ok(false), Ok(true)]));
        let controller = AdmissionController::new(gate.clone(), fast_config());
        assert!(controller.admit(&relay(), None).await);
        assert_eq!(gate.calls(), 2);
    }

    #[tokio::test]
    async fn status_transitions_are_emitted_in_order() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: StatusCallback = Arc::new(move |msg: &str| {
            sink.lock().push(msg.to_string());
        });

        let gate = Arc::new(ScriptedGate::new(vec![Ok(true)]));
        let controller = AdmissionController::new(gate, fast_config());
        controller.admit(&relay(), Some(&callback)).await;

        assert_eq!(*seen.lock(), vec!["Queueing...", "Processing..."]);
    }
}
