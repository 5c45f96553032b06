use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::config::{OobBackendKind, OobConfig};
use crate::errors::PocScanError;
use super::correlator::{OobCorrelator, OobInteraction};

/// Source of inbound interactions for the correlator.
#[async_trait]
pub trait OobBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Startup health check.
    async fn probe(&self) -> Result<(), PocScanError>;

    /// Fetch interactions for any of the `pending` tokens.
    async fn poll(&self, pending: &[String]) -> Result<Vec<OobInteraction>, PocScanError>;
}

/// Polls a remote interaction log over HTTP. The response body is scanned
/// for outstanding tokens; each line mentioning a token becomes its
/// interaction record.
pub struct HttpPollBackend {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpPollBackend {
    pub fn new(api_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, PocScanError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PocScanError::Config(format!("failed to build OOB client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.map(str::to_string),
        })
    }

    async fn fetch(&self) -> Result<String, PocScanError> {
        let mut request = self.client.get(&self.api_url);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let resp = request
            .send()
            .await
            .map_err(|e| PocScanError::Oob(format!("poll request failed: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PocScanError::Oob(format!("poll endpoint returned {}", status)));
        }
        resp.text()
            .await
            .map_err(|e| PocScanError::Oob(format!("failed to read poll response: {}", e)))
    }
}

#[async_trait]
impl OobBackend for HttpPollBackend {
    fn name(&self) -> &str {
        "http-poll"
    }

    async fn probe(&self) -> Result<(), PocScanError> {
        self.fetch().await.map(|_| ())
    }

    async fn poll(&self, pending: &[String]) -> Result<Vec<OobInteraction>, PocScanError> {
        let body = self.fetch().await?.to_lowercase();
        Ok(match_tokens(&body, pending))
    }
}

fn match_tokens(body: &str, pending: &[String]) -> Vec<OobInteraction> {
    pending
        .iter()
        .filter_map(|token| {
            let line = body.lines().find(|l| l.contains(token.as_str()))?;
            let protocol = if line.contains("dns") { "dns" } else { "http" };
            Some(OobInteraction::new(token, protocol, line.trim()))
        })
        .collect()
}

/// Periodically poll `backend` and deliver matches until `cancel` fires.
pub fn spawn_poller(
    correlator: Arc<OobCorrelator>,
    backend: Arc<dyn OobBackend>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut failures: u32 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            correlator.sweep();
            let pending = correlator.pending_tokens();
            if pending.is_empty() {
                continue;
            }
            match backend.poll(&pending).await {
                Ok(interactions) => {
                    failures = 0;
                    for interaction in interactions {
                        let token = interaction.token.clone();
                        if correlator.deliver(&token, interaction) {
                            debug!(token = %token, backend = backend.name(), "Delivered OOB interaction");
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    // Avoid flooding the log while the service is down
                    if failures == 1 || failures % 20 == 0 {
                        warn!(backend = backend.name(), failures, error = %e, "OOB poll failed");
                    }
                }
            }
        }
        debug!(backend = backend.name(), "OOB poller stopped");
    })
}

/// Connect the configured backend to `correlator`. Startup failures put the
/// correlator in degraded mode instead of aborting the scan.
pub async fn start_backend(
    config: &OobConfig,
    correlator: Arc<OobCorrelator>,
    cancel: CancellationToken,
) -> Result<Option<JoinHandle<()>>, PocScanError> {
    match config.backend {
        OobBackendKind::None => {
            correlator.set_degraded("no OOB backend configured");
            Ok(None)
        }
        OobBackendKind::HttpPoll => {
            let api_url = config
                .api_url
                .as_deref()
                .ok_or_else(|| PocScanError::Config("oob.api_url is required for http-poll".into()))?;
            let backend = HttpPollBackend::new(api_url, config.api_key.as_deref(), Duration::from_secs(10))?;
            if let Err(e) = backend.probe().await {
                correlator.set_degraded(&e.to_string());
                return Ok(None);
            }
            info!(api_url, interval_secs = config.poll_interval().as_secs(), "OOB polling started");
            Ok(Some(spawn_poller(correlator, Arc::new(backend), config.poll_interval(), cancel)))
        }
        OobBackendKind::Listener => start_listener(config, correlator, cancel).await,
    }
}

#[cfg(feature = "listener")]
async fn start_listener(
    config: &OobConfig,
    correlator: Arc<OobCorrelator>,
    cancel: CancellationToken,
) -> Result<Option<JoinHandle<()>>, PocScanError> {
    let addr = config
        .listen_addr
        .as_deref()
        .ok_or_else(|| PocScanError::Config("oob.listen_addr is required for listener".into()))?;
    match super::listener::serve(addr, correlator.clone(), cancel).await {
        Ok(handle) => Ok(Some(handle)),
        Err(e) => {
            correlator.set_degraded(&e.to_string());
            Ok(None)
        }
    }
}

#[cfg(not(feature = "listener"))]
async fn start_listener(
    _config: &OobConfig,
    _correlator: Arc<OobCorrelator>,
    _cancel: CancellationToken,
) -> Result<Option<JoinHandle<()>>, PocScanError> {
    Err(PocScanError::Config("built without the 'listener' feature".into()))
}
