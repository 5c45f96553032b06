use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::errors::PocScanError;
use super::token::OobToken;

/// Entries older than this are swept even if nobody waited on them.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);
const SWEEP_EVERY: u64 = 256;
/// Extra time an awaited entry survives past its deadline before the sweep
/// reclaims it from an abandoned waiter.
const ABANDONED_GRACE: Duration = Duration::from_secs(60);

/// An inbound callback matched to a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OobInteraction {
    pub token: String,
    /// `http`, `dns`, ...
    pub protocol: String,
    pub remote: Option<String>,
    pub raw: String,
    pub received_at: DateTime<Utc>,
}

impl OobInteraction {
    pub fn new(token: &str, protocol: &str, raw: impl Into<String>) -> Self {
        Self {
            token: token.to_string(),
            protocol: protocol.to_string(),
            remote: None,
            raw: raw.into(),
            received_at: Utc::now(),
        }
    }
}

struct PendingToken {
    sender: Option<oneshot::Sender<OobInteraction>>,
    receiver: Option<oneshot::Receiver<OobInteraction>>,
    expires_at: Instant,
}

/// Matches inbound interactions to outstanding tokens. Each token is backed
/// by a oneshot channel, so at most one delivery is honored and a delivery
/// that lands before `wait` starts is not lost.
pub struct OobCorrelator {
    pending: DashMap<String, PendingToken>,
    domain: Option<String>,
    ttl: Duration,
    degraded: AtomicBool,
    issued: AtomicU64,
}

impl OobCorrelator {
    pub fn new(domain: Option<String>) -> Self {
        Self {
            pending: DashMap::new(),
            domain,
            ttl: DEFAULT_TOKEN_TTL,
            degraded: AtomicBool::new(false),
            issued: AtomicU64::new(0),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Issue and register a fresh token.
    pub fn new_token(&self) -> OobToken {
        if self.issued.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep();
        }
        let token = OobToken::generate(self.domain.as_deref());
        let (tx, rx) = oneshot::channel();
        self.pending.insert(token.id.clone(), PendingToken {
            sender: Some(tx),
            receiver: Some(rx),
            expires_at: Instant::now() + self.ttl,
        });
        debug!(token = %token.id, "Registered OOB token");
        token
    }

    /// Wait until the token is delivered or `deadline` elapses. Returns
    /// `Err(Cancelled)` if `cancel` fires first. The entry is removed on
    /// return either way.
    pub async fn wait_for(
        &self,
        token: &OobToken,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<OobInteraction>, PocScanError> {
        let receiver = self.pending.get_mut(&token.id).and_then(|mut entry| {
            let receiver = entry.receiver.take()?;
            // The waiter's deadline governs delivery from here on.
            if let Some(until) = Instant::now().checked_add(deadline) {
                entry.expires_at = entry.expires_at.max(until);
            }
            Some(receiver)
        });

        let Some(receiver) = receiver else {
            // Unknown, expired or already awaited
            return Ok(None);
        };

        let outcome = tokio::select! {
            delivered = receiver => Ok(delivered.ok()),
            _ = tokio::time::sleep(deadline) => Ok(None),
            _ = cancel.cancelled() => Err(PocScanError::Cancelled(format!("OOB wait for {}", token.id))),
        };
        self.pending.remove(&token.id);

        if let Ok(Some(interaction)) = &outcome {
            debug!(token = %token.id, protocol = %interaction.protocol, "OOB interaction correlated");
        }
        outcome
    }

    pub async fn wait(
        &self,
        token: &OobToken,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, PocScanError> {
        Ok(self.wait_for(token, deadline, cancel).await?.is_some())
    }

    /// Hand an interaction to the token's waiter. Returns false when the
    /// token is unknown, expired or already resolved.
    pub fn deliver(&self, token: &str, interaction: OobInteraction) -> bool {
        let sender = self.pending.get_mut(token).and_then(|mut entry| {
            if entry.expires_at <= Instant::now() {
                return None;
            }
            entry.sender.take()
        });
        match sender {
            Some(tx) => tx.send(interaction).is_ok(),
            None => false,
        }
    }

    /// Drop a token nobody will wait on (e.g. its stage failed early).
    pub fn release(&self, token: &OobToken) {
        self.pending.remove(&token.id);
    }

    /// Tokens still awaiting a delivery.
    pub fn pending_tokens(&self) -> Vec<String> {
        let now = Instant::now();
        self.pending
            .iter()
            .filter(|entry| entry.sender.is_some() && entry.expires_at > now)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Remove expired entries. Awaited entries get a grace period past their
    /// deadline, after which the waiter is assumed gone.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.pending.len();
        self.pending.retain(|_, entry| {
            if entry.receiver.is_some() {
                entry.expires_at > now
            } else {
                entry.expires_at.checked_add(ABANDONED_GRACE).map_or(true, |t| t > now)
            }
        });
        let removed = before.saturating_sub(self.pending.len());
        if removed > 0 {
            debug!(removed, "Swept expired OOB tokens");
        }
    }

    /// Mark the upstream service unavailable. Waits still honor their
    /// deadline and then resolve false. Warns only on the first call.
    pub fn set_degraded(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(reason, "OOB backend unavailable; OOB conditions will resolve false");
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}
