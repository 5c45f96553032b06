use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::errors::RetryConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of work items evaluated at once.
    pub concurrency: usize,
    /// Directory holding per-resume-id progress logs.
    pub resume_dir: PathBuf,
    pub http: HttpConfig,
    pub oob: OobConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 25,
            resume_dir: PathBuf::from(".pocscan/resume"),
            http: HttpConfig::default(),
            oob: OobConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub proxy: Option<String>,
    pub timeout_secs: u64,
    /// Extra attempts for transient network failures.
    pub retries: u32,
    pub max_redirects: usize,
    pub max_conns_per_host: usize,
    /// Response bodies are truncated to this many bytes.
    pub max_response_body_size: usize,
    pub user_agent: String,
    /// Accept invalid TLS certificates.
    pub insecure: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout_secs: 10,
            retries: 1,
            max_redirects: 3,
            max_conns_per_host: 10,
            max_response_body_size: 2 * 1024 * 1024,
            user_agent: format!("Mozilla/5.0 (compatible; pocscan/{})", env!("CARGO_PKG_VERSION")),
            insecure: true,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retries,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OobBackendKind {
    /// No callback service; OOB conditions always resolve false.
    #[default]
    None,
    /// Poll a remote interaction log over HTTP.
    HttpPoll,
    /// Run the built-in HTTP callback listener.
    Listener,
}

impl OobBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::HttpPoll => "http-poll",
            Self::Listener => "listener",
        }
    }
}

impl std::fmt::Display for OobBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OobConfig {
    pub backend: OobBackendKind,
    /// Domain that tokens are prefixed onto, e.g. `oob.example.com`.
    pub domain: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    /// Bind address for the built-in listener.
    pub listen_addr: Option<String>,
    pub poll_interval_secs: u64,
    /// Default wait for `oob()` when neither the rule nor the call sets one.
    pub timeout_secs: u64,
}

impl Default for OobConfig {
    fn default() -> Self {
        Self {
            backend: OobBackendKind::None,
            domain: None,
            api_url: None,
            api_key: None,
            listen_addr: None,
            poll_interval_secs: 3,
            timeout_secs: 20,
        }
    }
}

impl OobConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
