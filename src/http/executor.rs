use std::time::Duration;
use async_trait::async_trait;
use crate::errors::PocScanError;

/// Sends one fully rendered request. Implementations own proxying,
/// timeouts, redirects, retries and the response size cap.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn send(&self, request: &RenderedRequest) -> Result<HttpResponse, PocScanError>;
}

/// A request with every placeholder substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub follow_redirects: bool,
}

impl RenderedRequest {
    /// Raw-ish HTTP text used as evidence.
    pub fn summary(&self) -> String {
        let mut out = format!("{} {} HTTP/1.1\n", self.method, self.url);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\n", name, value));
        }
        if !self.body.is_empty() {
            out.push('\n');
            out.push_str(&self.body);
        }
        out
    }
}

/// Normalised response. Header names are lowercase; the body is capped at
/// the executor's size limit.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub truncated: bool,
    pub elapsed: Duration,
}

impl HttpResponse {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    /// Headers as `name: value` lines.
    pub fn headers_text(&self) -> String {
        self.headers
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }

    pub fn summary(&self) -> String {
        let mut out = format!("HTTP/1.1 {}\n{}\n\n{}", self.status, self.headers_text(), self.body);
        if self.truncated {
            out.push_str("\n[truncated]");
        }
        out
    }
}
