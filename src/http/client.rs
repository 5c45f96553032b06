use std::time::Instant;
use async_trait::async_trait;
use reqwest::{redirect, Client, Method};
use tracing::debug;
use crate::config::HttpConfig;
use crate::errors::{with_retry, PocScanError, RetryConfig};
use super::executor::{HttpResponse, RenderedRequest, StepExecutor};

/// reqwest-backed executor. Two clients share the policy and differ only in
/// redirect handling, since reqwest fixes the policy per client.
pub struct HttpStepExecutor {
    follow: Client,
    no_follow: Client,
    retry: RetryConfig,
    max_body: usize,
}

impl HttpStepExecutor {
    pub fn new(config: &HttpConfig) -> Result<Self, PocScanError> {
        Ok(Self {
            follow: build_client(config, redirect::Policy::limited(config.max_redirects))?,
            no_follow: build_client(config, redirect::Policy::none())?,
            retry: config.retry_config(),
            max_body: config.max_response_body_size,
        })
    }

    async fn send_once(&self, request: &RenderedRequest) -> Result<HttpResponse, PocScanError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| PocScanError::Http(format!("invalid method '{}': {}", request.method, e)))?;
        let client = if request.follow_redirects { &self.follow } else { &self.no_follow };

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let started = Instant::now();
        let mut resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_lowercase(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();

        let mut bytes: Vec<u8> = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = resp.chunk().await? {
            let room = self.max_body.saturating_sub(bytes.len());
            if chunk.len() > room {
                bytes.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            truncated,
            elapsed: started.elapsed(),
        })
    }
}

#[async_trait]
impl StepExecutor for HttpStepExecutor {
    async fn send(&self, request: &RenderedRequest) -> Result<HttpResponse, PocScanError> {
        let response = with_retry("http_step", &self.retry, || self.send_once(request)).await?;
        debug!(
            method = %request.method,
            url = %request.url,
            status = response.status,
            elapsed_ms = response.elapsed_ms(),
            truncated = response.truncated,
            "Step completed"
        );
        Ok(response)
    }
}

fn build_client(config: &HttpConfig, policy: redirect::Policy) -> Result<Client, PocScanError> {
    let mut builder = Client::builder()
        .timeout(config.timeout())
        .connect_timeout(config.timeout())
        .redirect(policy)
        .user_agent(config.user_agent.clone())
        .pool_max_idle_per_host(config.max_conns_per_host)
        .danger_accept_invalid_certs(config.insecure);

    if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| PocScanError::Config(format!("invalid proxy '{}': {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| PocScanError::Config(format!("failed to build HTTP client: {}", e)))
}
