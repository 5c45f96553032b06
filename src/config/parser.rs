use std::path::Path;
use crate::errors::PocScanError;
use super::types::{EngineConfig, OobBackendKind};
use tracing::warn;

pub async fn parse_config(path: &Path) -> Result<EngineConfig, PocScanError> {
    if !path.exists() {
        return Err(PocScanError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > 1_048_576 {
        return Err(PocScanError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    let config: EngineConfig = serde_yaml::from_str(&content)
        .map_err(|e| PocScanError::Config(format!("{}: {}", path.display(), e)))?;

    validate_conflicts(&config)?;

    Ok(config)
}

/// Detect semantic conflicts in the parsed configuration.
pub fn validate_conflicts(config: &EngineConfig) -> Result<(), PocScanError> {
    if config.concurrency == 0 {
        return Err(PocScanError::Config("concurrency must be at least 1".into()));
    }
    if config.http.timeout_secs == 0 {
        return Err(PocScanError::Config("http.timeout_secs must be at least 1".into()));
    }
    if config.http.max_response_body_size == 0 {
        return Err(PocScanError::Config("http.max_response_body_size must be positive".into()));
    }

    let oob = &config.oob;
    match oob.backend {
        OobBackendKind::HttpPoll => {
            if oob.api_url.as_deref().map_or(true, str::is_empty) {
                return Err(PocScanError::Config("oob backend 'http-poll' requires oob.api_url".into()));
            }
            if oob.domain.is_none() {
                warn!("oob.domain not set; tokens will not resolve to a callback host");
            }
        }
        OobBackendKind::Listener => {
            if oob.listen_addr.is_none() || oob.domain.is_none() {
                return Err(PocScanError::Config(
                    "oob backend 'listener' requires oob.listen_addr and oob.domain".into(),
                ));
            }
        }
        OobBackendKind::None => {}
    }

    if oob.timeout_secs == 0 {
        return Err(PocScanError::Config("oob.timeout_secs must be at least 1".into()));
    }

    Ok(())
}
