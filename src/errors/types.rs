use thiserror::Error;

#[derive(Debug, Error)]
pub enum PocScanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Rule definition error: {0}")]
    RuleDefinition(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Progress store error: {0}")]
    Progress(String),

    #[error("OOB error: {0}")]
    Oob(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for PocScanError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PocScanError::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() || e.is_body() {
            PocScanError::Network(e.to_string())
        } else {
            PocScanError::Http(e.to_string())
        }
    }
}
