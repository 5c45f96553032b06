use super::types::PocScanError;

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

impl PocScanError {
    /// Classify this error to determine its type and whether it can be retried.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Transient network conditions
            PocScanError::Network(_) => ErrorClassification {
                error_type: "NetworkError",
                retryable: true,
            },
            PocScanError::Timeout(_) => ErrorClassification {
                error_type: "TimeoutError",
                retryable: true,
            },

            PocScanError::Config(_) => ErrorClassification {
                error_type: "ConfigError",
                retryable: false,
            },
            PocScanError::InvalidTarget(_) => ErrorClassification {
                error_type: "InvalidTargetError",
                retryable: false,
            },
            PocScanError::RuleDefinition(_) => ErrorClassification {
                error_type: "RuleDefinitionError",
                retryable: false,
            },
            PocScanError::Http(_) => ErrorClassification {
                error_type: "HttpError",
                retryable: false,
            },
            PocScanError::Progress(_) => ErrorClassification {
                error_type: "ProgressError",
                retryable: false,
            },
            PocScanError::Oob(_) => ErrorClassification {
                error_type: "OobError",
                retryable: false,
            },
            PocScanError::Cancelled(_) => ErrorClassification {
                error_type: "CancelledError",
                retryable: false,
            },
            PocScanError::Io(_) => ErrorClassification {
                error_type: "IoError",
                retryable: false,
            },
            PocScanError::Json(_) => ErrorClassification {
                error_type: "JsonError",
                retryable: false,
            },
            PocScanError::Yaml(_) => ErrorClassification {
                error_type: "YamlError",
                retryable: false,
            },
            PocScanError::Internal(_) => ErrorClassification {
                error_type: "InternalError",
                retryable: false,
            },
        }
    }

    /// Errors that abort the whole scan instead of a single work item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PocScanError::Progress(_) | PocScanError::Config(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PocScanError::Cancelled(_))
    }
}
