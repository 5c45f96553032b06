use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::rules::Rule;
use super::severity::Severity;
use super::target::Target;

/// One request/response exchange recorded while evaluating a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Stage name the step belongs to.
    pub stage: String,
    /// Rendered request line, headers and body.
    pub request: String,
    /// Status line, headers and (size-capped) body of the response.
    pub response: String,
    pub status: u16,
    pub elapsed_ms: u64,
}

/// Final outcome for one (target, rule) work item. Produced exactly once per
/// evaluated item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanVerdict {
    pub key: String,
    pub target: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub vulnerable: bool,
    pub evidence: Vec<Evidence>,
    /// Set when evaluation failed; such verdicts are never vulnerable.
    pub error: Option<String>,
    /// Whether an out-of-band interaction confirmed the verdict.
    pub oob_confirmed: bool,
    pub completed_at: DateTime<Utc>,
}

impl ScanVerdict {
    /// A not-vulnerable verdict with no evidence yet.
    pub fn new(key: &str, target: &Target, rule: &Rule) -> Self {
        Self {
            key: key.to_string(),
            target: target.as_str().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            vulnerable: false,
            evidence: Vec::new(),
            error: None,
            oob_confirmed: false,
            completed_at: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.vulnerable = false;
        self.error = Some(error.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate counts for a finished (or aborted) scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Work items enumerated, including skipped ones.
    pub total: usize,
    /// Items already recorded as done in the progress store.
    pub skipped: usize,
    pub vulnerable: usize,
    pub not_vulnerable: usize,
    pub errors: usize,
    /// Items aborted by cancellation or never started.
    pub cancelled: usize,
}

impl ScanSummary {
    pub fn record(&mut self, verdict: &ScanVerdict) {
        if verdict.is_error() {
            self.errors += 1;
        } else if verdict.vulnerable {
            self.vulnerable += 1;
        } else {
            self.not_vulnerable += 1;
        }
    }

    pub fn evaluated(&self) -> usize {
        self.vulnerable + self.not_vulnerable + self.errors
    }
}
