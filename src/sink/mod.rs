pub mod channel;
pub mod terminal;
pub mod jsonl;

use std::sync::Arc;
use async_trait::async_trait;
use crate::errors::PocScanError;
use crate::models::{ScanSummary, ScanVerdict};

pub use terminal::ConsoleSink;
pub use channel::ChannelSink;
pub use jsonl::JsonLinesSink;

/// Receives each verdict once it is durably recorded. Delivery is
/// at-least-once and unordered across work items.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Number of work items the scan will evaluate, once known.
    fn set_total(&self, _total: usize) {}

    async fn emit(&self, verdict: &ScanVerdict) -> Result<(), PocScanError>;

    async fn finish(&self, _summary: &ScanSummary) -> Result<(), PocScanError> {
        Ok(())
    }
}

/// Forwards to every inner sink. All sinks are attempted; the first error
/// is returned.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl ResultSink for FanoutSink {
    fn set_total(&self, total: usize) {
        for sink in &self.sinks {
            sink.set_total(total);
        }
    }

    async fn emit(&self, verdict: &ScanVerdict) -> Result<(), PocScanError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(verdict).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn finish(&self, summary: &ScanSummary) -> Result<(), PocScanError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.finish(summary).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
