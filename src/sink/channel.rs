use async_trait::async_trait;
use tokio::sync::mpsc;
use crate::errors::PocScanError;
use crate::models::ScanVerdict;
use super::ResultSink;

/// Sends verdicts over an unbounded channel, for embedding the engine.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ScanVerdict>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ScanVerdict>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ResultSink for ChannelSink {
    async fn emit(&self, verdict: &ScanVerdict) -> Result<(), PocScanError> {
        self.tx
            .send(verdict.clone())
            .map_err(|_| PocScanError::Internal("verdict receiver dropped".into()))
    }
}
