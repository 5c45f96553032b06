use std::path::Path;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use crate::errors::PocScanError;
use crate::models::ScanVerdict;
use super::ResultSink;

/// Appends one JSON object per verdict to a file.
pub struct JsonLinesSink {
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesSink {
    pub async fn create(path: &Path) -> Result<Self, PocScanError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self { file: Mutex::new(file) })
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    async fn emit(&self, verdict: &ScanVerdict) -> Result<(), PocScanError> {
        let mut line = serde_json::to_string(verdict)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
