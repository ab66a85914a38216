use crate::domain::model::{EncodingJob, JobOutcome, RenderedImage, RunState};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("invalid checksum digit: expected {expected}, got {actual}")]
    InvalidChecksum { expected: u32, actual: u32 },

    #[error("unsupported option combination: {0}")]
    UnsupportedOptions(String),

    #[error("encoder library fault: {0}")]
    Library(String),
}

/// 外部編碼能力：純函數，不持有可變狀態
pub trait Encoder: Send + Sync {
    fn encode(&self, job: &EncodingJob) -> std::result::Result<RenderedImage, EncodeError>;
}

/// 影像輸出端，寫入 `dir/file_name` 並回傳完整路徑
#[async_trait]
pub trait ImageSink: Send + Sync {
    async fn prepare(&self, dir: &Path) -> Result<()>;
    async fn write_image(&self, dir: &Path, file_name: &str, data: &[u8]) -> Result<PathBuf>;
}

/// 呼叫端提供的執行觀察者，取代全域日誌
pub trait RunObserver: Send + Sync {
    fn on_state(&self, _state: RunState) {}
    fn on_outcome(&self, _outcome: &JobOutcome) {}
    fn on_fatal(&self, _message: &str) {}
}

pub trait ConfigProvider: Send + Sync {
    fn settings(&self) -> Result<crate::config::BatchSettings>;
}
