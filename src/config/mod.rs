#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use toml_config::TomlConfig;

use crate::domain::model::{BatchRequest, DefaultOptions, RunnerOptions, SourceSpec};
use std::path::PathBuf;

/// 各種配置來源（命令列、TOML）解析後的統一設定
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub source: SourceSpec,
    pub defaults: DefaultOptions,
    pub destination_dir: PathBuf,
    pub runner: RunnerOptions,
    pub report_path: Option<PathBuf>,
    pub monitor: bool,
}

impl BatchSettings {
    pub fn request(&self) -> BatchRequest {
        BatchRequest {
            source: self.source.clone(),
            defaults: self.defaults.clone(),
            destination_dir: self.destination_dir.clone(),
        }
    }
}
