pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::{LocalStorage, NoopObserver, SymbolEncoder, TracingObserver};
#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{BatchSettings, TomlConfig};
pub use core::{
    mapper::JobMapper, reader::RecordReader, report::ReportBuilder, runner::BatchRunner,
};
pub use domain::model::{
    BatchReport, BatchRequest, DefaultOptions, IoFailurePolicy, JobOutcome, JobStatus, RunState,
    RunnerOptions, SourceFormat, SourceSpec, Symbology, Timeouts, ValidationReason,
};
pub use tokio_util::sync::CancellationToken;
pub use utils::error::{BatchError, Result};
