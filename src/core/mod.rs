pub mod mapper;
pub mod reader;
pub mod report;
pub mod runner;

pub use crate::domain::model::{BatchReport, BatchRequest, EncodingJob, JobOutcome, RawRecord};
pub use crate::domain::ports::{ConfigProvider, Encoder, ImageSink, RunObserver};
pub use crate::utils::error::Result;
