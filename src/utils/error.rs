use crate::domain::model::BatchReport;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Source not found: {path}")]
    SourceNotFound { path: String },

    #[error("Source format error in {path} ({format}): {message}")]
    SourceFormat {
        path: String,
        format: String,
        message: String,
    },

    #[error("Permission denied reading source: {path}")]
    SourcePermission { path: String },

    #[error("Timed out reading source {path} after {seconds}s")]
    SourceTimeout { path: String, seconds: u64 },

    #[error("Batch interrupted after {} records: {cause}", .partial.total)]
    Interrupted {
        cause: Box<BatchError>,
        partial: Box<BatchReport>,
    },

    #[error("Destination directory {path} is not usable: {message}")]
    Destination { path: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Source,
    Configuration,
    Output,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl BatchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BatchError::SourceNotFound { .. }
            | BatchError::SourceFormat { .. }
            | BatchError::SourcePermission { .. }
            | BatchError::SourceTimeout { .. } => ErrorCategory::Source,
            BatchError::Interrupted { cause, .. } => cause.category(),
            BatchError::Destination { .. } => ErrorCategory::Output,
            BatchError::ConfigError { .. }
            | BatchError::ConfigValidationError { .. }
            | BatchError::InvalidConfigValueError { .. }
            | BatchError::MissingConfigError { .. } => ErrorCategory::Configuration,
            BatchError::IoError(_) | BatchError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Source | ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Output => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 結構性錯誤：來源無法被信任，整批中止
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            BatchError::SourceNotFound { .. }
                | BatchError::SourceFormat { .. }
                | BatchError::SourcePermission { .. }
                | BatchError::SourceTimeout { .. }
                | BatchError::Interrupted { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            BatchError::SourceNotFound { .. } => "Check the source path and try again",
            BatchError::SourceFormat { .. } => {
                "Make sure the file content matches the selected format (csv, txt, json, xlsx)"
            }
            BatchError::SourcePermission { .. } => "Grant read access to the source file",
            BatchError::SourceTimeout { .. } => {
                "Increase the read timeout or move the source to faster storage"
            }
            BatchError::Interrupted { cause, .. } => cause.recovery_suggestion(),
            BatchError::Destination { .. } => {
                "Choose a writable output directory or create it manually"
            }
            BatchError::ConfigError { .. }
            | BatchError::ConfigValidationError { .. }
            | BatchError::InvalidConfigValueError { .. }
            | BatchError::MissingConfigError { .. } => {
                "Review the configuration values and run again"
            }
            BatchError::IoError(_) => "Check disk space and file system permissions",
            BatchError::SerializationError(_) => "Check that the data can be represented as JSON",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            BatchError::SourceNotFound { path } => format!("Data file does not exist: {}", path),
            BatchError::SourceFormat { path, message, .. } => {
                format!("Data file {} could not be parsed: {}", path, message)
            }
            BatchError::SourcePermission { path } => format!("Data file is not readable: {}", path),
            BatchError::Interrupted { cause, partial } => format!(
                "Batch stopped after {} records: {}",
                partial.total,
                cause.user_friendly_message()
            ),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_errors_are_structural() {
        let err = BatchError::SourceNotFound {
            path: "missing.csv".to_string(),
        };
        assert!(err.is_structural());
        assert_eq!(err.category(), ErrorCategory::Source);
        assert_eq!(err.severity(), ErrorSeverity::High);

        let err = BatchError::ConfigError {
            message: "bad".to_string(),
        };
        assert!(!err.is_structural());
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_io_error_is_critical() {
        let err: BatchError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }
}
