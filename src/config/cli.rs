use crate::config::BatchSettings;
use crate::domain::model::{
    CsvOptions, DefaultOptions, ErrorCorrection, IoFailurePolicy, OutputFormat, RunnerOptions,
    SourceFormat, SourceSpec, Symbology, Timeouts, DEFAULT_NAMING_TEMPLATE,
};
use crate::domain::ports::ConfigProvider;
use crate::utils::error::{BatchError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range, Validate,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const MAX_WORKERS: usize = 64;

#[derive(Debug, Clone, Parser)]
#[command(name = "barcode-batch")]
#[command(about = "Generate barcode and QR images in bulk from a data file")]
pub struct CliConfig {
    /// 資料來源檔案
    #[arg(long, short = 's')]
    pub source: PathBuf,

    /// 來源格式：csv、txt、json、xlsx
    #[arg(long, short = 'f', default_value = "csv")]
    pub format: SourceFormat,

    #[arg(long, default_value = ",")]
    pub delimiter: char,

    /// CSV 第一列不是標題列
    #[arg(long)]
    pub no_headers: bool,

    #[arg(long, default_value = "payload")]
    pub payload_column: String,

    /// 記錄未指定 symbology 時使用
    #[arg(long)]
    pub symbology: Option<Symbology>,

    #[arg(long)]
    pub size: Option<u32>,

    #[arg(long, default_value = "png")]
    pub output_format: OutputFormat,

    #[arg(long, default_value = "m")]
    pub error_correction: ErrorCorrection,

    /// 支援 {index}、{symbology}、{payload}
    #[arg(long, default_value = DEFAULT_NAMING_TEMPLATE)]
    pub naming_template: String,

    #[arg(long, short = 'o', default_value = "./output")]
    pub output_dir: PathBuf,

    #[arg(long, short = 'w', default_value = "1")]
    pub workers: usize,

    #[arg(long, default_value = "30")]
    pub read_timeout: u64,

    #[arg(long, default_value = "10")]
    pub encode_timeout: u64,

    #[arg(long, default_value = "10")]
    pub write_timeout: u64,

    /// continue 或 abort
    #[arg(long, default_value = "continue")]
    pub on_io_failure: IoFailurePolicy,

    #[arg(long, default_value = "100")]
    pub max_rename_attempts: usize,

    /// 將批次報告以 JSON 寫入此路徑
    #[arg(long)]
    pub report: Option<PathBuf>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log CPU and memory usage during the run")]
    pub monitor: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_path("source", &self.source.to_string_lossy())?;
        validate_path("output_dir", &self.output_dir.to_string_lossy())?;
        validate_non_empty_string("payload_column", &self.payload_column)?;
        validate_non_empty_string("naming_template", &self.naming_template)?;
        validate_range("workers", self.workers, 1, MAX_WORKERS)?;
        validate_positive_number("read_timeout", self.read_timeout as usize, 1)?;
        validate_positive_number("encode_timeout", self.encode_timeout as usize, 1)?;
        validate_positive_number("write_timeout", self.write_timeout as usize, 1)?;
        validate_positive_number("max_rename_attempts", self.max_rename_attempts, 1)?;

        if !self.delimiter.is_ascii() {
            return Err(BatchError::InvalidConfigValueError {
                field: "delimiter".to_string(),
                value: self.delimiter.to_string(),
                reason: "Delimiter must be a single ASCII character".to_string(),
            });
        }

        if let Some(report) = &self.report {
            validate_path("report", &report.to_string_lossy())?;
        }

        Ok(())
    }
}

impl ConfigProvider for CliConfig {
    fn settings(&self) -> Result<BatchSettings> {
        let delimiter = u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| BatchError::InvalidConfigValueError {
                field: "delimiter".to_string(),
                value: self.delimiter.to_string(),
                reason: "Delimiter must be a single ASCII character".to_string(),
            })?;

        let source = SourceSpec::new(self.source.clone(), self.format).with_csv_options(CsvOptions {
            delimiter,
            has_headers: !self.no_headers,
        });

        let defaults = DefaultOptions {
            symbology: self.symbology,
            size: self.size,
            output_format: self.output_format,
            error_correction: self.error_correction,
            naming_template: self.naming_template.clone(),
            payload_column: self.payload_column.clone(),
            max_rename_attempts: self.max_rename_attempts,
        };

        let runner = RunnerOptions {
            workers: self.workers,
            timeouts: Timeouts {
                read: Duration::from_secs(self.read_timeout),
                encode: Duration::from_secs(self.encode_timeout),
                write: Duration::from_secs(self.write_timeout),
            },
            io_failure_policy: self.on_io_failure,
        };

        Ok(BatchSettings {
            source,
            defaults,
            destination_dir: self.output_dir.clone(),
            runner,
            report_path: self.report.clone(),
            monitor: self.monitor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliConfig {
        let mut argv = vec!["barcode-batch"];
        argv.extend_from_slice(args);
        CliConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--source", "items.csv"]);
        assert!(config.validate().is_ok());

        let settings = config.settings().unwrap();
        assert_eq!(settings.source.format, SourceFormat::Csv);
        assert_eq!(settings.source.csv, CsvOptions::default());
        assert_eq!(settings.defaults.payload_column, "payload");
        assert_eq!(settings.defaults.symbology, None);
        assert_eq!(settings.runner, RunnerOptions::default());
        assert_eq!(settings.destination_dir, PathBuf::from("./output"));
        assert!(settings.report_path.is_none());
    }

    #[test]
    fn test_parses_typed_options() {
        let config = parse(&[
            "-s",
            "items.tsv",
            "--delimiter",
            "\t",
            "--no-headers",
            "--symbology",
            "qr",
            "--output-format",
            "svg",
            "--error-correction",
            "h",
            "-w",
            "4",
            "--on-io-failure",
            "abort",
            "--report",
            "report.json",
        ]);
        let settings = config.settings().unwrap();

        assert_eq!(settings.source.csv.delimiter, b'\t');
        assert!(!settings.source.csv.has_headers);
        assert_eq!(settings.defaults.symbology, Some(Symbology::Qr));
        assert_eq!(settings.defaults.output_format, OutputFormat::Svg);
        assert_eq!(settings.defaults.error_correction, ErrorCorrection::H);
        assert_eq!(settings.runner.workers, 4);
        assert_eq!(settings.runner.io_failure_policy, IoFailurePolicy::Abort);
        assert_eq!(settings.report_path, Some(PathBuf::from("report.json")));
    }

    #[test]
    fn test_rejects_unknown_format() {
        let result = CliConfig::try_parse_from(["barcode-batch", "-s", "a.bin", "-f", "parquet"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_errors() {
        let config = parse(&["--source", "items.csv", "--workers", "0"]);
        assert!(config.validate().is_err());

        let config = parse(&["--source", "items.csv", "--delimiter", "é"]);
        assert!(config.validate().is_err());
        assert!(config.settings().is_err());

        let config = parse(&["--source", "items.csv", "--payload-column", "  "]);
        assert!(config.validate().is_err());
    }
}
