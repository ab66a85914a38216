use crate::config::BatchSettings;
use crate::domain::model::{
    CsvOptions, DefaultOptions, ErrorCorrection, IoFailurePolicy, OutputFormat, RunnerOptions,
    SourceFormat, SourceSpec, Symbology, Timeouts, DEFAULT_NAMING_TEMPLATE,
};
use crate::domain::ports::ConfigProvider;
use crate::utils::error::{BatchError, Result};
use crate::utils::logger::LOG_LEVELS;
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: String,
    pub format: String,
    pub delimiter: Option<String>,
    pub has_headers: Option<bool>,
    pub payload_column: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    pub symbology: Option<String>,
    pub size: Option<u32>,
    pub output_format: Option<String>,
    pub error_correction: Option<String>,
    pub naming_template: Option<String>,
    pub max_rename_attempts: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub directory: String,
    pub report: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub workers: Option<usize>,
    pub read_timeout_seconds: Option<u64>,
    pub encode_timeout_seconds: Option<u64>,
    pub write_timeout_seconds: Option<u64>,
    pub on_io_failure: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_level: Option<String>,
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(BatchError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| BatchError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${DATA_DIR})，未設定者保留原文
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| BatchError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_path("source.path", &self.source.path)?;
        validate_path("output.directory", &self.output.directory)?;
        if let Some(report) = &self.output.report {
            validate_path("output.report", report)?;
        }

        parse_field::<SourceFormat>("source.format", &self.source.format)?;
        self.delimiter()?;

        if let Some(column) = &self.source.payload_column {
            validate_non_empty_string("source.payload_column", column)?;
        }

        if let Some(symbology) = &self.defaults.symbology {
            parse_field::<Symbology>("defaults.symbology", symbology)?;
        }
        if let Some(format) = &self.defaults.output_format {
            parse_field::<OutputFormat>("defaults.output_format", format)?;
        }
        if let Some(level) = &self.defaults.error_correction {
            parse_field::<ErrorCorrection>("defaults.error_correction", level)?;
        }
        if let Some(template) = &self.defaults.naming_template {
            validate_non_empty_string("defaults.naming_template", template)?;
        }
        if let Some(attempts) = self.defaults.max_rename_attempts {
            validate_positive_number("defaults.max_rename_attempts", attempts, 1)?;
        }

        if let Some(workers) = self.execution.workers {
            validate_range("execution.workers", workers, 1, 64)?;
        }
        for (field, value) in [
            ("execution.read_timeout_seconds", self.execution.read_timeout_seconds),
            ("execution.encode_timeout_seconds", self.execution.encode_timeout_seconds),
            ("execution.write_timeout_seconds", self.execution.write_timeout_seconds),
        ] {
            if let Some(seconds) = value {
                validate_positive_number(field, seconds as usize, 1)?;
            }
        }
        if let Some(policy) = &self.execution.on_io_failure {
            parse_field::<IoFailurePolicy>("execution.on_io_failure", policy)?;
        }
        if let Some(level) = self.log_level() {
            if !LOG_LEVELS.contains(&level) {
                return Err(BatchError::InvalidConfigValueError {
                    field: "monitoring.log_level".to_string(),
                    value: level.to_string(),
                    reason: format!("Valid levels: {}", LOG_LEVELS.join(", ")),
                });
            }
        }

        Ok(())
    }

    /// 取得輸出目錄
    pub fn output_directory(&self) -> &str {
        &self.output.directory
    }

    pub fn workers(&self) -> usize {
        self.execution.workers.unwrap_or(1)
    }

    /// 取得監控設定
    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    /// `[monitoring] log_level`，未設定時回傳 `None`
    pub fn log_level(&self) -> Option<&str> {
        self.monitoring
            .as_ref()
            .and_then(|m| m.log_level.as_deref())
            .map(str::trim)
            .filter(|level| !level.is_empty())
    }

    fn delimiter(&self) -> Result<u8> {
        let Some(raw) = &self.source.delimiter else {
            return Ok(CsvOptions::default().delimiter);
        };

        let value = if raw == "\\t" { "\t" } else { raw.as_str() };
        match value.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(BatchError::InvalidConfigValueError {
                field: "source.delimiter".to_string(),
                value: raw.clone(),
                reason: "Delimiter must be a single ASCII character".to_string(),
            }),
        }
    }
}

fn parse_field<T: FromStr<Err = String>>(field: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|reason| BatchError::InvalidConfigValueError {
            field: field.to_string(),
            value: value.to_string(),
            reason,
        })
}

fn seconds_or(value: Option<u64>, fallback: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(fallback)
}

impl ConfigProvider for TomlConfig {
    fn settings(&self) -> Result<BatchSettings> {
        let format = parse_field::<SourceFormat>("source.format", &self.source.format)?;
        let source = SourceSpec::new(&self.source.path, format).with_csv_options(CsvOptions {
            delimiter: self.delimiter()?,
            has_headers: self.source.has_headers.unwrap_or(true),
        });

        let fallback = DefaultOptions::default();
        let defaults = DefaultOptions {
            symbology: self
                .defaults
                .symbology
                .as_deref()
                .map(|s| parse_field("defaults.symbology", s))
                .transpose()?,
            size: self.defaults.size,
            output_format: self
                .defaults
                .output_format
                .as_deref()
                .map(|s| parse_field("defaults.output_format", s))
                .transpose()?
                .unwrap_or(fallback.output_format),
            error_correction: self
                .defaults
                .error_correction
                .as_deref()
                .map(|s| parse_field("defaults.error_correction", s))
                .transpose()?
                .unwrap_or(fallback.error_correction),
            naming_template: self
                .defaults
                .naming_template
                .clone()
                .unwrap_or_else(|| DEFAULT_NAMING_TEMPLATE.to_string()),
            payload_column: self
                .source
                .payload_column
                .clone()
                .unwrap_or(fallback.payload_column),
            max_rename_attempts: self
                .defaults
                .max_rename_attempts
                .unwrap_or(fallback.max_rename_attempts),
        };

        let timeouts = Timeouts::default();
        let runner = RunnerOptions {
            workers: self.workers(),
            timeouts: Timeouts {
                read: seconds_or(self.execution.read_timeout_seconds, timeouts.read),
                encode: seconds_or(self.execution.encode_timeout_seconds, timeouts.encode),
                write: seconds_or(self.execution.write_timeout_seconds, timeouts.write),
            },
            io_failure_policy: self
                .execution
                .on_io_failure
                .as_deref()
                .map(|s| parse_field("execution.on_io_failure", s))
                .transpose()?
                .unwrap_or_default(),
        };

        Ok(BatchSettings {
            source,
            defaults,
            destination_dir: PathBuf::from(&self.output.directory),
            runner,
            report_path: self.output.report.as_ref().map(PathBuf::from),
            monitor: self.monitoring_enabled(),
        })
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r#"
[source]
path = "data/items.csv"
format = "csv"

[output]
directory = "./barcodes"
"#;

    #[test]
    fn test_parse_basic_toml_config() {
        let config = TomlConfig::from_toml_str(BASIC).unwrap();
        assert!(config.validate().is_ok());

        let settings = config.settings().unwrap();
        assert_eq!(settings.source.format, SourceFormat::Csv);
        assert_eq!(settings.source.path, PathBuf::from("data/items.csv"));
        assert_eq!(settings.defaults, DefaultOptions::default());
        assert_eq!(settings.runner, RunnerOptions::default());
        assert_eq!(settings.destination_dir, PathBuf::from("./barcodes"));
        assert!(!settings.monitor);
    }

    #[test]
    fn test_parse_full_toml_config() {
        let toml_content = r#"
[source]
path = "items.tsv"
format = "csv"
delimiter = "\\t"
has_headers = false
payload_column = "Code"

[defaults]
symbology = "qr"
size = 8
output_format = "svg"
error_correction = "q"
naming_template = "{payload}"

[output]
directory = "./out"
report = "./out/report.json"

[execution]
workers = 4
encode_timeout_seconds = 2
on_io_failure = "abort"

[monitoring]
enabled = true
log_level = "debug"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_ok());

        let settings = config.settings().unwrap();
        assert_eq!(settings.source.csv.delimiter, b'\t');
        assert!(!settings.source.csv.has_headers);
        assert_eq!(settings.defaults.payload_column, "Code");
        assert_eq!(settings.defaults.symbology, Some(Symbology::Qr));
        assert_eq!(settings.defaults.size, Some(8));
        assert_eq!(settings.defaults.output_format, OutputFormat::Svg);
        assert_eq!(settings.defaults.error_correction, ErrorCorrection::Q);
        assert_eq!(settings.runner.workers, 4);
        assert_eq!(settings.runner.timeouts.encode, Duration::from_secs(2));
        assert_eq!(settings.runner.timeouts.read, Duration::from_secs(30));
        assert_eq!(settings.runner.io_failure_policy, IoFailurePolicy::Abort);
        assert_eq!(settings.report_path, Some(PathBuf::from("./out/report.json")));
        assert!(settings.monitor);
        assert_eq!(config.log_level(), Some("debug"));
    }

    #[test]
    fn test_log_level_is_validated() {
        assert_eq!(TomlConfig::from_toml_str(BASIC).unwrap().log_level(), None);

        let noisy = format!("{}\n[monitoring]\nenabled = false\nlog_level = \"chatty\"\n", BASIC);
        let config = TomlConfig::from_toml_str(&noisy).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfigValueError { ref field, .. } if field == "monitoring.log_level"));
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("BARCODE_BATCH_TEST_DIR", "/tmp/codes");

        let toml_content = r#"
[source]
path = "${BARCODE_BATCH_TEST_DIR}/items.json"
format = "json"

[output]
directory = "${BARCODE_BATCH_TEST_DIR}/out"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.source.path, "/tmp/codes/items.json");
        assert_eq!(config.output_directory(), "/tmp/codes/out");

        std::env::remove_var("BARCODE_BATCH_TEST_DIR");
    }

    #[test]
    fn test_unset_env_var_is_kept() {
        let toml_content = r#"
[source]
path = "${BARCODE_BATCH_SURELY_UNSET}"
format = "txt"

[output]
directory = "./out"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.source.path, "${BARCODE_BATCH_SURELY_UNSET}");
    }

    #[test]
    fn test_config_validation() {
        let bad_format = BASIC.replace("format = \"csv\"", "format = \"parquet\"");
        let config = TomlConfig::from_toml_str(&bad_format).unwrap();
        assert!(config.validate().is_err());

        let bad_workers = format!("{}\n[execution]\nworkers = 0\n", BASIC);
        let config = TomlConfig::from_toml_str(&bad_workers).unwrap();
        assert!(config.validate().is_err());

        let bad_symbology = format!("{}\n[defaults]\nsymbology = \"pdf417\"\n", BASIC);
        let config = TomlConfig::from_toml_str(&bad_symbology).unwrap();
        assert!(config.validate().is_err());
        assert!(config.settings().is_err());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TomlConfig::from_toml_str("[source\npath = 1").unwrap_err();
        assert!(matches!(err, BatchError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.source.format, "csv");
    }
}
