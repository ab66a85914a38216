use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 記錄欄位鍵：具名欄位（已正規化）或無標題來源的位置索引
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKey {
    Named(String),
    Index(usize),
}

/// 來源中的一列原始資料，讀取後不可變
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    line: usize,
    fields: Vec<(FieldKey, String)>,
}

impl RawRecord {
    /// 具名欄位，欄位名稱去除空白並轉為小寫
    pub fn named<I, K, V>(line: usize, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(key, value)| (FieldKey::Named(normalize_field_name(key.as_ref())), value.into()))
            .collect();
        Self { line, fields }
    }

    pub fn positional<I, V>(line: usize, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let fields = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| (FieldKey::Index(index), value.into()))
            .collect();
        Self { line, fields }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn is_positional(&self) -> bool {
        self.fields
            .iter()
            .all(|(key, _)| matches!(key, FieldKey::Index(_)))
    }

    /// 依欄位名稱查找（不分大小寫）
    pub fn get(&self, name: &str) -> Option<&str> {
        let wanted = normalize_field_name(name);
        self.fields.iter().find_map(|(key, value)| match key {
            FieldKey::Named(n) if *n == wanted => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn get_index(&self, index: usize) -> Option<&str> {
        self.fields.iter().find_map(|(key, value)| match key {
            FieldKey::Index(i) if *i == index => Some(value.as_str()),
            _ => None,
        })
    }
}

pub fn normalize_field_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Symbology {
    Ean13,
    Ean8,
    UpcA,
    Code128,
    Code39,
    Itf,
    Qr,
}

impl Symbology {
    pub const ALL: [Symbology; 7] = [
        Symbology::Ean13,
        Symbology::Ean8,
        Symbology::UpcA,
        Symbology::Code128,
        Symbology::Code39,
        Symbology::Itf,
        Symbology::Qr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Symbology::Ean13 => "ean13",
            Symbology::Ean8 => "ean8",
            Symbology::UpcA => "upca",
            Symbology::Code128 => "code128",
            Symbology::Code39 => "code39",
            Symbology::Itf => "itf",
            Symbology::Qr => "qr",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Symbology::Ean13 => "EAN-13",
            Symbology::Ean8 => "EAN-8",
            Symbology::UpcA => "UPC-A",
            Symbology::Code128 => "Code 128",
            Symbology::Code39 => "Code 39",
            Symbology::Itf => "ITF",
            Symbology::Qr => "QR",
        }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Symbology::Qr)
    }
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Symbology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_lowercase();

        match key.as_str() {
            "ean13" | "jan" => Ok(Symbology::Ean13),
            "ean8" => Ok(Symbology::Ean8),
            "upca" | "upc" => Ok(Symbology::UpcA),
            "code128" => Ok(Symbology::Code128),
            "code39" => Ok(Symbology::Code39),
            "itf" | "i2of5" | "interleaved2of5" => Ok(Symbology::Itf),
            "qr" | "qrcode" => Ok(Symbology::Qr),
            _ => Err(format!(
                "unknown symbology '{}' (supported: {})",
                s.trim(),
                Symbology::ALL.map(|sym| sym.as_str()).join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Svg,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "svg" => Ok(OutputFormat::Svg),
            other => Err(format!("unsupported output format '{}', expected png or svg", other)),
        }
    }
}

/// QR 糾錯等級
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorCorrection {
    L,
    #[default]
    M,
    Q,
    H,
}

impl FromStr for ErrorCorrection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "L" => Ok(ErrorCorrection::L),
            "M" => Ok(ErrorCorrection::M),
            "Q" => Ok(ErrorCorrection::Q),
            "H" => Ok(ErrorCorrection::H),
            other => Err(format!("error correction must be L, M, Q or H, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// QR：每個模組的像素；一維條碼：條高像素
    pub size: u32,
    pub output_format: OutputFormat,
    pub error_correction: ErrorCorrection,
    /// 相對於輸出目錄的檔名（含副檔名）
    pub destination_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingJob {
    pub id: usize,
    pub line: usize,
    pub payload: String,
    pub symbology: Symbology,
    pub options: JobOptions,
    pub renamed_from: Option<String>,
}

pub const DEFAULT_NAMING_TEMPLATE: &str = "{symbology}_{index}";

/// 呼叫端提供的預設值，記錄未指定時套用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultOptions {
    pub symbology: Option<Symbology>,
    pub size: Option<u32>,
    pub output_format: OutputFormat,
    pub error_correction: ErrorCorrection,
    pub naming_template: String,
    pub payload_column: String,
    pub max_rename_attempts: usize,
}

impl Default for DefaultOptions {
    fn default() -> Self {
        Self {
            symbology: None,
            size: None,
            output_format: OutputFormat::Png,
            error_correction: ErrorCorrection::M,
            naming_template: DEFAULT_NAMING_TEMPLATE.to_string(),
            payload_column: "payload".to_string(),
            max_rename_attempts: 100,
        }
    }
}

impl DefaultOptions {
    pub fn with_symbology(mut self, symbology: Symbology) -> Self {
        self.symbology = Some(symbology);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationReason {
    MissingPayload,
    UnknownSymbology,
    PayloadInvalidForSymbology,
    InvalidOption,
    DuplicateDestination,
    DestinationUnresolvable,
}

impl ValidationReason {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationReason::MissingPayload => "MISSING_PAYLOAD",
            ValidationReason::UnknownSymbology => "UNKNOWN_SYMBOLOGY",
            ValidationReason::PayloadInvalidForSymbology => "PAYLOAD_INVALID_FOR_SYMBOLOGY",
            ValidationReason::InvalidOption => "INVALID_OPTION",
            ValidationReason::DuplicateDestination => "DUPLICATE_DESTINATION",
            ValidationReason::DestinationUnresolvable => "DESTINATION_UNRESOLVABLE",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub reason: ValidationReason,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(reason: ValidationReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

/// 編碼器輸出的影像內容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Success,
    ValidationFailed,
    EncodeFailed,
    IoFailed,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: usize,
    pub line: usize,
    pub payload: String,
    pub status: JobStatus,
    pub reason: Option<ValidationReason>,
    pub detail: String,
    pub output_path: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Aborted,
}

impl RunState {
    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Pending, RunState::Running)
                | (RunState::Running, RunState::Completed)
                | (RunState::Running, RunState::Aborted)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub job_id: usize,
    pub line: usize,
    pub payload: String,
    pub status: JobStatus,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub state: RunState,
    pub abort_reason: Option<String>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub counts_by_status: BTreeMap<JobStatus, usize>,
    pub failures: Vec<FailureEntry>,
    pub outcomes: Vec<JobOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn count(&self, status: JobStatus) -> usize {
        self.counts_by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64 * 100.0
        }
    }
}

/// 輸入格式，由呼叫端明確指定，不自動偵測
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Text,
    Json,
    Spreadsheet,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Text => "txt",
            SourceFormat::Json => "json",
            SourceFormat::Spreadsheet => "xlsx",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "txt" | "text" => Ok(SourceFormat::Text),
            "json" => Ok(SourceFormat::Json),
            "xlsx" | "xls" | "excel" | "spreadsheet" => Ok(SourceFormat::Spreadsheet),
            other => Err(format!(
                "unsupported source format '{}', expected csv, txt, json or xlsx",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub has_headers: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_headers: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub path: PathBuf,
    pub format: SourceFormat,
    pub csv: CsvOptions,
}

impl SourceSpec {
    pub fn new(path: impl Into<PathBuf>, format: SourceFormat) -> Self {
        Self {
            path: path.into(),
            format,
            csv: CsvOptions::default(),
        }
    }

    pub fn with_csv_options(mut self, csv: CsvOptions) -> Self {
        self.csv = csv;
        self
    }

    pub fn display_path(&self) -> String {
        self.path.display().to_string()
    }
}

/// 單次批次執行的輸入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub source: SourceSpec,
    pub defaults: DefaultOptions,
    pub destination_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub encode: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(30),
            encode: Duration::from_secs(10),
            write: Duration::from_secs(10),
        }
    }
}

/// 寫檔失敗時的處理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoFailurePolicy {
    #[default]
    Continue,
    Abort,
}

impl FromStr for IoFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(IoFailurePolicy::Continue),
            "abort" => Ok(IoFailurePolicy::Abort),
            other => Err(format!("io failure policy must be continue or abort, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    pub workers: usize,
    pub timeouts: Timeouts,
    pub io_failure_policy: IoFailurePolicy,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            timeouts: Timeouts::default(),
            io_failure_policy: IoFailurePolicy::Continue,
        }
    }
}
