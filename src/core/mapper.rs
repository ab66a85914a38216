use crate::domain::model::{
    DefaultOptions, EncodingJob, ErrorCorrection, JobOptions, OutputFormat, RawRecord, Symbology,
    ValidationFailure, ValidationReason,
};
use std::collections::HashSet;

/// QR 版本 40、L 級時的最大位元組容量
pub const QR_MAX_BYTES: usize = 2953;
const MAX_STEM_CHARS: usize = 100;
const UNSAFE_FILENAME_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];
const CODE39_EXTRA_CHARS: &[char] = &['-', '.', '$', '/', '+', '%', ' '];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Digits,
    PrintableAscii,
    Code39,
    Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbologyRule {
    pub min_len: usize,
    pub max_len: usize,
    pub charset: Charset,
    pub even_length: bool,
    pub uppercase: bool,
    pub size_range: (u32, u32),
    pub default_size: u32,
}

const LINEAR_SIZE_RANGE: (u32, u32) = (10, 1000);
const LINEAR_DEFAULT_SIZE: u32 = 100;

const fn digits(min_len: usize, max_len: usize) -> SymbologyRule {
    SymbologyRule {
        min_len,
        max_len,
        charset: Charset::Digits,
        even_length: false,
        uppercase: false,
        size_range: LINEAR_SIZE_RANGE,
        default_size: LINEAR_DEFAULT_SIZE,
    }
}

const EAN13_RULE: SymbologyRule = digits(12, 13);
const EAN8_RULE: SymbologyRule = digits(7, 8);
const UPCA_RULE: SymbologyRule = digits(11, 12);
const ITF_RULE: SymbologyRule = SymbologyRule {
    even_length: true,
    ..digits(2, 80)
};
const CODE128_RULE: SymbologyRule = SymbologyRule {
    charset: Charset::PrintableAscii,
    ..digits(1, 80)
};
const CODE39_RULE: SymbologyRule = SymbologyRule {
    charset: Charset::Code39,
    uppercase: true,
    ..digits(1, 43)
};
const QR_RULE: SymbologyRule = SymbologyRule {
    min_len: 1,
    max_len: QR_MAX_BYTES,
    charset: Charset::Bytes,
    even_length: false,
    uppercase: false,
    size_range: (1, 50),
    default_size: 10,
};

/// 各碼制的字元集與長度規則查表
pub fn rule_for(symbology: Symbology) -> &'static SymbologyRule {
    match symbology {
        Symbology::Ean13 => &EAN13_RULE,
        Symbology::Ean8 => &EAN8_RULE,
        Symbology::UpcA => &UPCA_RULE,
        Symbology::Code128 => &CODE128_RULE,
        Symbology::Code39 => &CODE39_RULE,
        Symbology::Itf => &ITF_RULE,
        Symbology::Qr => &QR_RULE,
    }
}

/// 驗證 payload 是否符合碼制規則，回傳正規化後的 payload
pub fn validate_payload(symbology: Symbology, payload: &str) -> Result<String, String> {
    let rule = rule_for(symbology);
    let normalized = if rule.uppercase {
        payload.to_uppercase()
    } else {
        payload.to_string()
    };

    let length = match rule.charset {
        Charset::Bytes => normalized.len(),
        _ => normalized.chars().count(),
    };
    if length < rule.min_len || length > rule.max_len {
        return Err(if rule.min_len == rule.max_len {
            format!("{} requires exactly {} characters, got {}", symbology, rule.min_len, length)
        } else {
            format!(
                "{} requires {} to {} {}, got {}",
                symbology,
                rule.min_len,
                rule.max_len,
                if rule.charset == Charset::Bytes { "bytes" } else { "characters" },
                length
            )
        });
    }

    if rule.even_length && length % 2 != 0 {
        return Err(format!("{} requires an even number of digits, got {}", symbology, length));
    }

    let invalid = normalized.chars().find(|c| match rule.charset {
        Charset::Digits => !c.is_ascii_digit(),
        Charset::PrintableAscii => !(' '..='~').contains(c),
        Charset::Code39 => !(c.is_ascii_digit() || c.is_ascii_uppercase() || CODE39_EXTRA_CHARS.contains(c)),
        Charset::Bytes => false,
    });
    if let Some(c) = invalid {
        return Err(format!("character {:?} is not allowed in {}", c, symbology));
    }

    Ok(normalized)
}

/// 單次執行內已指派的輸出檔名。只由 mapper 修改，不查詢檔案系統，
/// 因此同樣的輸入重跑會得到同樣的命名。
#[derive(Debug, Default)]
pub struct DestinationRegistry {
    assigned: HashSet<String>,
    max_attempts: usize,
}

impl DestinationRegistry {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            assigned: HashSet::new(),
            max_attempts,
        }
    }

    /// 指派 `stem.ext`；衝突時依序嘗試 `stem_2.ext`、`stem_3.ext`…
    /// 回傳最終檔名與被改名前的原始檔名
    pub fn assign(
        &mut self,
        stem: &str,
        extension: &str,
    ) -> Result<(String, Option<String>), ValidationFailure> {
        let requested = format!("{}.{}", stem, extension);
        if self.assigned.insert(requested.to_lowercase()) {
            return Ok((requested, None));
        }

        for n in 2..2 + self.max_attempts {
            let candidate = format!("{}_{}.{}", stem, n, extension);
            if self.assigned.insert(candidate.to_lowercase()) {
                return Ok((candidate, Some(requested)));
            }
        }

        Err(ValidationFailure::new(
            ValidationReason::DestinationUnresolvable,
            format!(
                "'{}' collides with an earlier record and no free name was found after {} attempts",
                requested, self.max_attempts
            ),
        ))
    }
}

/// 清除不適合當檔名的字元並限制長度
pub fn sanitize_stem(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !UNSAFE_FILENAME_CHARS.contains(c) && !c.is_control())
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    cleaned.chars().take(MAX_STEM_CHARS).collect()
}

pub fn render_template(template: &str, index: usize, symbology: Symbology, payload: &str) -> String {
    template
        .replace("{index}", &index.to_string())
        .replace("{symbology}", symbology.as_str())
        .replace("{payload}", payload)
}

/// 將原始記錄轉為 `EncodingJob`，並維護本次執行的輸出檔名登記。
pub struct JobMapper {
    defaults: DefaultOptions,
    registry: DestinationRegistry,
}

impl JobMapper {
    pub fn new(defaults: DefaultOptions) -> Self {
        let registry = DestinationRegistry::new(defaults.max_rename_attempts);
        Self { defaults, registry }
    }

    /// 依序套用規則，第一個失敗即回傳
    pub fn map(&mut self, id: usize, record: &RawRecord) -> Result<EncodingJob, ValidationFailure> {
        // 1. payload
        let payload = self.payload_of(record).map(str::trim).unwrap_or_default();
        if payload.is_empty() {
            return Err(ValidationFailure::new(
                ValidationReason::MissingPayload,
                format!("field '{}' is missing or empty", self.defaults.payload_column),
            ));
        }

        // 2. symbology
        let symbology = match non_empty(record.get("symbology")) {
            Some(value) => value
                .parse::<Symbology>()
                .map_err(|e| ValidationFailure::new(ValidationReason::UnknownSymbology, e))?,
            None => self.defaults.symbology.ok_or_else(|| {
                ValidationFailure::new(
                    ValidationReason::UnknownSymbology,
                    "no symbology given and no default configured",
                )
            })?,
        };

        // 3. payload vs symbology
        let payload = validate_payload(symbology, payload).map_err(|message| {
            ValidationFailure::new(ValidationReason::PayloadInvalidForSymbology, message)
        })?;

        // 3a. per-record options
        let rule = rule_for(symbology);
        let (stem_hint, format_hint) = match non_empty(record.get("filename")) {
            Some(name) => split_filename(name),
            None => (None, None),
        };
        let output_format = match non_empty(record.get("output_format")) {
            Some(value) => value.parse::<OutputFormat>().map_err(invalid_option)?,
            None => format_hint.unwrap_or(self.defaults.output_format),
        };
        let size = match non_empty(record.get("size")) {
            Some(value) => value
                .parse::<u32>()
                .map_err(|_| invalid_option(format!("size '{}' is not a whole number", value)))?,
            None => self.defaults.size.unwrap_or(rule.default_size),
        };
        let (min_size, max_size) = rule.size_range;
        if size < min_size || size > max_size {
            return Err(invalid_option(format!(
                "size {} out of range {}..={} for {}",
                size, min_size, max_size, symbology
            )));
        }
        let error_correction = match non_empty(record.get("error_correction")) {
            Some(value) => value.parse::<ErrorCorrection>().map_err(invalid_option)?,
            None => self.defaults.error_correction,
        };

        // 4. destination
        let stem = stem_hint
            .unwrap_or_else(|| render_template(&self.defaults.naming_template, id, symbology, &payload));
        let mut stem = sanitize_stem(&stem);
        if stem.is_empty() {
            stem = format!("data_{}", id);
        }
        let (destination_path, renamed_from) =
            self.registry.assign(&stem, output_format.extension())?;
        if let Some(original) = &renamed_from {
            tracing::debug!(
                "{}: record {} renamed {} -> {}",
                ValidationReason::DuplicateDestination,
                id,
                original,
                destination_path
            );
        }

        Ok(EncodingJob {
            id,
            line: record.line(),
            payload,
            symbology,
            options: JobOptions {
                size,
                output_format,
                error_correction,
                destination_path,
            },
            renamed_from,
        })
    }

    /// 記錄中的原始 payload（未驗證），供結果回報使用
    pub fn raw_payload(&self, record: &RawRecord) -> String {
        self.payload_of(record).map(str::trim).unwrap_or_default().to_string()
    }

    fn payload_of<'a>(&self, record: &'a RawRecord) -> Option<&'a str> {
        if record.is_positional() {
            record.get_index(0)
        } else {
            record.get(&self.defaults.payload_column)
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn invalid_option(message: String) -> ValidationFailure {
    ValidationFailure::new(ValidationReason::InvalidOption, message)
}

/// 拆出檔名中的 `.png`/`.svg` 副檔名作為輸出格式提示
fn split_filename(name: &str) -> (Option<String>, Option<OutputFormat>) {
    if let Some((stem, extension)) = name.rsplit_once('.') {
        if let Ok(format) = extension.parse::<OutputFormat>() {
            return (Some(stem.to_string()), Some(format));
        }
    }
    (Some(name.to_string()), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> JobMapper {
        JobMapper::new(DefaultOptions::default().with_symbology(Symbology::Qr))
    }

    fn record(fields: Vec<(&str, &str)>) -> RawRecord {
        RawRecord::named(2, fields)
    }

    #[test]
    fn test_valid_ean13_record() {
        let job = mapper()
            .map(1, &record(vec![("payload", " 123456789012 "), ("symbology", "EAN13")]))
            .unwrap();

        assert_eq!(job.id, 1);
        assert_eq!(job.payload, "123456789012");
        assert_eq!(job.symbology, Symbology::Ean13);
        assert_eq!(job.options.size, 100);
        assert_eq!(job.options.output_format, OutputFormat::Png);
        assert_eq!(job.options.destination_path, "ean13_1.png");
        assert_eq!(job.renamed_from, None);
    }

    #[test]
    fn test_rules_apply_in_order() {
        let mut mapper = JobMapper::new(DefaultOptions::default());

        // 同時缺 payload 且碼制未知時，以第一條規則為準
        let failure = mapper
            .map(1, &record(vec![("payload", ""), ("symbology", "pdf417")]))
            .unwrap_err();
        assert_eq!(failure.reason, ValidationReason::MissingPayload);

        let failure = mapper
            .map(2, &record(vec![("payload", "abc"), ("symbology", "pdf417")]))
            .unwrap_err();
        assert_eq!(failure.reason, ValidationReason::UnknownSymbology);

        let failure = mapper.map(3, &record(vec![("payload", "abc")])).unwrap_err();
        assert_eq!(failure.reason, ValidationReason::UnknownSymbology);

        let failure = mapper
            .map(4, &record(vec![("payload", "12AB"), ("symbology", "ean13"), ("size", "x")]))
            .unwrap_err();
        assert_eq!(failure.reason, ValidationReason::PayloadInvalidForSymbology);

        let failure = mapper
            .map(5, &record(vec![("payload", "hello"), ("symbology", "qr"), ("size", "x")]))
            .unwrap_err();
        assert_eq!(failure.reason, ValidationReason::InvalidOption);
    }

    #[test]
    fn test_missing_payload_column() {
        let failure = mapper().map(1, &record(vec![("value", "abc")])).unwrap_err();
        assert_eq!(failure.reason, ValidationReason::MissingPayload);
    }

    #[test]
    fn test_positional_record_uses_first_field() {
        let job = mapper().map(7, &RawRecord::positional(7, vec!["hello world"])).unwrap();
        assert_eq!(job.payload, "hello world");
        assert_eq!(job.symbology, Symbology::Qr);
        assert_eq!(job.options.size, 10);
        assert_eq!(job.options.destination_path, "qr_7.png");
    }

    #[test]
    fn test_symbology_length_rules() {
        assert!(validate_payload(Symbology::Ean13, "123456789012").is_ok());
        assert!(validate_payload(Symbology::Ean13, "1234567890128").is_ok());
        assert!(validate_payload(Symbology::Ean13, "12345678901").is_err());
        assert!(validate_payload(Symbology::Ean13, "12345678901a").is_err());
        assert!(validate_payload(Symbology::UpcA, "03600029145").is_ok());
        assert!(validate_payload(Symbology::UpcA, "036000291452").is_ok());
        assert!(validate_payload(Symbology::UpcA, "0360002914521").is_err());
        assert!(validate_payload(Symbology::Ean8, "1234567").is_ok());
        assert!(validate_payload(Symbology::Itf, "1234").is_ok());
        assert!(validate_payload(Symbology::Itf, "123").is_err());
    }

    #[test]
    fn test_charset_rules() {
        assert_eq!(validate_payload(Symbology::Code39, "abc-12").unwrap(), "ABC-12");
        assert!(validate_payload(Symbology::Code39, "ABC#").is_err());
        assert!(validate_payload(Symbology::Code128, "Hello, World!").is_ok());
        assert!(validate_payload(Symbology::Code128, "naïve").is_err());
        assert!(validate_payload(Symbology::Qr, "任何內容").is_ok());
        assert!(validate_payload(Symbology::Qr, &"a".repeat(QR_MAX_BYTES)).is_ok());
        assert!(validate_payload(Symbology::Qr, &"a".repeat(QR_MAX_BYTES + 1)).is_err());
    }

    #[test]
    fn test_duplicate_destination_is_renamed() {
        let mut mapper = mapper();
        let first = mapper
            .map(1, &record(vec![("payload", "a"), ("filename", "code.png")]))
            .unwrap();
        let second = mapper
            .map(2, &record(vec![("payload", "b"), ("filename", "code.png")]))
            .unwrap();
        let third = mapper
            .map(3, &record(vec![("payload", "c"), ("filename", "CODE")]))
            .unwrap();

        assert_eq!(first.options.destination_path, "code.png");
        assert_eq!(second.options.destination_path, "code_2.png");
        assert_eq!(second.renamed_from.as_deref(), Some("code.png"));
        assert_eq!(third.options.destination_path, "CODE_3.png");
    }

    #[test]
    fn test_renaming_is_deterministic() {
        let records = vec![
            record(vec![("payload", "a"), ("filename", "same")]),
            record(vec![("payload", "b"), ("filename", "same")]),
            record(vec![("payload", "c"), ("filename", "same_2")]),
        ];

        let names = |records: &[RawRecord]| -> Vec<String> {
            let mut mapper = mapper();
            records
                .iter()
                .enumerate()
                .map(|(i, r)| mapper.map(i + 1, r).unwrap().options.destination_path)
                .collect()
        };

        let first_run = names(&records);
        assert_eq!(first_run, vec!["same.png", "same_2.png", "same_2_2.png"]);
        assert_eq!(first_run, names(&records));
    }

    #[test]
    fn test_destination_unresolvable_after_bounded_attempts() {
        let defaults = DefaultOptions {
            max_rename_attempts: 1,
            ..DefaultOptions::default().with_symbology(Symbology::Qr)
        };
        let mut mapper = JobMapper::new(defaults);

        for id in 1..=2 {
            mapper
                .map(id, &record(vec![("payload", "x"), ("filename", "dup")]))
                .unwrap();
        }
        let failure = mapper
            .map(3, &record(vec![("payload", "x"), ("filename", "dup")]))
            .unwrap_err();
        assert_eq!(failure.reason, ValidationReason::DestinationUnresolvable);
    }

    #[test]
    fn test_filename_extension_selects_format() {
        let job = mapper()
            .map(1, &record(vec![("payload", "a"), ("filename", "label.svg")]))
            .unwrap();
        assert_eq!(job.options.output_format, OutputFormat::Svg);
        assert_eq!(job.options.destination_path, "label.svg");

        let job = mapper()
            .map(
                1,
                &record(vec![("payload", "a"), ("filename", "label.svg"), ("output_format", "png")]),
            )
            .unwrap();
        assert_eq!(job.options.destination_path, "label.png");
    }

    #[test]
    fn test_template_payload_is_sanitized() {
        let defaults = DefaultOptions {
            naming_template: "{payload}".to_string(),
            ..DefaultOptions::default().with_symbology(Symbology::Qr)
        };
        let mut mapper = JobMapper::new(defaults);

        let job = mapper
            .map(1, &record(vec![("payload", "https://example.com/a?b")]))
            .unwrap();
        assert_eq!(job.options.destination_path, "httpsexample.comab.png");

        let job = mapper.map(2, &record(vec![("payload", "///")])).unwrap();
        assert_eq!(job.options.destination_path, "data_2.png");
    }

    #[test]
    fn test_size_range_is_checked() {
        let failure = mapper()
            .map(1, &record(vec![("payload", "a"), ("size", "51")]))
            .unwrap_err();
        assert_eq!(failure.reason, ValidationReason::InvalidOption);

        let job = mapper()
            .map(1, &record(vec![("payload", "a"), ("size", "4"), ("error_correction", "h")]))
            .unwrap();
        assert_eq!(job.options.size, 4);
        assert_eq!(job.options.error_correction, ErrorCorrection::H);
    }
}
