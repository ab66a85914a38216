use crate::domain::model::{normalize_field_name, RawRecord, SourceFormat, SourceSpec};
use crate::utils::error::{BatchError, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use tokio::sync::mpsc;

/// 逐筆產生 `RawRecord` 的資料來源讀取器。
///
/// 讀取是延遲的：每次 `next()` 只實體化一筆記錄。讀取器無法倒轉，
/// 需要重新讀取時請重新 `open`。結構性錯誤（格式錯誤、權限不足等）
/// 以 `Err` 回傳後迭代即結束。
pub struct RecordReader {
    path: String,
    format: SourceFormat,
    inner: Inner,
}

enum Inner {
    Csv {
        rows: csv::StringRecordsIntoIter<File>,
        headers: Option<Vec<String>>,
    },
    Text {
        lines: Lines<BufReader<File>>,
        line: usize,
    },
    Json {
        items: std::iter::Enumerate<std::vec::IntoIter<serde_json::Value>>,
    },
    Sheet {
        range: Range<Data>,
        headers: Vec<String>,
        row: usize,
    },
    Done,
}

/// 依指定格式開啟來源
pub fn read(spec: &SourceSpec) -> Result<RecordReader> {
    RecordReader::open(spec)
}

impl RecordReader {
    pub fn open(spec: &SourceSpec) -> Result<Self> {
        let path = spec.display_path();

        if spec.path.is_dir() {
            return Err(BatchError::SourceFormat {
                path,
                format: spec.format.to_string(),
                message: "path is a directory".to_string(),
            });
        }

        let file = File::open(&spec.path).map_err(|e| source_io_error(&path, e))?;

        let mut reader = Self {
            path,
            format: spec.format,
            inner: Inner::Done,
        };

        reader.inner = match spec.format {
            SourceFormat::Csv => reader.open_csv(file, spec)?,
            SourceFormat::Text => Inner::Text {
                lines: BufReader::new(file).lines(),
                line: 0,
            },
            SourceFormat::Json => reader.open_json(file)?,
            SourceFormat::Spreadsheet => {
                drop(file);
                reader.open_sheet(&spec.path)?
            }
        };

        tracing::debug!("Opened {} source: {}", reader.format, reader.path);
        Ok(reader)
    }

    fn open_csv(&self, file: File, spec: &SourceSpec) -> Result<Inner> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(spec.csv.delimiter)
            .has_headers(spec.csv.has_headers)
            .flexible(true)
            .from_reader(file);

        let headers = if spec.csv.has_headers {
            let headers = reader
                .headers()
                .map_err(|e| self.format_error(format!("invalid header row: {}", e)))?;
            Some(headers.iter().map(normalize_field_name).collect())
        } else {
            None
        };

        Ok(Inner::Csv {
            rows: reader.into_records(),
            headers,
        })
    }

    fn open_json(&self, file: File) -> Result<Inner> {
        let document: serde_json::Value = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| self.format_error(format!("malformed JSON: {}", e)))?;

        let serde_json::Value::Array(items) = document else {
            return Err(self.format_error("top-level JSON value must be an array"));
        };

        // 整份文件先驗證結構
        for (index, item) in items.iter().enumerate() {
            match item {
                serde_json::Value::Object(map) => {
                    if let Some((key, _)) = map.iter().find(|(_, v)| v.is_object() || v.is_array()) {
                        return Err(self.format_error(format!(
                            "element {} has nested value in field '{}'",
                            index + 1,
                            key
                        )));
                    }
                }
                serde_json::Value::Array(_) => {
                    return Err(self.format_error(format!(
                        "element {} is an array, expected an object or scalar",
                        index + 1
                    )));
                }
                _ => {}
            }
        }

        Ok(Inner::Json {
            items: items.into_iter().enumerate(),
        })
    }

    fn open_sheet(&self, path: &Path) -> Result<Inner> {
        let mut workbook = open_workbook_auto(path).map_err(|e| match e {
            calamine::Error::Io(io) => source_io_error(&self.path, io),
            other => self.format_error(format!("cannot open workbook: {}", other)),
        })?;

        let range = match workbook.worksheet_range_at(0) {
            Some(Ok(range)) => range,
            Some(Err(e)) => return Err(self.format_error(format!("cannot read first sheet: {}", e))),
            None => return Err(self.format_error("workbook has no sheets")),
        };

        let headers: Vec<String> = (0..range.width())
            .map(|col| {
                range
                    .get((0, col))
                    .map(|cell| normalize_field_name(&cell_to_string(cell)))
                    .unwrap_or_default()
            })
            .collect();

        if headers.iter().all(|h| h.is_empty()) {
            return Err(self.format_error("missing header row in first sheet"));
        }

        Ok(Inner::Sheet {
            range,
            headers,
            row: 1,
        })
    }

    fn format_error(&self, message: impl Into<String>) -> BatchError {
        BatchError::SourceFormat {
            path: self.path.clone(),
            format: self.format.to_string(),
            message: message.into(),
        }
    }

    fn next_record(&mut self) -> Option<Result<RawRecord>> {
        match &mut self.inner {
            Inner::Csv { rows, headers } => {
                let row = match rows.next()? {
                    Ok(row) => row,
                    Err(e) => {
                        let message = e.to_string();
                        return Some(Err(self.format_error(message)));
                    }
                };
                let line = row.position().map(|p| p.line() as usize).unwrap_or(0);
                let record = match headers {
                    Some(headers) => RawRecord::named(line, headers.iter().zip(row.iter())),
                    None => RawRecord::positional(line, row.iter()),
                };
                Some(Ok(record))
            }
            Inner::Text { lines, line } => loop {
                let text = match lines.next()? {
                    Ok(text) => text,
                    Err(e) => {
                        let message = format!("line {}: {}", *line + 1, e);
                        return Some(Err(self.format_error(message)));
                    }
                };
                *line += 1;
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return Some(Ok(RawRecord::positional(*line, [trimmed])));
                }
            },
            Inner::Json { items } => {
                let (index, item) = items.next()?;
                let line = index + 1;
                let record = match item {
                    serde_json::Value::Object(map) => RawRecord::named(
                        line,
                        map.into_iter().map(|(k, v)| (k, json_scalar_to_string(&v))),
                    ),
                    scalar => RawRecord::positional(line, [json_scalar_to_string(&scalar)]),
                };
                Some(Ok(record))
            }
            Inner::Sheet {
                range,
                headers,
                row,
            } => {
                let offset = range.start().map(|(r, _)| r as usize).unwrap_or(0);
                while *row < range.height() {
                    let current = *row;
                    *row += 1;
                    let cells: Vec<String> = (0..headers.len())
                        .map(|col| range.get((current, col)).map(cell_to_string).unwrap_or_default())
                        .collect();
                    if cells.iter().all(|c| c.trim().is_empty()) {
                        continue;
                    }
                    return Some(Ok(RawRecord::named(
                        offset + current + 1,
                        headers.iter().zip(cells),
                    )));
                }
                None
            }
            Inner::Done => None,
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.next_record();
        match &item {
            None | Some(Err(_)) => self.inner = Inner::Done,
            Some(Ok(_)) => {}
        }
        item
    }
}

/// 在阻塞執行緒中讀取來源，透過有界通道逐筆送出。
///
/// 接收端被丟棄時讀取即停止。開啟失敗會以第一個項目送出。
pub fn stream(spec: SourceSpec, buffer: usize) -> mpsc::Receiver<Result<RawRecord>> {
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::task::spawn_blocking(move || {
        let reader = match RecordReader::open(&spec) {
            Ok(reader) => reader,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };

        for item in reader {
            if tx.blocking_send(item).is_err() {
                tracing::debug!("Record receiver dropped, stopping reader");
                break;
            }
        }
    });

    rx
}

fn source_io_error(path: &str, err: std::io::Error) -> BatchError {
    match err.kind() {
        std::io::ErrorKind::NotFound => BatchError::SourceNotFound {
            path: path.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => BatchError::SourcePermission {
            path: path.to_string(),
        },
        _ => BatchError::IoError(err),
    }
}

fn json_scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        // 整數值的浮點數不帶小數，避免 EAN 之類的數字碼變成 "1234.0"
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}
