use crate::domain::model::{EncodingJob, ErrorCorrection, OutputFormat, RenderedImage, Symbology};
use crate::domain::ports::{EncodeError, Encoder};
use barcoders::sym::code128::Code128;
use barcoders::sym::code39::Code39;
use barcoders::sym::ean13::EAN13;
use barcoders::sym::ean8::EAN8;
use barcoders::sym::tf::TF;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use qrcode::types::QrError;
use qrcode::{Color, EcLevel, QrCode};
use std::io::Cursor;

const MAX_DIMENSION: u32 = 8192;
/// Code 128 字元集 B 的起始標記
const CODE128_SET_B: char = 'Ɓ';

/// 以 `barcoders`/`qrcode` 產生模組圖樣，再輸出為 PNG 或 SVG。
#[derive(Debug, Clone, Copy)]
pub struct SymbolEncoder {
    /// 一維條碼每個模組的像素寬
    pub module_width: u32,
    /// 一維條碼左右靜區（模組數）
    pub quiet_zone: u32,
    /// QR 外框（模組數）
    pub qr_border: u32,
}

impl Default for SymbolEncoder {
    fn default() -> Self {
        Self {
            module_width: 2,
            quiet_zone: 10,
            qr_border: 4,
        }
    }
}

/// 黑白模組矩陣與縮放
struct ModuleGrid {
    columns: u32,
    rows: u32,
    dark: Vec<bool>,
    x_scale: u32,
    y_scale: u32,
    margin_x: u32,
    margin_y: u32,
}

impl ModuleGrid {
    fn pixel_size(&self) -> (u32, u32) {
        (
            (self.columns + 2 * self.margin_x) * self.x_scale,
            (self.rows + 2 * self.margin_y) * self.y_scale,
        )
    }

    fn is_dark(&self, column: u32, row: u32) -> bool {
        self.dark[(row * self.columns + column) as usize]
    }
}

impl Encoder for SymbolEncoder {
    fn encode(&self, job: &EncodingJob) -> Result<RenderedImage, EncodeError> {
        let grid = if job.symbology.is_matrix() {
            self.qr_grid(job)?
        } else {
            self.linear_grid(job)?
        };

        let (width, height) = grid.pixel_size();
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(EncodeError::UnsupportedOptions(format!(
                "size {} renders a {}x{} image, limit is {}x{}",
                job.options.size, width, height, MAX_DIMENSION, MAX_DIMENSION
            )));
        }

        let bytes = match job.options.output_format {
            OutputFormat::Png => render_png(&grid)?,
            OutputFormat::Svg => render_svg(&grid).into_bytes(),
        };

        Ok(RenderedImage {
            format: job.options.output_format,
            width,
            height,
            bytes,
        })
    }
}

impl SymbolEncoder {
    fn qr_grid(&self, job: &EncodingJob) -> Result<ModuleGrid, EncodeError> {
        let level = match job.options.error_correction {
            ErrorCorrection::L => EcLevel::L,
            ErrorCorrection::M => EcLevel::M,
            ErrorCorrection::Q => EcLevel::Q,
            ErrorCorrection::H => EcLevel::H,
        };

        let code = QrCode::with_error_correction_level(job.payload.as_bytes(), level).map_err(|e| match e {
            QrError::DataTooLong => EncodeError::UnsupportedOptions(format!(
                "{} bytes do not fit a QR symbol at error correction level {:?}",
                job.payload.len(),
                job.options.error_correction
            )),
            other => EncodeError::Library(other.to_string()),
        })?;

        let side = code.width() as u32;
        let dark = code.to_colors().into_iter().map(|c| c == Color::Dark).collect();

        Ok(ModuleGrid {
            columns: side,
            rows: side,
            dark,
            x_scale: job.options.size,
            y_scale: job.options.size,
            margin_x: self.qr_border,
            margin_y: self.qr_border,
        })
    }

    fn linear_grid(&self, job: &EncodingJob) -> Result<ModuleGrid, EncodeError> {
        let modules = linear_modules(job.symbology, &job.payload)?;

        Ok(ModuleGrid {
            columns: modules.len() as u32,
            rows: 1,
            dark: modules.into_iter().map(|m| m == 1).collect(),
            x_scale: self.module_width,
            y_scale: job.options.size,
            margin_x: self.quiet_zone,
            margin_y: 0,
        })
    }
}

fn linear_modules(symbology: Symbology, payload: &str) -> Result<Vec<u8>, EncodeError> {
    let encoded = match symbology {
        Symbology::Ean13 => EAN13::new(strip_check_digit(payload, 12)?).map(|s| s.encode()),
        // UPC-A 等同前置 0 的 EAN-13
        Symbology::UpcA => {
            let gtin = format!("0{}", payload);
            EAN13::new(strip_check_digit(&gtin, 12)?).map(|s| s.encode())
        }
        Symbology::Ean8 => EAN8::new(strip_check_digit(payload, 7)?).map(|s| s.encode()),
        Symbology::Code128 => Code128::new(format!("{}{}", CODE128_SET_B, payload)).map(|s| s.encode()),
        Symbology::Code39 => Code39::new(payload.to_string()).map(|s| s.encode()),
        Symbology::Itf => TF::interleaved(payload.to_string()).map(|s| s.encode()),
        Symbology::Qr => {
            return Err(EncodeError::UnsupportedOptions(
                "QR is not a linear symbology".to_string(),
            ))
        }
    };

    encoded.map_err(|e| EncodeError::Library(format!("{} rejected {:?}: {:?}", symbology, payload, e)))
}

/// GTIN 檢查碼（EAN/UPC 共用）
pub fn gtin_check_digit(data: &str) -> u32 {
    let sum: u32 = data
        .chars()
        .rev()
        .filter_map(|c| c.to_digit(10))
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { d * 3 } else { d })
        .sum();
    (10 - sum % 10) % 10
}

/// 若 payload 已含檢查碼則驗證後去除，交由函式庫重新計算
fn strip_check_digit(payload: &str, data_len: usize) -> Result<String, EncodeError> {
    if payload.len() == data_len + 1 {
        let (data, check) = payload.split_at(data_len);
        let actual = check
            .chars()
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| EncodeError::Library(format!("non-digit check character in {:?}", payload)))?;
        let expected = gtin_check_digit(data);
        if actual != expected {
            return Err(EncodeError::InvalidChecksum { expected, actual });
        }
        Ok(data.to_string())
    } else if payload.len() == data_len {
        Ok(payload.to_string())
    } else {
        Err(EncodeError::UnsupportedOptions(format!(
            "expected {} or {} digits, got {}",
            data_len,
            data_len + 1,
            payload.len()
        )))
    }
}

fn render_png(grid: &ModuleGrid) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = grid.pixel_size();
    let buffer = ImageBuffer::from_fn(width, height, |x, y| {
        let column = (x / grid.x_scale) as i64 - grid.margin_x as i64;
        let row = (y / grid.y_scale) as i64 - grid.margin_y as i64;
        let inside = column >= 0 && row >= 0 && column < grid.columns as i64 && row < grid.rows as i64;
        if inside && grid.is_dark(column as u32, row as u32) {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(buffer)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| EncodeError::Library(format!("PNG encoding failed: {}", e)))?;
    Ok(bytes)
}

fn render_svg(grid: &ModuleGrid) -> String {
    let (width, height) = grid.pixel_size();
    let mut svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" version="1.1" width="{w}" height="{h}" viewBox="0 0 {w} {h}" shape-rendering="crispEdges"><rect width="{w}" height="{h}" fill="#ffffff"/>"##,
        w = width,
        h = height
    );

    // 同一列連續的深色模組合併成一個矩形
    for row in 0..grid.rows {
        let mut column = 0;
        while column < grid.columns {
            if !grid.is_dark(column, row) {
                column += 1;
                continue;
            }
            let start = column;
            while column < grid.columns && grid.is_dark(column, row) {
                column += 1;
            }
            svg.push_str(&format!(
                r##"<rect x="{}" y="{}" width="{}" height="{}" fill="#000000"/>"##,
                (start + grid.margin_x) * grid.x_scale,
                (row + grid.margin_y) * grid.y_scale,
                (column - start) * grid.x_scale,
                grid.y_scale
            ));
        }
    }

    svg.push_str("</svg>");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::JobOptions;

    const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G'];

    fn job(symbology: Symbology, payload: &str, size: u32, output_format: OutputFormat) -> EncodingJob {
        EncodingJob {
            id: 1,
            line: 1,
            payload: payload.to_string(),
            symbology,
            options: JobOptions {
                size,
                output_format,
                error_correction: ErrorCorrection::M,
                destination_path: "out.png".to_string(),
            },
            renamed_from: None,
        }
    }

    #[test]
    fn test_gtin_check_digit() {
        assert_eq!(gtin_check_digit("400638133393"), 1);
        assert_eq!(gtin_check_digit("03600029145"), 2);
        assert_eq!(gtin_check_digit("9638507"), 4);
    }

    #[test]
    fn test_ean13_png() {
        let image = SymbolEncoder::default()
            .encode(&job(Symbology::Ean13, "123456789012", 80, OutputFormat::Png))
            .unwrap();

        assert_eq!(image.format, OutputFormat::Png);
        assert!(image.bytes.starts_with(PNG_SIGNATURE));
        // EAN-13 為 95 個模組，左右各 10 個靜區，每模組 2px
        assert_eq!(image.width, (95 + 20) * 2);
        assert_eq!(image.height, 80);
    }

    #[test]
    fn test_ean13_with_valid_check_digit() {
        let result = SymbolEncoder::default()
            .encode(&job(Symbology::Ean13, "4006381333931", 80, OutputFormat::Png));
        assert!(result.is_ok());
    }

    #[test]
    fn test_ean13_with_wrong_check_digit() {
        let err = SymbolEncoder::default()
            .encode(&job(Symbology::Ean13, "4006381333932", 80, OutputFormat::Png))
            .unwrap_err();
        assert_eq!(err, EncodeError::InvalidChecksum { expected: 1, actual: 2 });
    }

    #[test]
    fn test_upca_is_rendered_as_ean13() {
        let image = SymbolEncoder::default()
            .encode(&job(Symbology::UpcA, "036000291452", 50, OutputFormat::Png))
            .unwrap();
        assert_eq!(image.width, (95 + 20) * 2);
    }

    #[test]
    fn test_qr_svg() {
        let image = SymbolEncoder::default()
            .encode(&job(Symbology::Qr, "hello", 4, OutputFormat::Svg))
            .unwrap();
        let svg = String::from_utf8(image.bytes).unwrap();

        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        // 版本 1 為 21x21 模組，加上 4 模組外框
        assert_eq!(image.width, (21 + 8) * 4);
        assert_eq!(image.width, image.height);
    }

    #[test]
    fn test_linear_symbologies_encode() {
        let encoder = SymbolEncoder::default();
        for (symbology, payload) in [
            (Symbology::Ean8, "9638507"),
            (Symbology::Code128, "Hello-128"),
            (Symbology::Code39, "CODE-39"),
            (Symbology::Itf, "12345678"),
        ] {
            let result = encoder.encode(&job(symbology, payload, 60, OutputFormat::Png));
            assert!(result.is_ok(), "{} failed: {:?}", symbology, result.err());
        }
    }

    #[test]
    fn test_oversized_image_is_rejected() {
        let err = SymbolEncoder::default()
            .encode(&job(Symbology::Qr, &"a".repeat(2000), 50, OutputFormat::Png))
            .unwrap_err();
        assert!(matches!(err, EncodeError::UnsupportedOptions(_)));
    }
}
