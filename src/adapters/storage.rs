use crate::domain::ports::ImageSink;
use crate::utils::error::{BatchError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// 寫入本機檔案系統的影像輸出端
#[derive(Debug, Clone, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageSink for LocalStorage {
    async fn prepare(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| BatchError::Destination {
                path: dir.display().to_string(),
                message: e.to_string(),
            })?;

        let metadata = tokio::fs::metadata(dir)
            .await
            .map_err(|e| BatchError::Destination {
                path: dir.display().to_string(),
                message: e.to_string(),
            })?;
        if metadata.permissions().readonly() {
            return Err(BatchError::Destination {
                path: dir.display().to_string(),
                message: "directory is read-only".to_string(),
            });
        }

        Ok(())
    }

    async fn write_image(&self, dir: &Path, file_name: &str, data: &[u8]) -> Result<PathBuf> {
        let full_path = dir.join(file_name);
        tokio::fs::write(&full_path, data).await?;
        Ok(full_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_image_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("nested").join("out");
        let storage = LocalStorage::new();

        storage.prepare(&out).await.unwrap();
        let path = storage.write_image(&out, "a.png", b"data").await.unwrap();

        assert_eq!(path, out.join("a.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_prepare_fails_on_file_path() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();

        let err = LocalStorage::new().prepare(&file).await.unwrap_err();
        assert!(matches!(err, BatchError::Destination { .. }));
    }
}
