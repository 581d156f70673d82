use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};

use super::{ImageAttachment, ImageStore, ImageStoreError};

const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "heic"];

/// Stores each image as `<id>.<ext>` in a single directory.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies an image file into the store.
    pub async fn import(&self, source: &Path) -> Result<ImageAttachment, ImageStoreError> {
        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| ImageStoreError::Unsupported(source.display().to_string()))?;

        tokio::fs::create_dir_all(&self.root).await?;
        let attachment = ImageAttachment::new(&extension);
        tokio::fs::copy(source, self.root.join(&attachment.filename)).await?;

        tracing::debug!(
            "Imported image {} as {}",
            source.display(),
            attachment.filename
        );
        Ok(attachment)
    }

    /// The raw bytes of a stored image.
    pub async fn read_original(&self, attachment_id: &str) -> Result<Vec<u8>, ImageStoreError> {
        let path = self.locate(attachment_id).await?;
        Ok(tokio::fs::read(path).await?)
    }

    pub async fn delete(&self, attachment_id: &str) -> Result<(), ImageStoreError> {
        let path = self.locate(attachment_id).await?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    // Ids are matched against file stems rather than joined onto the
    // root so an id can never point outside of it.
    async fn locate(&self, attachment_id: &str) -> Result<PathBuf, ImageStoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ImageStoreError::NotFound(attachment_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(attachment_id) {
                return Ok(path);
            }
        }

        Err(ImageStoreError::NotFound(attachment_id.to_string()))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn read_base64(&self, attachment_id: &str) -> Result<String, ImageStoreError> {
        let bytes = self.read_original(attachment_id).await?;
        Ok(STANDARD.encode(bytes))
    }
}
