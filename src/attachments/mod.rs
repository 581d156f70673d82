//! Locally stored images that can be attached to a chat turn.
//!
//! The chat core only ever reads attachments through [`ImageStore`];
//! creating and deleting them is the store's business.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod store;

pub use store::FsImageStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub id: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

impl ImageAttachment {
    /// Creates an attachment with a fresh id. The stored file name is
    /// the id plus the given extension.
    pub fn new(extension: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        let filename = format!("{}.{}", id, extension.to_ascii_lowercase());
        Self {
            id,
            filename,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Unsupported image file: {0}")]
    Unsupported(String),

    #[error("Image storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Reads the stored image and returns it base64 encoded.
    async fn read_base64(&self, attachment_id: &str) -> Result<String, ImageStoreError>;
}

pub type SharedImageStore = std::sync::Arc<dyn ImageStore>;
