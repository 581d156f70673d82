use std::path::Path;

use anyhow::Result;

use crate::attachments::FsImageStore;
use crate::core::AppConfig;

pub async fn import(config: &AppConfig, path: &Path) -> Result<()> {
    let store = FsImageStore::new(config.images_path());
    let attachment = store.import(path).await?;
    println!("{}", attachment.id);
    Ok(())
}

pub async fn delete(config: &AppConfig, id: &str) -> Result<()> {
    let store = FsImageStore::new(config.images_path());
    store.delete(id).await?;
    println!("Deleted {}", id);
    Ok(())
}
