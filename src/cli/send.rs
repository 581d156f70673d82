use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use super::chat::{print_error, stream_turn};
use crate::attachments::FsImageStore;
use crate::chat::TurnOutcome;
use crate::core::AppConfig;

pub async fn run(config: &AppConfig, message: &str, images: &[PathBuf]) -> Result<()> {
    let store = Arc::new(FsImageStore::new(config.images_path()));

    let mut attachments = Vec::with_capacity(images.len());
    for path in images {
        attachments.push(store.import(path).await?);
    }

    let mut chat = super::new_chat(config, Arc::clone(&store))?;
    let result = stream_turn(&mut chat, message, &attachments).await;

    // Images imported for a one-off message aren't needed afterwards
    for attachment in &attachments {
        if let Err(e) = store.delete(&attachment.id).await {
            tracing::warn!("Failed to remove image {}: {}", attachment.id, e);
        }
    }

    match result {
        Ok(TurnOutcome::Completed(_)) => println!(),
        Ok(TurnOutcome::Cancelled(_)) => println!("\n[stopped]"),
        Err(e) => {
            print_error(&e);
            return Err(e.into());
        }
    }

    Ok(())
}
