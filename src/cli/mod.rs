use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod chat;
pub mod images;
pub mod input;
pub mod send;

use crate::attachments::FsImageStore;
use crate::chat::{Chat, ChatBuilder};
use crate::core::{AppConfig, EnvCredentialStore};
use crate::openai::StreamingChatClient;

#[derive(Subcommand)]
enum ImagesCommand {
    /// Copy an image into the store and print its id
    Import { path: PathBuf },
    /// Delete a stored image
    Delete { id: String },
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat session
    Chat {},
    /// Send a single message and stream the answer
    Send {
        #[arg(long, short)]
        message: String,

        /// Attach an image file, can be repeated
        #[arg(long, short)]
        image: Vec<PathBuf>,
    },
    /// Manage stored images
    Images {
        #[command(subcommand)]
        command: ImagesCommand,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AppConfig::from_env()?;

    // Handle each sub command
    match args.command {
        Some(Command::Chat {}) => {
            chat::run(&config).await?;
        }
        Some(Command::Send { message, image }) => {
            send::run(&config, &message, &image).await?;
        }
        Some(Command::Images { command }) => match command {
            ImagesCommand::Import { path } => images::import(&config, &path).await?,
            ImagesCommand::Delete { id } => images::delete(&config, &id).await?,
        },
        None => {}
    }

    Ok(())
}

/// Wires a chat session from the environment configuration.
pub(crate) fn new_chat(config: &AppConfig, store: Arc<FsImageStore>) -> Result<Chat> {
    let client = StreamingChatClient::with_options(config.client.clone())?;
    let chat = ChatBuilder::new(
        config.chat.clone(),
        Arc::new(client),
        store,
        Arc::new(EnvCredentialStore),
    )
    .image_detail(config.image_detail)
    .build();
    Ok(chat)
}
