use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use rustyline::DefaultEditor;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::input::{Input, Prompter};
use crate::attachments::{FsImageStore, ImageAttachment};
use crate::chat::{Chat, TurnOutcome};
use crate::core::AppConfig;
use crate::openai::ChatError;

pub async fn run(config: &AppConfig) -> Result<()> {
    let mut prompter =
        Prompter::spawn(">>> ", || DefaultEditor::new().map_err(|e| e.to_string()));
    let store = Arc::new(FsImageStore::new(config.images_path()));
    let mut chat = super::new_chat(config, Arc::clone(&store))?;
    let mut staged: Vec<ImageAttachment> = Vec::new();

    println!(
        "Chatting with {} at {}. /image <path> attaches an image, /reset starts over, Ctrl-C stops a reply.",
        config.chat.model_id, config.chat.base_url
    );

    loop {
        match prompter.next().await {
            Input::Line(line) => {
                let line = line.trim();
                if line.is_empty() && staged.is_empty() {
                    continue;
                }

                if let Some(path) = line.strip_prefix("/image ") {
                    match store.import(Path::new(path.trim())).await {
                        Ok(attachment) => {
                            println!("Attached {}", attachment.id);
                            staged.push(attachment);
                        }
                        Err(e) => println!("Error: {}", e),
                    }
                    continue;
                }
                if line == "/reset" {
                    chat.reset();
                    staged.clear();
                    println!("Started a new conversation");
                    continue;
                }

                match stream_turn(&mut chat, line, &staged).await {
                    Ok(TurnOutcome::Completed(_)) => {
                        println!();
                        staged.clear();
                    }
                    Ok(TurnOutcome::Cancelled(_)) => {
                        println!("\n[stopped]");
                        staged.clear();
                    }
                    Err(e) => print_error(&e),
                }
            }
            Input::Interrupted | Input::Eof => break,
            Input::Failed(err) => {
                println!("Error: {}", err);
                break;
            }
        }
    }

    Ok(())
}

/// Runs one turn, printing deltas as they arrive. Ctrl-C cancels the
/// reply instead of exiting.
pub(crate) async fn stream_turn(
    chat: &mut Chat,
    text: &str,
    attachments: &[ImageAttachment],
) -> Result<TurnOutcome, ChatError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_deltas(rx));

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = chat.next_msg(text, attachments, cancel, &tx).await;

    interrupt.abort();
    drop(tx);
    if let Err(e) = printer.await {
        tracing::warn!("Printer task failed: {}", e);
    }

    result
}

async fn print_deltas(rx: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    let mut deltas = UnboundedReceiverStream::new(rx);
    while let Some(delta) = deltas.next().await {
        if stdout.write_all(delta.as_bytes()).await.is_err() {
            break;
        }
        let _ = stdout.flush().await;
    }
}

pub(crate) fn print_error(e: &ChatError) {
    eprintln!("\nError: {}", e);
    eprintln!("{}", e.recovery_suggestion());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_print_deltas_drains_until_sender_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("Hi".to_string()).unwrap();
        tx.send(" there".to_string()).unwrap();
        drop(tx);

        let finished = tokio::time::timeout(Duration::from_secs(5), print_deltas(rx)).await;
        assert!(finished.is_ok());
    }
}
