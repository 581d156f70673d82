use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::models::{Transcript, TurnOutcome};
use crate::attachments::{ImageAttachment, SharedImageStore};
use crate::core::{ChatConfig, SharedCredentialStore};
use crate::openai::{
    ChatError, ChatTurn, ImageDetail, RequestBuilder, StreamEvent, StreamingChatClient,
};

/// A conversation with an LLM over an OpenAI compatible API.
///
/// Owns the transcript and wires the request builder, the streaming
/// client and the credential store together for each turn. Use
/// `ChatBuilder` to construct one.
pub struct Chat {
    client: Arc<StreamingChatClient>,
    requests: RequestBuilder,
    credentials: SharedCredentialStore,
    config: ChatConfig,
    transcript: Transcript,
}

impl Chat {
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.transcript.clear();
    }

    /// Sends the next user turn and streams the reply. Each delta is
    /// forwarded to `tx` as it arrives.
    ///
    /// On failure the partial reply is dropped and the user turn is
    /// not added to the transcript, so the same turn can simply be
    /// sent again. On cancellation the user turn and any partial
    /// reply are kept.
    pub async fn next_msg(
        &mut self,
        text: &str,
        attachments: &[ImageAttachment],
        cancel: CancellationToken,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Result<TurnOutcome, ChatError> {
        let api_key = self
            .credentials
            .api_key(&self.config.id)
            .ok_or(ChatError::Authentication)?;

        let envelope = self
            .requests
            .build(
                self.transcript.messages(),
                &self.config.system_prompts,
                text,
                attachments,
                &self.config.model_id,
            )
            .await?;
        let user_turn = envelope
            .current_turn()
            .cloned()
            .ok_or_else(|| ChatError::Encoding("Request has no messages".to_string()))?;

        let mut stream = self
            .client
            .send(&envelope, &self.config.base_url, &api_key, cancel)
            .await;

        let mut reply = String::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta(delta) => {
                    reply.push_str(&delta);
                    // The receiver going away shouldn't stop the reply
                    // from being recorded
                    let _ = tx.send(delta);
                }
                StreamEvent::Completed => {
                    let assistant = ChatTurn::assistant(&reply);
                    self.transcript.push(user_turn);
                    self.transcript.push(assistant.clone());
                    return Ok(TurnOutcome::Completed(assistant));
                }
                StreamEvent::Failed(e) => {
                    tracing::debug!("Dropping {} bytes of partial reply", reply.len());
                    return Err(e);
                }
            }
        }

        // The stream only ends without a terminal event when cancelled
        tracing::debug!("Turn cancelled after {} bytes", reply.len());
        self.transcript.push(user_turn);
        let partial = if reply.is_empty() {
            None
        } else {
            let assistant = ChatTurn::assistant(&reply);
            self.transcript.push(assistant.clone());
            Some(assistant)
        };
        Ok(TurnOutcome::Cancelled(partial))
    }
}

pub struct ChatBuilder {
    client: Arc<StreamingChatClient>,
    image_store: SharedImageStore,
    credentials: SharedCredentialStore,
    config: ChatConfig,
    transcript: Transcript,
    detail: ImageDetail,
}

impl ChatBuilder {
    pub fn new(
        config: ChatConfig,
        client: Arc<StreamingChatClient>,
        image_store: SharedImageStore,
        credentials: SharedCredentialStore,
    ) -> Self {
        Self {
            client,
            image_store,
            credentials,
            config,
            transcript: Transcript::new(),
            detail: ImageDetail::default(),
        }
    }

    pub fn build(self) -> Chat {
        Chat {
            client: self.client,
            requests: RequestBuilder::new(self.image_store).detail(self.detail),
            credentials: self.credentials,
            config: self.config,
            transcript: self.transcript,
        }
    }

    pub fn transcript(mut self, messages: Vec<ChatTurn>) -> Self {
        self.transcript = Transcript::new_with_messages(messages);
        self
    }

    pub fn image_detail(mut self, detail: ImageDetail) -> Self {
        self.detail = detail;
        self
    }
}
