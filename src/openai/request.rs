//! Assembles the outgoing request envelope from conversation state
//! and the turn the user is about to send.

use futures_util::future::try_join_all;

use super::core::{ChatTurn, ContentPart, ImageDetail, RequestEnvelope, Role};
use super::error::ChatError;
use crate::attachments::{ImageAttachment, SharedImageStore};

pub struct RequestBuilder {
    store: SharedImageStore,
    detail: ImageDetail,
}

impl RequestBuilder {
    pub fn new(store: SharedImageStore) -> Self {
        Self {
            store,
            detail: ImageDetail::default(),
        }
    }

    /// Detail level requested for every attached image.
    pub fn detail(mut self, detail: ImageDetail) -> Self {
        self.detail = detail;
        self
    }

    /// Builds the envelope in wire order: system prompts, history,
    /// then the current turn.
    ///
    /// System prompts are only added when `history` doesn't already
    /// start with a system turn. Fails without returning a partial
    /// envelope if any attachment can't be read.
    pub async fn build(
        &self,
        history: &[ChatTurn],
        system_prompts: &[String],
        current_text: &str,
        attachments: &[ImageAttachment],
        model_id: &str,
    ) -> Result<RequestEnvelope, ChatError> {
        let current = self.current_turn(current_text, attachments).await?;

        let starts_with_system = history.first().is_some_and(|t| t.role == Role::System);
        let mut messages = Vec::with_capacity(system_prompts.len() + history.len() + 1);
        if !starts_with_system {
            messages.extend(
                system_prompts
                    .iter()
                    .filter(|p| !p.trim().is_empty())
                    .map(|p| ChatTurn::system(p)),
            );
        }
        messages.extend_from_slice(history);
        messages.push(current);

        let envelope = RequestEnvelope::new(model_id, messages);
        envelope.validate()?;

        tracing::debug!(
            "Built request for {} with {} messages and {} images",
            model_id,
            envelope.messages.len(),
            attachments.len()
        );
        Ok(envelope)
    }

    /// The user turn for `text` and `attachments`. Text only turns stay
    /// plain strings; a text part is only added to a multipart turn
    /// when there is something to say.
    pub async fn current_turn(
        &self,
        text: &str,
        attachments: &[ImageAttachment],
    ) -> Result<ChatTurn, ChatError> {
        if attachments.is_empty() {
            return Ok(ChatTurn::user(text));
        }

        // Reads run concurrently but results keep attachment order
        let urls = try_join_all(attachments.iter().map(|a| self.resolve(a))).await?;

        let mut parts = Vec::with_capacity(attachments.len() + 1);
        if !text.trim().is_empty() {
            parts.push(ContentPart::text(text));
        }
        parts.extend(urls.iter().map(|url| ContentPart::image(url, self.detail)));

        Ok(ChatTurn::multipart(Role::User, parts))
    }

    async fn resolve(&self, attachment: &ImageAttachment) -> Result<String, ChatError> {
        let encoded = self
            .store
            .read_base64(&attachment.id)
            .await
            .map_err(|e| ChatError::AttachmentResolution {
                id: attachment.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(data_url(mime_type_for(&attachment.filename), &encoded))
    }
}

/// `image/png` for `.png` files, `image/jpeg` for everything else.
pub fn mime_type_for(filename: &str) -> &'static str {
    let is_png = filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("png"));
    if is_png { "image/png" } else { "image/jpeg" }
}

pub fn data_url(mime_type: &str, base64_data: &str) -> String {
    format!("data:{};base64,{}", mime_type, base64_data)
}
