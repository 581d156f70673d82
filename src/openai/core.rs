use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::error::ChatError;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "user")]
    User,
}

/// Resolution hint for vision models. Sent to the API as is.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    #[default]
    Auto,
}

impl fmt::Display for ImageDetail {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ImageDetail::Low => "low",
            ImageDetail::High => "high",
            ImageDetail::Auto => "auto",
        };
        f.write_str(s)
    }
}

impl FromStr for ImageDetail {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ImageDetail::Low),
            "high" => Ok(ImageDetail::High),
            "auto" => Ok(ImageDetail::Auto),
            other => Err(format!("Unknown image detail level: {}", other)),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default)]
    pub detail: ImageDetail,
}

// {"type": "text", "text": "What is in this picture?"}
// {"type": "image_url", "image_url": {"url": "data:image/png;base64,...", "detail": "auto"}}
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: &str) -> Self {
        ContentPart::Text {
            text: text.to_string(),
        }
    }

    pub fn image(url: &str, detail: ImageDetail) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.to_string(),
                detail,
            },
        }
    }
}

/// Plain text serializes as a bare JSON string, multipart content as
/// an array of typed parts.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatTurn {
    pub fn new(role: Role, content: &str) -> Self {
        ChatTurn {
            role,
            content: MessageContent::Text(content.to_string()),
        }
    }

    pub fn system(content: &str) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn multipart(role: Role, parts: Vec<ContentPart>) -> Self {
        ChatTurn {
            role,
            content: MessageContent::Parts(parts),
        }
    }

    /// All text in the turn, joined by newlines for multipart content.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn image_count(&self) -> usize {
        match &self.content {
            MessageContent::Text(_) => 0,
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| matches!(p, ContentPart::ImageUrl { .. }))
                .count(),
        }
    }
}

/// The wire-ready payload for a single chat completion call.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub model: String,
    pub messages: Vec<ChatTurn>,
    pub stream: bool,
}

impl RequestEnvelope {
    pub fn new(model: &str, messages: Vec<ChatTurn>) -> Self {
        RequestEnvelope {
            model: model.to_string(),
            messages,
            stream: true,
        }
    }

    /// The turn being sent, always the last message.
    pub fn current_turn(&self) -> Option<&ChatTurn> {
        self.messages.last()
    }

    /// Multipart turns must carry at least one part.
    pub fn validate(&self) -> Result<(), ChatError> {
        for (idx, turn) in self.messages.iter().enumerate() {
            if let MessageContent::Parts(parts) = &turn.content
                && parts.is_empty()
            {
                return Err(ChatError::Encoding(format!(
                    "Message {} has multipart content with no parts",
                    idx
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ChatError> {
        self.validate()?;
        serde_json::to_vec(self).map_err(|e| ChatError::Encoding(e.to_string()))
    }
}
