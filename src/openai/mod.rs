//! Client for OpenAI compatible Chat Completions endpoints.

pub mod client;
pub mod core;
pub mod error;
pub mod request;
pub mod sse;

pub use client::{
    ChatStream, ClientOptions, DEFAULT_RETRY_AFTER_SECS, StreamEvent, StreamingChatClient,
    resolve_endpoint,
};
pub use self::core::{
    ChatTurn, ContentPart, ImageDetail, ImageUrl, MessageContent, RequestEnvelope, Role,
};
pub use error::ChatError;
pub use request::{RequestBuilder, data_url, mime_type_for};
