//! Streaming chat completions against OpenAI compatible APIs, with
//! support for image attachments.
pub mod attachments;
pub mod chat;
pub mod cli;
pub mod core;
pub mod openai;
