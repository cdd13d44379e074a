//! LLM integration module.
//!
//! Provides an OpenAI-compatible client for LLM API calls, reply cleaning,
//! and the prompts used for extraction, answering and grading.

mod client;
pub mod parse;
mod prompts;

pub use client::{ContentPart, FileData, LlmClient, LlmResponse, Message, MessageContent, Role};
pub use prompts::Prompts;
