//! LLM integration - OpenAI-compatible chat completions
//!
//! This module provides:
//! - HTTP client for chat completions with timeout and retry
//! - Request/response types matching the OpenAI-compatible API

mod client;
mod types;

pub use client::{LlmClient, LlmClientBuilder};
pub use types::{ChatRequest, ChatResponse, Choice, FinishReason, LlmResponse, Message, MessageRole, Usage};
