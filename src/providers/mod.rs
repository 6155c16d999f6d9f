//! LLM provider abstraction module.
//!
//! Exposes a uniform [`AIProvider`] trait over several HTTP-API back-ends
//! plus a local-inference fallback, and the [`Provider`] tag enum used to
//! name a back-end in config, CLI flags, and log output.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::ChatMessage;

/// An enum tagging the available LLM back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// OpenAI Chat Completions API.
    OpenAI,
    /// Anthropic Messages API (Claude models), with prompt-caching support.
    Anthropic,
    /// Google Gemini `generateContent` API.
    Google,
    /// OpenRouter, an aggregator exposing OpenAI-compatible endpoints.
    OpenRouter,
    /// Cerebras, OpenAI-compatible ultra-fast inference.
    Cerebras,
    /// DeepSeek, OpenAI-compatible low-cost inference.
    DeepSeek,
    /// Z.AI, OpenAI-compatible inference.
    ZAi,
    /// A local OpenAI-compatible inference endpoint (no credential required).
    Local,
}

impl Provider {
    /// Returns the canonical string identifier for the provider.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::OpenRouter => "openrouter",
            Provider::Cerebras => "cerebras",
            Provider::DeepSeek => "deepseek",
            Provider::ZAi => "zai",
            Provider::Local => "local",
        }
    }

    /// Attempts to resolve a provider from a string alias (case-insensitive).
    #[must_use]
    pub fn from_alias(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "openai" | "gpt" => Some(Provider::OpenAI),
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "google" | "gemini" => Some(Provider::Google),
            "openrouter" | "open_router" => Some(Provider::OpenRouter),
            "cerebras" => Some(Provider::Cerebras),
            "deepseek" => Some(Provider::DeepSeek),
            "zai" | "z_ai" | "z.ai" => Some(Provider::ZAi),
            "local" => Some(Provider::Local),
            _ => None,
        }
    }

    /// Returns `true` when `model` looks like a Claude model identifier,
    /// including the `anthropic/` prefix OpenRouter uses.
    #[must_use]
    pub fn model_implies_claude(model: &str) -> bool {
        let lowered = model.to_lowercase();
        lowered.contains("claude")
    }

    /// The fixed fallback order `auto` mode walks when no model hint favors
    /// a particular back-end. `Local` is always last: it never requires a
    /// credential and so is never a competitive first choice.
    #[must_use]
    pub fn auto_fallback_order() -> &'static [Provider] {
        &[
            Provider::Anthropic,
            Provider::OpenAI,
            Provider::Google,
            Provider::OpenRouter,
            Provider::Cerebras,
            Provider::DeepSeek,
            Provider::ZAi,
            Provider::Local,
        ]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A common trait for all LLM provider clients.
///
/// Methods return `None` on any failure (HTTP error, timeout, malformed
/// body, missing content) rather than propagating `AppError`: the core
/// treats a nil response as a retryable per-attempt failure (see the error
/// handling design's taxonomy 2), so providers log the underlying cause at
/// `warn` and hand back `None`.
#[async_trait]
pub trait AIProvider: Send + Sync + fmt::Debug {
    /// Whether a credential is present and the client was constructed.
    fn is_available(&self) -> bool;

    /// Human-readable name, including the model id, e.g. `"Anthropic (claude-sonnet-4-5)"`.
    fn name(&self) -> String;

    /// Generates a SQL query. When `conversation` is supplied it is
    /// authoritative and replaces any legacy prompt synthesis; `schema_docs`
    /// is only used to build a prompt when `conversation` is absent.
    async fn generate_sql(
        &self,
        question: &str,
        schema_docs: &str,
        conversation: Option<&[ChatMessage]>,
    ) -> Option<String>;

    /// Free-form chat completion; returns the raw (uncleaned) response text.
    async fn generate_text(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Option<String>;
}

pub mod anthropic;
pub mod cerebras;
pub mod deepseek;
pub mod factory;
pub mod google;
mod legacy_prompt;
pub mod local;
pub mod openai;
pub mod openrouter;
mod sql_clean;
pub mod zai;

pub use factory::build_provider;
pub use legacy_prompt::legacy_sql_messages;
pub use sql_clean::clean_sql;
