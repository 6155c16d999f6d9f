//! Local-inference fallback provider implementing the [`AIProvider`] trait.
//!
//! Calls a local OpenAI-compatible inference server (e.g. Ollama's or
//! llama.cpp server's `/v1/chat/completions`), reusing the same `reqwest`
//! request/response shape as the other HTTP back-ends. Serves as a
//! credential-free provider of last resort (see `auto_fallback_order`). See
//! DESIGN.md for the rationale behind this back-end's shape.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    models::ChatMessage,
    providers::{clean_sql, legacy_sql_messages, AIProvider},
};

/// Default base URL for a local OpenAI-compatible inference server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Default model name. Unlike every other back-end, this has no
/// provider-issued identity; whatever model the local server has loaded is
/// used, and an empty `--local-model` falls back to this placeholder.
pub const DEFAULT_MODEL: &str = "local-model";

/// A client for interacting with a local OpenAI-compatible inference server.
#[derive(Debug, Clone)]
pub struct LocalClient {
    base_url: String,
    model: String,
    http_client: Client,
}

impl LocalClient {
    /// Creates a new `LocalClient`. Unlike the hosted back-ends, no
    /// credential is required or checked.
    ///
    /// # Errors
    /// Returns an error string if the underlying HTTP client cannot be built.
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self, String> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            model,
            http_client,
        })
    }

    /// Flattens a chat transcript into a single prompt string, mirroring the
    /// original's behavior of joining role-tagged turns for a base
    /// completion-style local model, while still using the chat endpoint of
    /// the local server (most local servers accept either shape; the
    /// flattened-transcript framing is preserved as a fallback prompt for
    /// servers that only template a single string well).
    fn flatten(messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .map(|m| format!("[{}] {}", m.role.as_str().to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    async fn chat(&self, messages: &[ChatMessage], temperature: f32, max_tokens: u32) -> Option<String> {
        let api_url = format!("{}/chat/completions", self.base_url);
        let body = RequestBody {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: Self::flatten(messages),
            }],
            temperature,
            max_tokens,
        };

        debug!(stage = %crate::stage::current_stage(), provider = "local", messages = ?body.messages, "sending chat request");
        let response = match self.http_client.post(&api_url).json(&body).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(stage = %crate::stage::current_stage(), provider = "local", error = %err, "request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(stage = %crate::stage::current_stage(), provider = "local", %status, body = %text, "non-success response");
            return None;
        }

        let parsed = match response.json::<ResponseBody>().await {
            Ok(body) => body,
            Err(err) => {
                warn!(stage = %crate::stage::current_stage(), provider = "local", error = %err, "failed to decode response");
                return None;
            }
        };

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);
        trace!(stage = %crate::stage::current_stage(), provider = "local", response = ?content, "received raw response");
        content
    }
}

#[async_trait]
impl AIProvider for LocalClient {
    fn is_available(&self) -> bool {
        // No credential is ever required; availability is determined at
        // call time by whether the local server answers.
        true
    }

    fn name(&self) -> String {
        format!("Local ({})", self.model)
    }

    async fn generate_sql(
        &self,
        question: &str,
        schema_docs: &str,
        conversation: Option<&[ChatMessage]>,
    ) -> Option<String> {
        let owned;
        let messages = match conversation {
            Some(conv) => conv,
            None => {
                owned = legacy_sql_messages(question, schema_docs);
                owned.as_slice()
            }
        };
        let raw = self.chat(messages, 1.0, 15000).await?;
        Some(clean_sql(&raw))
    }

    async fn generate_text(&self, messages: &[ChatMessage], temperature: f32, max_tokens: u32) -> Option<String> {
        self.chat(messages, temperature, max_tokens).await
    }
}

#[derive(Serialize)]
struct RequestBody {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ResponseBody {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}
