//! Anthropic provider connector implementing the [`AIProvider`] trait.
//!
//! Uses the Messages API (`POST {base_url}/v1/messages`) directly over
//! `reqwest` rather than an SDK. The system role is lifted out of `messages`
//! into a separate `system` field and wrapped in an `ephemeral` cache-control
//! block so the (immutable) system prompt is reused by Anthropic's
//! prompt-caching across iterations — the SP never changes within a run, so
//! the cache is hot from iteration 2 onward.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    models::{ChatMessage, Role},
    providers::{clean_sql, legacy_sql_messages, AIProvider},
};

/// Default model used when a request does not name one explicitly.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A client for interacting with the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    model: String,
    http_client: Client,
}

impl AnthropicClient {
    /// Creates a new `AnthropicClient`.
    ///
    /// # Errors
    /// Returns an error string if the underlying HTTP client cannot be built.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, String> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_owned(),
            model: normalize_model_name(&model),
            http_client,
        })
    }

    async fn chat(&self, messages: &[ChatMessage], max_tokens: u32) -> Option<String> {
        let mut system_blocks = Vec::new();
        let mut turns = Vec::new();
        for message in messages {
            match message.role {
                Role::System => system_blocks.push(SystemBlock {
                    block_type: "text".to_string(),
                    text: message.content.clone(),
                    cache_control: None,
                }),
                Role::User | Role::Assistant => turns.push(Message {
                    role: message.role.as_str().to_string(),
                    content: message.content.clone(),
                }),
            }
        }

        if system_blocks.is_empty() {
            system_blocks.push(SystemBlock {
                block_type: "text".to_string(),
                text: "You are a helpful assistant.".to_string(),
                cache_control: None,
            });
        }
        if let Some(first) = system_blocks.first_mut() {
            first.cache_control = Some(CacheControl {
                cache_type: "ephemeral".to_string(),
            });
        }

        let body = RequestBody {
            model: self.model.clone(),
            max_tokens,
            system: system_blocks,
            messages: turns,
        };

        let api_url = format!("{}/v1/messages", self.base_url);
        debug!(stage = %crate::stage::current_stage(), provider = "anthropic", messages = ?body.messages, system = ?body.system, "sending chat request");
        let response = match self
            .http_client
            .post(&api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(stage = %crate::stage::current_stage(), provider = "anthropic", error = %err, "request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(stage = %crate::stage::current_stage(), provider = "anthropic", %status, body = %text, "non-success response");
            return None;
        }

        let parsed = match response.json::<ResponseBody>().await {
            Ok(body) => body,
            Err(err) => {
                warn!(stage = %crate::stage::current_stage(), provider = "anthropic", error = %err, "failed to decode response");
                return None;
            }
        };

        let text = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = text.trim();
        trace!(stage = %crate::stage::current_stage(), provider = "anthropic", response = %trimmed, "received raw response");
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Maps short/OpenRouter-style Claude model names to full Anthropic ids.
fn normalize_model_name(model: &str) -> String {
    let stripped = model.strip_prefix("anthropic/").unwrap_or(model);
    match stripped {
        "claude-haiku-4.5" => "claude-haiku-4-5-20250429".to_string(),
        "claude-sonnet-4.5" => "claude-sonnet-4-5-20250929".to_string(),
        "claude-opus-4.5" => "claude-opus-4-5-20251101".to_string(),
        "claude-3.5-haiku" => "claude-3-5-haiku-20241022".to_string(),
        "claude-3.5-sonnet" => "claude-3-5-sonnet-20241022".to_string(),
        "claude-3-opus" => "claude-3-opus-20240229".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl AIProvider for AnthropicClient {
    fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn name(&self) -> String {
        format!("Anthropic ({})", self.model)
    }

    async fn generate_sql(
        &self,
        question: &str,
        schema_docs: &str,
        conversation: Option<&[ChatMessage]>,
    ) -> Option<String> {
        if !self.is_available() {
            warn!(stage = %crate::stage::current_stage(), provider = "anthropic", "API key not available");
            return None;
        }
        let owned;
        let messages = match conversation {
            Some(conv) => conv,
            None => {
                owned = legacy_sql_messages(question, schema_docs);
                owned.as_slice()
            }
        };
        let raw = self.chat(messages, 4096).await?;
        Some(clean_sql(&raw))
    }

    async fn generate_text(&self, messages: &[ChatMessage], temperature: f32, max_tokens: u32) -> Option<String> {
        if !self.is_available() {
            warn!(stage = %crate::stage::current_stage(), provider = "anthropic", "API key not available");
            return None;
        }
        let _ = temperature;
        self.chat(messages, max_tokens).await
    }
}

#[derive(Serialize)]
struct RequestBody {
    model: String,
    max_tokens: u32,
    system: Vec<SystemBlock>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    cache_type: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ResponseBody {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::normalize_model_name;

    #[test]
    fn maps_short_names() {
        assert_eq!(
            normalize_model_name("claude-sonnet-4.5"),
            "claude-sonnet-4-5-20250929"
        );
    }

    #[test]
    fn strips_openrouter_prefix() {
        assert_eq!(
            normalize_model_name("anthropic/claude-haiku-4.5"),
            "claude-haiku-4-5-20250429"
        );
    }

    #[test]
    fn leaves_full_ids_unchanged() {
        assert_eq!(
            normalize_model_name("claude-sonnet-4-5-20250929"),
            "claude-sonnet-4-5-20250929"
        );
    }
}
