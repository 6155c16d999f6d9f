//! OpenRouter provider connector implementing the [`AIProvider`] trait.
//!
//! OpenRouter aggregates many back-ends behind an OpenAI-compatible
//! `/chat/completions` endpoint, and is the only back-end this crate treats
//! as exposing a model catalog with per-model context lengths (via
//! `GET /models`) — see §4.3's context filtering rule.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    models::ChatMessage,
    providers::{clean_sql, legacy_sql_messages, AIProvider},
};

/// Default model used when a request does not name one explicitly.
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-chat";

/// A client for interacting with the OpenRouter API.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    api_key: String,
    base_url: String,
    model: String,
    http_client: Client,
}

impl OpenRouterClient {
    /// Creates a new `OpenRouterClient`.
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
            model,
            http_client,
        })
    }

    /// Fetches the provider's model catalog and returns ids with a context
    /// length at or above `min_context`, preserving catalog order.
    ///
    /// # Errors
    /// Returns an error string on any HTTP or decode failure.
    pub async fn models_with_min_context(&self, min_context: u32) -> Result<Vec<String>, String> {
        let api_url = format!("{}/models", self.base_url);
        let response = self
            .http_client
            .get(&api_url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        if !response.status().is_success() {
            return Err(format!("catalog request failed: {}", response.status()));
        }

        let catalog: CatalogResponse = response.json().await.map_err(|err| err.to_string())?;
        Ok(catalog
            .data
            .into_iter()
            .filter(|entry| entry.context_length.unwrap_or(0) >= min_context)
            .map(|entry| entry.id)
            .collect())
    }

    async fn chat(&self, messages: &[ChatMessage], temperature: f32, max_tokens: u32) -> Option<String> {
        let api_url = format!("{}/chat/completions", self.base_url);
        let body = RequestBody {
            model: self.model.clone(),
            messages: messages
                .iter()
                .map(|m| Message {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature,
            max_tokens,
        };
        debug!(stage = %crate::stage::current_stage(), provider = "openrouter", messages = ?body.messages, "sending chat request");

        let response = match self
            .http_client
            .post(&api_url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://github.com/chembldb-query")
            .header("X-Title", "chembldb-query")
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(stage = %crate::stage::current_stage(), provider = "openrouter", error = %err, "request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(stage = %crate::stage::current_stage(), provider = "openrouter", %status, body = %text, "non-success response");
            return None;
        }

        let parsed = match response.json::<ResponseBody>().await {
            Ok(body) => body,
            Err(err) => {
                warn!(stage = %crate::stage::current_stage(), provider = "openrouter", error = %err, "failed to decode response");
                return None;
            }
        };

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);
        trace!(stage = %crate::stage::current_stage(), provider = "openrouter", response = ?content, "received raw response");
        content
    }
}

#[async_trait]
impl AIProvider for OpenRouterClient {
    fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn name(&self) -> String {
        format!("OpenRouter ({})", self.model)
    }

    async fn generate_sql(
        &self,
        question: &str,
        schema_docs: &str,
        conversation: Option<&[ChatMessage]>,
    ) -> Option<String> {
        if !self.is_available() {
            warn!(stage = %crate::stage::current_stage(), provider = "openrouter", "API key not available");
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
        let raw = self.chat(messages, 1.0, 15000).await?;
        Some(clean_sql(&raw))
    }

    async fn generate_text(&self, messages: &[ChatMessage], temperature: f32, max_tokens: u32) -> Option<String> {
        if !self.is_available() {
            warn!(stage = %crate::stage::current_stage(), provider = "openrouter", "API key not available");
            return None;
        }
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

#[derive(Deserialize)]
struct CatalogResponse {
    data: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    id: String,
    context_length: Option<u32>,
}
