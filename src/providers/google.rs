//! Google Gemini provider connector implementing the [`AIProvider`] trait.
//!
//! Uses the `generateContent` API, which has a distinct wire shape from the
//! OpenAI-style chat-completions family: messages become `contents` with a
//! `role`/`parts` shape, and the system role is lifted out into a separate
//! `system_instruction` field.

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
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

/// A client for interacting with the Google Gemini API.
#[derive(Debug, Clone)]
pub struct GoogleClient {
    api_key: String,
    base_url: String,
    model: String,
    http_client: Client,
}

impl GoogleClient {
    /// Creates a new `GoogleClient`.
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
            .user_agent(format!("chembldb-query/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_owned(),
            model,
            http_client,
        })
    }

    /// Splits a chat transcript into Gemini's `(system_instruction, contents)` shape.
    fn messages_to_contents(messages: &[ChatMessage]) -> (Option<String>, Vec<Content>) {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();
        for message in messages {
            match message.role {
                Role::System => system_parts.push(message.content.clone()),
                Role::User | Role::Assistant => {
                    let role = if matches!(message.role, Role::Assistant) {
                        "model"
                    } else {
                        "user"
                    };
                    contents.push(Content {
                        role: role.to_string(),
                        parts: vec![Part {
                            text: message.content.clone(),
                        }],
                    });
                }
            }
        }
        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system_instruction, contents)
    }

    async fn chat(&self, messages: &[ChatMessage], temperature: f32, max_tokens: u32) -> Option<String> {
        let (system_instruction, contents) = Self::messages_to_contents(messages);

        let body = RequestBody {
            contents,
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens: max_tokens,
            },
            system_instruction: system_instruction.map(|text| SystemInstruction {
                parts: vec![Part { text }],
            }),
        };

        let api_url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model
        );

        debug!(stage = %crate::stage::current_stage(), provider = "google", contents = ?body.contents, "sending chat request");
        let response = match self
            .http_client
            .post(&api_url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(stage = %crate::stage::current_stage(), provider = "google", error = %err, "request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(stage = %crate::stage::current_stage(), provider = "google", %status, body = %text, "non-success response");
            return None;
        }

        let parsed = match response.json::<ResponseBody>().await {
            Ok(body) => body,
            Err(err) => {
                warn!(stage = %crate::stage::current_stage(), provider = "google", error = %err, "failed to decode response");
                return None;
            }
        };

        let candidate = parsed.candidates.into_iter().next()?;
        let text = candidate
            .content
            .parts
            .into_iter()
            .map(|part| part.text)
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = text.trim();
        trace!(stage = %crate::stage::current_stage(), provider = "google", response = %trimmed, "received raw response");
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

#[async_trait]
impl AIProvider for GoogleClient {
    fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn name(&self) -> String {
        format!("Google ({})", self.model)
    }

    async fn generate_sql(
        &self,
        question: &str,
        schema_docs: &str,
        conversation: Option<&[ChatMessage]>,
    ) -> Option<String> {
        if !self.is_available() {
            warn!(stage = %crate::stage::current_stage(), provider = "google", "API key not available");
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
            warn!(stage = %crate::stage::current_stage(), provider = "google", "API key not available");
            return None;
        }
        self.chat(messages, temperature, max_tokens).await
    }
}

#[derive(Serialize)]
struct RequestBody {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct ResponseBody {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: ContentResponse,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentResponse {
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::GoogleClient;
    use crate::models::ChatMessage;

    #[test]
    fn splits_system_from_contents() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ];
        let (system, contents) = GoogleClient::messages_to_contents(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].role, "user");
        assert_eq!(contents[1].role, "model");
    }
}
