//! Anthropic Adapter
//!
//! Provider adapter for the Anthropic messages API.
//!
//! System turns go in a top-level `system` field rather than the message
//! list. The SSE stream carries typed JSON events; the ones that matter:
//!
//! ```text
//! data: {"type":"content_block_delta","delta":{"type":"thinking_delta","thinking":"..."}}
//! data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"..."}}
//! data: {"type":"message_stop"}
//! data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use serde_json::Value;

use super::error::ProviderError;
use super::stream::{normalized_events, sse_events, with_idle_timeout, RawChunk};
use super::traits::{ChatMessage, Credentials, EventStream, ProviderAdapter, StreamOptions};
use crate::messages::MessageRole;

/// Default endpoint
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const THINKING_BUDGET_TOKENS: u32 = 1024;

#[derive(Debug, PartialEq)]
enum Line {
    Chunks(Vec<RawChunk>),
    End,
}

/// Anthropic messages API adapter
#[derive(Clone, Debug)]
pub struct AnthropicAdapter {
    base_url: String,
    http_client: reqwest::Client,
}

impl AnthropicAdapter {
    /// Create an adapter for `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            http_client,
        }
    }

    fn messages_url(&self, credentials: &Credentials) -> String {
        let base = credentials.base_url.as_deref().unwrap_or(&self.base_url);
        format!("{}/v1/messages", base.trim_end_matches('/'))
    }

    fn build_body(model: &str, messages: &[ChatMessage], options: &StreamOptions) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let max_tokens = options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let mut body = serde_json::json!({
            "model": model,
            "messages": turns,
            "max_tokens": max_tokens,
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system.join("\n\n"));
        }
        if options.reasoning_mode && max_tokens > THINKING_BUDGET_TOKENS {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": THINKING_BUDGET_TOKENS,
            });
        } else if let Some(temperature) = options.temperature {
            // Extended thinking rejects a custom temperature
            body["temperature"] = serde_json::json!(temperature);
        }
        body
    }

    fn parse_event(data: &str) -> Result<Line, ProviderError> {
        let value: Value = serde_json::from_str(data)
            .map_err(|e| ProviderError::malformed(format!("invalid SSE JSON: {e}")))?;

        match value.get("type").and_then(Value::as_str) {
            Some("content_block_delta") => {
                let delta = value.get("delta");
                let kind = delta.and_then(|d| d.get("type")).and_then(Value::as_str);
                let chunk = match kind {
                    Some("text_delta") => delta
                        .and_then(|d| d.get("text"))
                        .and_then(Value::as_str)
                        .map(|t| RawChunk::Text(t.to_string())),
                    Some("thinking_delta") => delta
                        .and_then(|d| d.get("thinking"))
                        .and_then(Value::as_str)
                        .map(|t| RawChunk::Reasoning(t.to_string())),
                    _ => None,
                };
                Ok(Line::Chunks(chunk.into_iter().collect()))
            }
            Some("message_stop") => Ok(Line::End),
            Some("error") => {
                let message = value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown provider error");
                Err(ProviderError::Reported(message.to_string()))
            }
            _ => Ok(Line::Chunks(Vec::new())),
        }
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new(ANTHROPIC_BASE_URL)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        credentials: &Credentials,
        options: &StreamOptions,
    ) -> Result<EventStream, ProviderError> {
        let Some(key) = credentials.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            return Err(ProviderError::MissingCredentials("anthropic".to_string()));
        };

        let url = self.messages_url(credentials);
        let body = Self::build_body(model, messages, options);

        tracing::debug!(url = %url, model = %model, "Starting Anthropic messages stream");

        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http(status, &body));
        }

        let raw = sse_events(response.bytes_stream())
            .map(|data| data.and_then(|d| Self::parse_event(&d)))
            .take_while(|parsed| future::ready(!matches!(parsed, Ok(Line::End))))
            .flat_map(|parsed| {
                let items: Vec<Result<RawChunk, ProviderError>> = match parsed {
                    Ok(Line::Chunks(chunks)) => chunks.into_iter().map(Ok).collect(),
                    Ok(Line::End) => Vec::new(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            });

        let events = normalized_events(raw, options.reasoning_mode);
        Ok(with_idle_timeout(events, options.idle_timeout))
    }
}
