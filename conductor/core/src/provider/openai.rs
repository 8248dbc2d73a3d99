//! OpenAI-Compatible Adapter
//!
//! Provider adapter for the chat completions API, served by OpenAI itself
//! and by most local inference servers (llama.cpp, vLLM, LM Studio).
//!
//! The response is an SSE stream of `data:` lines, each a JSON chunk with a
//! `choices[0].delta`. Reasoning arrives either in `delta.reasoning_content`
//! (or `delta.reasoning`) or as tags inside `delta.content`. `data: [DONE]`
//! ends the stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use serde_json::Value;

use super::error::ProviderError;
use super::stream::{normalized_events, sse_events, with_idle_timeout, RawChunk};
use super::traits::{ChatMessage, Credentials, EventStream, ProviderAdapter, StreamOptions};

/// Default endpoint for the hosted OpenAI API
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default endpoint for a local OpenAI-compatible server
pub const LOCAL_BASE_URL: &str = "http://127.0.0.1:8080/v1";

/// One parsed SSE line
#[derive(Debug, PartialEq)]
enum Line {
    Chunks(Vec<RawChunk>),
    End,
}

/// OpenAI-compatible chat completions adapter
#[derive(Clone, Debug)]
pub struct OpenAiAdapter {
    name: &'static str,
    base_url: String,
    requires_key: bool,
    http_client: reqwest::Client,
}

impl OpenAiAdapter {
    /// Adapter for the hosted OpenAI API; needs an API key
    pub fn hosted() -> Self {
        Self::new("openai", OPENAI_BASE_URL, true)
    }

    /// Adapter for a local server at `base_url`; no API key needed
    pub fn local(base_url: impl Into<String>) -> Self {
        Self::new("local", base_url, false)
    }

    fn new(name: &'static str, base_url: impl Into<String>, requires_key: bool) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            name,
            base_url: base_url.into(),
            requires_key,
            http_client,
        }
    }

    fn completions_url(&self, credentials: &Credentials) -> String {
        let base = credentials.base_url.as_deref().unwrap_or(&self.base_url);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    fn build_body(model: &str, messages: &[ChatMessage], options: &StreamOptions) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    fn parse_event(data: &str) -> Result<Line, ProviderError> {
        if data == "[DONE]" {
            return Ok(Line::End);
        }

        let value: Value = serde_json::from_str(data)
            .map_err(|e| ProviderError::malformed(format!("invalid SSE JSON: {e}")))?;

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown provider error");
            return Err(ProviderError::Reported(message.to_string()));
        }

        let mut chunks = Vec::new();
        let delta = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("delta"));
        if let Some(delta) = delta {
            let reasoning = delta
                .get("reasoning_content")
                .or_else(|| delta.get("reasoning"))
                .and_then(Value::as_str);
            if let Some(text) = reasoning.filter(|t| !t.is_empty()) {
                chunks.push(RawChunk::Reasoning(text.to_string()));
            }
            if let Some(text) = delta
                .get("content")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
            {
                chunks.push(RawChunk::Text(text.to_string()));
            }
        }
        Ok(Line::Chunks(chunks))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn requires_credentials(&self) -> bool {
        self.requires_key
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        credentials: &Credentials,
        options: &StreamOptions,
    ) -> Result<EventStream, ProviderError> {
        if self.requires_key && !credentials.has_api_key() {
            return Err(ProviderError::MissingCredentials(self.name.to_string()));
        }

        let url = self.completions_url(credentials);
        let body = Self::build_body(model, messages, options);

        tracing::debug!(provider = self.name, url = %url, model = %model, "Starting chat completions stream");

        let mut request = self
            .http_client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);
        if let Some(key) = credentials.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
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
