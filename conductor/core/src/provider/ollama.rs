//! Ollama Adapter
//!
//! Provider adapter for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! `/api/chat` streams newline-delimited JSON objects:
//!
//! ```text
//! {"message":{"role":"assistant","content":"Hel"},"done":false}
//! {"message":{"role":"assistant","content":"lo"},"done":false}
//! {"done":true,"eval_count":12}
//! ```
//!
//! Reasoning models either put `<think>` tags in `content` or, on newer
//! servers, send a separate `thinking` field. Both end up as reasoning.

use std::time::Duration;

use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use serde_json::Value;

use super::error::ProviderError;
use super::stream::{byte_lines, normalized_events, with_idle_timeout, RawChunk};
use super::traits::{ChatMessage, Credentials, EventStream, ProviderAdapter, StreamOptions};

/// One parsed NDJSON line
#[derive(Debug, PartialEq)]
enum Line {
    Chunks(Vec<RawChunk>),
    End,
}

/// Ollama adapter
#[derive(Clone, Debug)]
pub struct OllamaAdapter {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaAdapter {
    /// Create a new Ollama adapter
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            host: host.into(),
            port,
            http_client,
        }
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get chat endpoint URL, honoring a credentials override
    fn chat_url(&self, credentials: &Credentials) -> String {
        let base = credentials
            .base_url
            .clone()
            .unwrap_or_else(|| self.base_url());
        format!("{}/api/chat", base.trim_end_matches('/'))
    }

    /// Build the request body
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

        let mut model_options = serde_json::Map::new();
        if let Some(temperature) = options.temperature {
            model_options.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(max_tokens) = options.max_tokens {
            model_options.insert("num_predict".to_string(), serde_json::json!(max_tokens));
        }
        if !model_options.is_empty() {
            body["options"] = Value::Object(model_options);
        }

        body
    }

    /// Parse one NDJSON line
    fn parse_line(line: &str) -> Result<Line, ProviderError> {
        let data: Value = serde_json::from_str(line)
            .map_err(|e| ProviderError::malformed(format!("invalid JSON from Ollama: {e}")))?;

        if let Some(error) = data.get("error").and_then(Value::as_str) {
            return Err(ProviderError::Reported(error.to_string()));
        }

        let mut chunks = Vec::new();
        if let Some(message) = data.get("message") {
            if let Some(thinking) = message.get("thinking").and_then(Value::as_str) {
                if !thinking.is_empty() {
                    chunks.push(RawChunk::Reasoning(thinking.to_string()));
                }
            }
            if let Some(content) = message.get("content").and_then(Value::as_str) {
                if !content.is_empty() {
                    chunks.push(RawChunk::Text(content.to_string()));
                }
            }
        }

        let done = data.get("done").and_then(Value::as_bool).unwrap_or(false);
        if done && chunks.is_empty() {
            return Ok(Line::End);
        }
        Ok(Line::Chunks(chunks))
    }
}

impl Default for OllamaAdapter {
    fn default() -> Self {
        Self::new("localhost", 11434)
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        credentials: &Credentials,
        options: &StreamOptions,
    ) -> Result<EventStream, ProviderError> {
        let url = self.chat_url(credentials);
        let body = Self::build_body(model, messages, options);

        tracing::debug!(url = %url, model = %model, "Starting Ollama chat stream");

        let response = self.http_client.post(&url).json(&body).send().await?;

        // Check for HTTP errors
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http(status, &body));
        }

        let raw = byte_lines(response.bytes_stream())
            .map(|line| line.and_then(|l| Self::parse_line(&l)))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageRole;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ollama_adapter_creation() {
        let adapter = OllamaAdapter::new("localhost", 11434);
        assert_eq!(adapter.host, "localhost");
        assert_eq!(adapter.port, 11434);
        assert_eq!(adapter.base_url(), "http://localhost:11434");
        assert_eq!(adapter.name(), "ollama");
        assert!(!adapter.requires_credentials());
    }

    #[test]
    fn test_chat_url_override() {
        let adapter = OllamaAdapter::default();
        assert_eq!(
            adapter.chat_url(&Credentials::default()),
            "http://localhost:11434/api/chat"
        );
        let creds = Credentials::default().with_base_url("http://gpu-box:9000/");
        assert_eq!(adapter.chat_url(&creds), "http://gpu-box:9000/api/chat");
    }

    #[test]
    fn test_build_body() {
        let messages = vec![ChatMessage::system("Be brief"), ChatMessage::user("Hi")];
        let options = StreamOptions {
            temperature: Some(0.5),
            max_tokens: Some(64),
            ..Default::default()
        };
        let body = OllamaAdapter::build_body("llama3.2", &messages, &options);

        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], MessageRole::System.as_str());
        assert_eq!(body["messages"][1]["content"], "Hi");
        assert_eq!(body["options"]["num_predict"], 64);

        let plain = OllamaAdapter::build_body("m", &messages, &StreamOptions::default());
        assert!(plain.get("options").is_none());
    }

    #[test]
    fn test_parse_line_content_and_thinking() {
        let line = r#"{"message":{"role":"assistant","content":"Hi","thinking":"hmm"},"done":false}"#;
        assert_eq!(
            OllamaAdapter::parse_line(line).unwrap(),
            Line::Chunks(vec![
                RawChunk::Reasoning("hmm".into()),
                RawChunk::Text("Hi".into())
            ])
        );
    }

    #[test]
    fn test_parse_line_done_and_error() {
        assert_eq!(
            OllamaAdapter::parse_line(r#"{"message":{"content":""},"done":true}"#).unwrap(),
            Line::End
        );
        let err = OllamaAdapter::parse_line(r#"{"error":"model 'x' not found"}"#).unwrap_err();
        assert_eq!(err.to_string(), "model 'x' not found");
        assert!(OllamaAdapter::parse_line("not json").is_err());
    }
}
