//! The generative language model (§1): an out-of-scope black-box chat
//! API with streaming, reached over an OpenAI-compatible HTTP endpoint.
//! Two call shapes are needed: a streaming token generator (`stream_chat`,
//! used by the answer phase) and a structured-output call (`complete_structured`,
//! used by strategy/analysis/validation) that always returns — parse
//! failures are values, never panics or propagated exceptions (§7
//! `ParseFailure`, §9 "re-architect as... a strict typed parser with
//! explicit fallback defaults").

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// A streamed content delta; the orchestrator relays these directly onto
/// its event stream during the `ANSWER` phase (§4.9, §4.10).
pub type TokenStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Streams a completion for `messages` token-by-token.
    async fn stream_chat(&self, model: &str, messages: Vec<ChatMessage>) -> Result<TokenStream>;

    /// A single non-streamed completion, used by the strategy/analysis/
    /// validation phases which need the whole response before parsing it
    /// into a structured record.
    async fn complete(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String>;
}

/// Attempts to parse the first JSON object embedded in free-form prose
/// into `T`. The model is often asked for "just JSON" but still wraps it
/// in prose or a fenced code block; this extracts the first balanced
/// `{...}` span and parses that (§9 "dynamic introspection... re-architect
/// as: every LLM structured output goes through a strict typed parser").
/// Returns `None` rather than erroring — callers apply their own
/// hard-coded fallback default on `None` (§7 `ParseFailure`).
pub fn parse_structured<T: for<'de> Deserialize<'de>>(raw: &str) -> Option<T> {
    let span = first_balanced_json_object(raw)?;
    serde_json::from_str::<T>(&span).ok()
}

fn first_balanced_json_object(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let start = raw.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(raw[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// OpenAI-compatible HTTP client. Streaming uses the `text/event-stream`
/// `chat.completions` wire shape; each SSE `data:` line is a JSON
/// `chat.completion.chunk` whose `choices[0].delta.content` is forwarded.
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    fn request(&self, model: &str, messages: &[ChatMessage], stream: bool) -> Value {
        serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn stream_chat(&self, model: &str, messages: Vec<ChatMessage>) -> Result<TokenStream> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.request(model, &messages, true);
        let resp = self
            .authed(self.client.post(&url).json(&body))
            .send()
            .await
            .context("llm backend request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("llm backend returned status {}", resp.status());
        }

        let byte_stream = resp.bytes_stream();
        let token_stream = byte_stream
            .map(|chunk| chunk.context("llm backend stream error"))
            .flat_map(|chunk| {
                let tokens = match chunk {
                    Ok(bytes) => extract_sse_tokens(&bytes),
                    Err(e) => vec![Err(e)],
                };
                futures::stream::iter(tokens)
            });
        Ok(token_stream.boxed())
    }

    async fn complete(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.request(model, &messages, false);
        let resp = self
            .authed(self.client.post(&url).json(&body))
            .send()
            .await
            .context("llm backend request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("llm backend returned status {}", resp.status());
        }
        let parsed: Value = resp.json().await.context("llm backend returned invalid JSON")?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .context("llm backend response missing choices[0].message.content")?;
        Ok(content.to_string())
    }
}

fn extract_sse_tokens(bytes: &[u8]) -> Vec<Result<String>> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = Vec::new();
    for line in text.lines() {
        let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" || data.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(v) => {
                if let Some(content) = v["choices"][0]["delta"]["content"].as_str() {
                    if !content.is_empty() {
                        out.push(Ok(content.to_string()));
                    }
                }
            }
            Err(e) => out.push(Err(anyhow::anyhow!("malformed SSE chunk from llm backend: {e}"))),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        a: i32,
        b: String,
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let raw = "Sure, here you go:\n```json\n{\"a\": 1, \"b\": \"x\"}\n```\nHope that helps.";
        let parsed: Option<Probe> = parse_structured(raw);
        assert_eq!(parsed, Some(Probe { a: 1, b: "x".to_string() }));
    }

    #[test]
    fn parse_failure_returns_none_not_panic() {
        let parsed: Option<Probe> = parse_structured("not json at all");
        assert_eq!(parsed, None);
    }

    #[test]
    fn nested_braces_in_strings_do_not_break_balancing() {
        let raw = r#"{"a": 1, "b": "contains { and } braces"}"#;
        let parsed: Option<Probe> = parse_structured(raw);
        assert_eq!(parsed, Some(Probe { a: 1, b: "contains { and } braces".to_string() }));
    }

    #[test]
    fn extract_sse_tokens_skips_done_sentinel() {
        let chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
        let tokens = extract_sse_tokens(chunk);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].as_ref().unwrap(), "hi");
    }
}
