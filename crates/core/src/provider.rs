//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of chunks.

use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// How the model may pick tools. `None` lets the backend decide.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    /// A plain request with no tools.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Attach tool schemas. A non-empty list also sets tool choice to `auto`.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tool_choice = if tools.is_empty() { None } else { Some(ToolChoice::Auto) };
        self.tools = tools;
        self
    }
}

/// Tool selection policy sent with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::None => "none",
            Self::Required => "required",
        }
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Estimated cost of this call in USD
    #[serde(default)]
    pub cost_usd: f64,

    /// Why generation stopped ("stop", "tool_calls", "length", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

impl ProviderResponse {
    /// Total tokens reported for this call, zero when the backend sent no usage.
    pub fn total_tokens(&self) -> u32 {
        self.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0)
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.message.tool_calls.is_empty()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A fragment of a tool call delivered incrementally while streaming.
///
/// Fragments sharing an `index` belong to the same call: the first usually
/// carries the id and name, later ones append to the argument string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Partial tool call deltas
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_fragments: Vec<ToolCallFragment>,

    /// Set on the chunk that carries the backend's finish reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Drain a chunk stream and fold it into a complete response.
///
/// Content deltas are concatenated; tool-call fragments are merged by
/// index and emitted in index order. The stream ends at the first chunk
/// with `done` set, or when the sender is dropped.
pub async fn collect_stream(
    model: &str,
    mut rx: mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
) -> std::result::Result<ProviderResponse, ProviderError> {
    let mut content = String::new();
    let mut calls: BTreeMap<u32, ToolCallFragment> = BTreeMap::new();
    let mut usage = None;
    let mut finish_reason = None;

    while let Some(chunk) = rx.recv().await {
        let chunk = chunk?;
        if let Some(delta) = chunk.content {
            content.push_str(&delta);
        }
        for fragment in chunk.tool_call_fragments {
            let acc = calls.entry(fragment.index).or_insert_with(|| ToolCallFragment {
                index: fragment.index,
                ..Default::default()
            });
            if fragment.id.is_some() {
                acc.id = fragment.id;
            }
            if fragment.name.is_some() {
                acc.name = fragment.name;
            }
            acc.arguments.push_str(&fragment.arguments);
        }
        if chunk.finish_reason.is_some() {
            finish_reason = chunk.finish_reason;
        }
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }
        if chunk.done {
            break;
        }
    }

    let tool_calls = calls
        .into_values()
        .map(|acc| MessageToolCall {
            id: acc.id.unwrap_or_else(|| format!("call_{}", acc.index)),
            name: acc.name.unwrap_or_default(),
            arguments: acc.arguments,
        })
        .collect();

    let mut message = Message::assistant(content);
    message.tool_calls = tool_calls;

    Ok(ProviderResponse {
        message,
        usage,
        cost_usd: 0.0,
        finish_reason,
        model: model.to_string(),
    })
}

/// An embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// The model to use for embeddings (e.g., "text-embedding-3-small").
    pub model: String,

    /// The texts to embed.
    pub inputs: Vec<String>,
}

/// An embedding response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The embedding vectors, one per input text.
    pub embeddings: Vec<Vec<f32>>,

    /// Which model was used.
    pub model: String,

    /// Token usage.
    pub usage: Option<Usage>,
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The orchestrator calls
/// `complete()` or `stream()` without knowing which backend is in use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let fragments = response
            .message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, tc)| ToolCallFragment {
                index: i as u32,
                id: Some(tc.id),
                name: Some(tc.name),
                arguments: tc.arguments,
            })
            .collect();
        let chunk = StreamChunk {
            content: Some(response.message.content),
            tool_call_fragments: fragments,
            finish_reason: response.finish_reason,
            done: true,
            usage: response.usage,
        };
        let _ = tx.send(Ok(chunk)).await;
        Ok(rx)
    }

    /// Generate embeddings for the given texts.
    ///
    /// Default implementation returns an error indicating embeddings aren't supported.
    async fn embed(
        &self,
        _request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::NotConfigured(
            format!("Provider '{}' does not support embeddings", self.name()),
        ))
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_tools_sets_auto_choice() {
        let tool = ToolDefinition {
            name: "get_wallet_balance".into(),
            description: "Look up the caller's wallet balance".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        };
        let req = ProviderRequest::new("gpt-4o-mini", vec![]).with_tools(vec![tool]);
        assert_eq!(req.tool_choice, Some(ToolChoice::Auto));

        let bare = ProviderRequest::new("gpt-4o-mini", vec![]).with_tools(vec![]);
        assert!(bare.tool_choice.is_none());
        assert!((bare.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn collect_stream_merges_fragments_by_index() {
        let (tx, rx) = mpsc::channel(8);
        let opening = StreamChunk {
            content: Some("Checking ".into()),
            tool_call_fragments: vec![
                ToolCallFragment {
                    index: 1,
                    id: Some("call_b".into()),
                    name: Some("get_trip_details".into()),
                    arguments: "{\"trip".into(),
                },
                ToolCallFragment {
                    index: 0,
                    id: Some("call_a".into()),
                    name: Some("search_routes".into()),
                    arguments: "{".into(),
                },
            ],
            ..Default::default()
        };
        let closing = StreamChunk {
            content: Some("routes".into()),
            tool_call_fragments: vec![
                ToolCallFragment { index: 0, arguments: "}".into(), ..Default::default() },
                ToolCallFragment { index: 1, arguments: "\":1}".into(), ..Default::default() },
            ],
            finish_reason: Some("tool_calls".into()),
            ..Default::default()
        };
        let done = StreamChunk {
            done: true,
            usage: Some(Usage { prompt_tokens: 10, completion_tokens: 4, total_tokens: 14 }),
            ..Default::default()
        };
        for chunk in [opening, closing, done] {
            tx.send(Ok(chunk)).await.unwrap();
        }


        let resp = collect_stream("gpt-4o-mini", rx).await.unwrap();
        assert_eq!(resp.message.content, "Checking routes");
        assert_eq!(resp.message.tool_calls.len(), 2);
        assert_eq!(resp.message.tool_calls[0].name, "search_routes");
        assert_eq!(resp.message.tool_calls[0].arguments, "{}");
        assert_eq!(resp.message.tool_calls[1].arguments, "{\"trip\":1}");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(resp.total_tokens(), 14);
    }

    #[tokio::test]
    async fn collect_stream_propagates_errors() {
        let (tx, rx) = mpsc::channel(2);
        tx.send(Err(ProviderError::StreamInterrupted("reset".into()))).await.unwrap();
        drop(tx);
        let err = collect_stream("m", rx).await.unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));
    }
}
