//! A scripted provider for tests and offline runs.
//!
//! Each call to `complete` pops the next scripted outcome and records the
//! request it was given. An exhausted script answers with `NotConfigured`.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use switchboard_core::error::ProviderError;
use switchboard_core::message::{Message, MessageToolCall};
use switchboard_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

/// A mock provider that replays a queue of responses.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<std::result::Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::with_outcomes(responses.into_iter().map(Ok).collect())
    }

    /// Script that may also contain errors.
    pub fn with_outcomes(
        outcomes: Vec<std::result::Result<ProviderResponse, ProviderError>>,
    ) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that returns a single text response.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![text_response(text)])
    }

    /// A provider that first requests tools, then answers.
    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, answer: &str) -> Self {
        Self::new(vec![tool_call_response(tool_calls), text_response(answer)])
    }

    /// Append another outcome to the end of the script.
    pub fn push(&self, outcome: std::result::Result<ProviderResponse, ProviderError>) {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).push_back(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request);
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::NotConfigured("scripted provider has no more responses".into()))
            })

    }
}

fn mock_usage() -> Usage {
    Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }
}

/// A text-only response costing 15 tokens and $0.0001.
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(mock_usage()),
        cost_usd: 0.0001,
        finish_reason: Some("stop".into()),
        model: "mock-model".into(),
    }
}

/// A response requesting the given tool calls.
pub fn tool_call_response(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_tool_calls("", tool_calls),
        usage: Some(mock_usage()),
        cost_usd: 0.0001,
        finish_reason: Some("tool_calls".into()),
        model: "mock-model".into(),
    }
}

/// A tool call with JSON-encoded arguments and a deterministic id.
pub fn tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_and_records_requests() {
        let provider = ScriptedProvider::tool_then_answer(
            vec![tool_call("get_wallet_balance", serde_json::json!({}))],
            "Your balance is 1,200 RWF",
        );
        let first = provider
            .complete(ProviderRequest::new("m", vec![Message::user("balance?")]))
            .await
            .unwrap();
        assert!(first.has_tool_calls());
        let second = provider.complete(ProviderRequest::new("m", vec![])).await.unwrap();
        assert_eq!(second.message.content, "Your balance is 1,200 RWF");
        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.requests()[0].messages[0].content, "balance?");

        let exhausted = provider.complete(ProviderRequest::new("m", vec![])).await;
        assert!(matches!(exhausted, Err(ProviderError::NotConfigured(_))));
    }
}
