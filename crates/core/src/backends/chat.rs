//! OpenAI-compatible chat-completions client with function calling.

use crate::error::BackendError;
use crate::traits::{ChatTurn, FunctionCall, Role, TextGenerator, ToolOutcome, ToolSpec};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

const MAX_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct OpenAiChatBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiChatBackend {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn messages(&self, prompt: &str, history: &[ChatTurn], system: Option<&str>) -> Vec<Value> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for turn in history {
            let role = match turn.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": turn.content }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));
        messages
    }

    /// Transient failures (transport errors, 5xx) retry a bounded number of
    /// times; client errors surface immediately.
    async fn post(&self, payload: Value) -> Result<Value, BackendError> {
        let mut last_failure = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = self
                .client
                .post(format!("{}/chat/completions", self.endpoint))
                .json(&payload);
            if let Some(api_key) = &self.api_key {
                request = request.bearer_auth(api_key);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json().await?);
                }
                Ok(response) if response.status().is_server_error() => {
                    last_failure = response.status().to_string();
                }
                Ok(response) => {
                    return Err(BackendError::Response {
                        backend: "chat".to_string(),
                        details: response.status().to_string(),
                    });
                }
                Err(error) => {
                    last_failure = error.to_string();
                }
            }

            if attempt < MAX_ATTEMPTS {
                warn!(attempt, %last_failure, "chat request failed, retrying");
                tokio::time::sleep(RETRY_DELAY * attempt as u32).await;
            }
        }

        Err(BackendError::RetriesExhausted {
            backend: "chat".to_string(),
            attempts: MAX_ATTEMPTS,
            details: last_failure,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiChatBackend {
    async fn generate(
        &self,
        prompt: &str,
        history: &[ChatTurn],
        system: Option<&str>,
    ) -> Result<String, BackendError> {
        let payload = json!({
            "model": self.model,
            "messages": self.messages(prompt, history, system),
        });

        let parsed = self.post(payload).await?;
        extract_content(&parsed).ok_or_else(|| BackendError::Response {
            backend: "chat".to_string(),
            details: "response has no message content".to_string(),
        })
    }

    async fn generate_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        history: &[ChatTurn],
        system: Option<&str>,
    ) -> Result<ToolOutcome, BackendError> {
        let declared: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();

        let payload = json!({
            "model": self.model,
            "messages": self.messages(prompt, history, system),
            "tools": declared,
        });

        let parsed = self.post(payload).await?;
        Ok(ToolOutcome {
            response: extract_content(&parsed).unwrap_or_default(),
            function_calls: extract_tool_calls(&parsed),
        })
    }
}

fn extract_content(parsed: &Value) -> Option<String> {
    parsed
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Wire format carries tool arguments as a JSON-encoded string; anything
/// unparseable becomes an empty object so the orchestrator can report the
/// bad call instead of the whole response failing.
fn extract_tool_calls(parsed: &Value) -> Vec<FunctionCall> {
    let Some(calls) = parsed
        .pointer("/choices/0/message/tool_calls")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    calls
        .iter()
        .filter_map(|call| {
            let name = call.pointer("/function/name")?.as_str()?.to_string();
            let arguments = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_else(|| json!({}));
            Some(FunctionCall { name, arguments })
        })
        .collect()
}
