//! Chat model client.
//!
//! The agent runtime talks to the model through [`ChatModel`]; the
//! production implementation speaks Ollama's `/api/chat` tool-calling API.

use crate::adapters::{classify_status, classify_transport};
use crate::agent::tools::ToolDefinition;
use crate::error::Fault;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const SERVICE: &str = "model";

/// Message in the chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
    /// Name of the tool a `tool` message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallFunction>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(
                    tool_calls
                        .into_iter()
                        .map(|function| ToolCallMessage { function })
                        .collect(),
                )
            },
            tool_name: None,
        }
    }

    pub fn tool(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_calls: None,
            tool_name: Some(tool_name.into()),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallMessage {
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One completion request: the conversation so far and the tools on offer.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// The model's turn: either a final answer (no tool calls) or tool calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallFunction>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCallFunction>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
        }
    }

    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, Fault>;
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    stream: bool,
    options: OllamaOptions,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallMessage>>,
}

pub struct OllamaClient {
    http_client: reqwest::Client,
    base_url: String,
    model_name: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OllamaClient {
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        model_name: impl Into<String>,
        temperature: f32,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model_name: model_name.into(),
            temperature,
            api_key,
        }
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, Fault> {
        let url = format!("{}/api/chat", self.base_url);

        let body = OllamaChatRequest {
            model: &self.model_name,
            messages: &request.messages,
            tools: &request.tools,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        debug!(
            model = %self.model_name,
            messages = request.messages.len(),
            "Sending chat request"
        );

        let mut builder = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport(SERVICE, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(SERVICE, status, &body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| classify_transport(SERVICE, &e))?;

        let tool_calls = chat_response
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| normalize_arguments(call.function))
            .collect();

        Ok(ModelReply {
            content: chat_response.message.content,
            tool_calls,
        })
    }
}

/// Some models send arguments as a JSON-encoded string.
fn normalize_arguments(mut function: ToolCallFunction) -> ToolCallFunction {
    if let Value::String(ref raw) = function.arguments {
        function.arguments =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()));
    } else if function.arguments.is_null() {
        function.arguments = Value::Object(Default::default());
    }
    function
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_message_omits_empty_tool_calls() {
        let message = ChatMessage::assistant("done", vec![]);
        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_name").is_none());
    }

    #[test]
    fn test_tool_message_carries_name() {
        let message = ChatMessage::tool("query_ga4", "{}");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_name"], "query_ga4");
    }

    #[test]
    fn test_parse_ollama_tool_call_response() {
        let raw = json!({
            "model": "llama3.1:8b",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "query_ga4", "arguments": {"metrics": ["sessions"]}}}
                ]
            },
            "done": true
        });
        let response: OllamaChatResponse = serde_json::from_value(raw).unwrap();
        let calls = response.message.tool_calls.unwrap();
        assert_eq!(calls[0].function.name, "query_ga4");
    }

    #[test]
    fn test_string_arguments_are_decoded() {
        let function = normalize_arguments(ToolCallFunction {
            name: "query_seo_sheet".to_string(),
            arguments: Value::String(r#"{"tab":"Keywords"}"#.to_string()),
        });
        assert_eq!(function.arguments["tab"], "Keywords");

        let function = normalize_arguments(ToolCallFunction {
            name: "query_seo_sheet".to_string(),
            arguments: Value::Null,
        });
        assert!(function.arguments.is_object());
    }

    #[test]
    fn test_model_reply_final() {
        assert!(ModelReply::text("answer").is_final());
        let reply = ModelReply::calls(vec![ToolCallFunction {
            name: "query_ga4".to_string(),
            arguments: json!({}),
        }]);
        assert!(!reply.is_final());
    }
}
