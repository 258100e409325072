//! Data models for the orchestration core.
//!
//! This module contains the structures that flow between the router, the
//! agent runtimes and the aggregator: queries, tasks, tool calls and their
//! results, per-agent responses and the final query result.

use crate::error::{ErrorKind, Fault, FaultCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// The data domain an agent is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    /// Website analytics backed by the GA4 Data API.
    #[serde(rename = "GA4")]
    Ga4,
    /// SEO performance backed by a spreadsheet.
    #[serde(rename = "SEO")]
    Seo,
}

impl AgentKind {
    pub fn label(&self) -> &'static str {
        match self {
            AgentKind::Ga4 => "GA4",
            AgentKind::Seo => "SEO",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A user question with optional per-request overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub property_id: Option<String>,
    pub sheet_id: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            property_id: None,
            sheet_id: None,
        }
    }

    pub fn with_property_id(mut self, property_id: impl Into<String>) -> Self {
        self.property_id = Some(property_id.into());
        self
    }

    pub fn with_sheet_id(mut self, sheet_id: impl Into<String>) -> Self {
        self.sheet_id = Some(sheet_id.into());
        self
    }
}

/// The data source a task resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTarget {
    Property(String),
    Sheet(String),
}

impl TaskTarget {
    pub fn id(&self) -> &str {
        match self {
            TaskTarget::Property(id) | TaskTarget::Sheet(id) => id,
        }
    }
}

/// One unit of work handed to an agent runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTask {
    pub kind: AgentKind,
    pub subquery: String,
    pub target: TaskTarget,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within the owning runtime's conversation.
    pub id: String,
    pub name: String,
    pub arguments: Value,
    /// Position of another call in the same turn that must finish first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<usize>,
}

/// Result of executing a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Fault>,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, output: Value) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            output,
            error: None,
        }
    }

    pub fn error(call_id: impl Into<String>, fault: Fault) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            output: Value::Null,
            error: Some(fault),
        }
    }

    /// Text handed back to the model for this result.
    pub fn to_model_content(&self) -> String {
        match &self.error {
            Some(fault) => serde_json::json!({
                "error": { "code": fault.code, "message": fault.message }
            })
            .to_string(),
            None => self.output.to_string(),
        }
    }
}

/// A tool call paired with the single result that answers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExchange {
    pub call: ToolCall,
    pub result: ToolResult,
}

/// Which agent and tool call produced a data row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub agent: AgentKind,
    pub tool: String,
    pub call_id: String,
}

/// One structured row of data returned by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub source: Provenance,
    pub values: Map<String, Value>,
}

/// Terminal state of an agent runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Completed,
    Failed,
}

/// An error surfaced in a query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentKind>,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<FaultCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub message: String,
}

impl ErrorEntry {
    /// Entry for a failed tool result.
    pub fn from_tool(agent: AgentKind, call: &ToolCall, fault: &Fault) -> Self {
        Self {
            agent: Some(agent),
            kind: ErrorKind::for_tool_fault(fault.code),
            code: Some(fault.code),
            tool: Some(call.name.clone()),
            call_id: Some(call.id.clone()),
            message: fault.message.clone(),
        }
    }

    /// Entry for a failed model completion.
    pub fn from_model(agent: AgentKind, fault: &Fault) -> Self {
        Self {
            agent: Some(agent),
            kind: ErrorKind::for_model_fault(fault.code),
            code: Some(fault.code),
            tool: None,
            call_id: None,
            message: fault.message.clone(),
        }
    }

    pub fn new(agent: AgentKind, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            agent: Some(agent),
            kind,
            code: None,
            tool: None,
            call_id: None,
            message: message.into(),
        }
    }
}

/// What one agent runtime produced when it reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub kind: AgentKind,
    pub status: AgentStatus,
    /// Set when the runtime stopped before a final answer.
    pub degraded: bool,
    pub narrative: String,
    pub rows: Vec<DataRow>,
    pub errors: Vec<ErrorEntry>,
    /// Number of model turns taken.
    pub iterations: usize,
    pub exchanges: Vec<ToolExchange>,
}

impl AgentResponse {
    /// A response for a task that failed before its runtime started.
    pub fn failed(kind: AgentKind, error: ErrorEntry) -> Self {
        Self {
            kind,
            status: AgentStatus::Failed,
            degraded: true,
            narrative: String::new(),
            rows: Vec::new(),
            errors: vec![error],
            iterations: 0,
            exchanges: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == AgentStatus::Failed
    }

    /// Whether this response failed because the query deadline expired.
    pub fn hit_deadline(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.kind == ErrorKind::DeadlineExceeded)
    }
}

/// The merged answer for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Responses in task order (GA4 before SEO).
    pub responses: Vec<AgentResponse>,
    pub narrative: String,
    pub agents_used: Vec<AgentKind>,
    /// Rows grouped by the agent that produced them.
    pub data: BTreeMap<AgentKind, Vec<DataRow>>,
    pub errors: Vec<ErrorEntry>,
    pub degraded: bool,
    pub deadline_exceeded: bool,
}

impl QueryResult {
    /// True when no agent reached `Completed`.
    pub fn all_failed(&self) -> bool {
        !self.responses.is_empty() && self.responses.iter().all(AgentResponse::is_failed)
    }

    pub fn completed_count(&self) -> usize {
        self.responses.iter().filter(|r| !r.is_failed()).count()
    }

    pub fn total_rows(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_kind_ordering_and_labels() {
        assert!(AgentKind::Ga4 < AgentKind::Seo);
        assert_eq!(AgentKind::Ga4.to_string(), "GA4");
        assert_eq!(serde_json::to_string(&AgentKind::Seo).unwrap(), "\"SEO\"");
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new("top pages")
            .with_property_id("123")
            .with_sheet_id("abc");
        assert_eq!(query.property_id.as_deref(), Some("123"));
        assert_eq!(query.sheet_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_tool_result_model_content() {
        let ok = ToolResult::success("call_1_0", json!({"rows": []}));
        assert_eq!(ok.to_model_content(), r#"{"rows":[]}"#);

        let err = ToolResult::error("call_1_1", Fault::invalid_argument("unknown metric 'foo'"));
        let content: Value = serde_json::from_str(&err.to_model_content()).unwrap();
        assert_eq!(content["error"]["code"], "invalid_argument");
        assert!(!err.success);
    }

    #[test]
    fn test_failed_response_is_degraded() {
        let response = AgentResponse::failed(
            AgentKind::Seo,
            ErrorEntry::new(AgentKind::Seo, ErrorKind::Validation, "no sheet id"),
        );
        assert!(response.is_failed());
        assert!(response.degraded);
        assert_eq!(response.errors.len(), 1);
        assert!(!response.hit_deadline());
    }

    #[test]
    fn test_query_result_data_keys_serialize_as_labels() {
        let mut data = BTreeMap::new();
        data.insert(AgentKind::Ga4, Vec::new());
        let result = QueryResult {
            responses: Vec::new(),
            narrative: String::new(),
            agents_used: vec![AgentKind::Ga4],
            data,
            errors: Vec::new(),
            degraded: false,
            deadline_exceeded: false,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["data"].get("GA4").is_some());
        assert!(!result.all_failed());
    }
}
