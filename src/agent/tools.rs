//! Tool registry for the agents.
//!
//! Tool names coming back from the model are matched against a fixed set;
//! anything else resolves to an `unknown_tool` fault the model can see.

use crate::adapters::{Ga4Adapter, SheetsAdapter};
use crate::error::{Fault, FaultCode};
use crate::models::{AgentKind, TaskTarget, ToolCall, ToolResult};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Tool definition for Ollama's tool-calling API.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Every tool an agent can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    QueryGa4,
    QuerySeoSheet,
}

impl ToolName {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "query_ga4" => Some(ToolName::QueryGa4),
            "query_seo_sheet" => Some(ToolName::QuerySeoSheet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::QueryGa4 => "query_ga4",
            ToolName::QuerySeoSheet => "query_seo_sheet",
        }
    }

    /// The agent allowed to call this tool.
    pub fn owner(&self) -> AgentKind {
        match self {
            ToolName::QueryGa4 => AgentKind::Ga4,
            ToolName::QuerySeoSheet => AgentKind::Seo,
        }
    }
}

/// Dispatches tool calls to the adapters.
pub struct ToolRegistry {
    ga4: Arc<Ga4Adapter>,
    sheets: Arc<SheetsAdapter>,
}

impl ToolRegistry {
    pub fn new(ga4: Arc<Ga4Adapter>, sheets: Arc<SheetsAdapter>) -> Self {
        Self { ga4, sheets }
    }

    /// Execute one call on behalf of `agent`. Always yields a result for
    /// `call.id`, never an error.
    pub async fn execute(
        &self,
        agent: AgentKind,
        call: &ToolCall,
        target: &TaskTarget,
        deadline: Instant,
    ) -> ToolResult {
        debug!(agent = %agent, tool = %call.name, call_id = %call.id, "Executing tool");

        let tool = match ToolName::parse(&call.name) {
            Some(tool) if tool.owner() == agent => tool,
            _ => {
                return ToolResult::error(
                    call.id.clone(),
                    Fault::new(
                        FaultCode::UnknownTool,
                        format!(
                            "unknown tool '{}'; available: {}",
                            call.name,
                            tool_names_for(agent).join(", ")
                        ),
                    ),
                );
            }
        };

        let outcome = match tool {
            ToolName::QueryGa4 => self.ga4.execute(&call.arguments, target.id(), deadline).await,
            ToolName::QuerySeoSheet => {
                self.sheets
                    .execute(&call.arguments, target.id(), deadline)
                    .await
            }
        };

        match outcome {
            Ok(output) => ToolResult::success(call.id.clone(), output),
            Err(fault) => ToolResult::error(call.id.clone(), fault),
        }
    }
}

pub fn tool_names_for(agent: AgentKind) -> Vec<&'static str> {
    match agent {
        AgentKind::Ga4 => vec![ToolName::QueryGa4.as_str()],
        AgentKind::Seo => vec![ToolName::QuerySeoSheet.as_str()],
    }
}

/// Tool definitions offered to an agent of the given kind.
pub fn get_tool_definitions(agent: AgentKind) -> Vec<ToolDefinition> {
    match agent {
        AgentKind::Ga4 => vec![query_ga4_definition()],
        AgentKind::Seo => vec![query_seo_sheet_definition()],
    }
}

fn depends_on_schema() -> Value {
    json!({
        "type": "integer",
        "description": "Zero-based position of another tool call in this same turn whose result must be available before this call runs. Omit for independent calls."
    })
}

fn query_ga4_definition() -> ToolDefinition {
    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: ToolName::QueryGa4.as_str().to_string(),
            description: "Run a Google Analytics 4 report. Returns rows keyed by dimension and metric names.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "dimensions": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "GA4 dimension names, e.g. pagePath, sessionSource, country, date"
                    },
                    "metrics": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "GA4 metric names, e.g. sessions, totalUsers, screenPageViews, bounceRate"
                    },
                    "startDate": {
                        "type": "string",
                        "description": "YYYY-MM-DD, 'today', 'yesterday' or 'NdaysAgo'"
                    },
                    "endDate": {
                        "type": "string",
                        "description": "YYYY-MM-DD, 'today', 'yesterday' or 'NdaysAgo'"
                    },
                    "propertyId": {
                        "type": "string",
                        "description": "GA4 property id. Omit to use the default property."
                    },
                    "orderBy": {
                        "type": "string",
                        "description": "A requested metric or dimension to sort by, descending"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum rows to return (default: 10)"
                    },
                    "depends_on": depends_on_schema()
                },
                "required": ["metrics", "startDate", "endDate"]
            }),
        },
    }
}

fn query_seo_sheet_definition() -> ToolDefinition {
    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: ToolName::QuerySeoSheet.as_str().to_string(),
            description: "Read SEO data (rankings, keywords, backlinks) from the SEO spreadsheet. The first row of the range is the header.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "tab": {
                        "type": "string",
                        "description": "Sheet tab name, e.g. Keywords or Backlinks"
                    },
                    "range": {
                        "type": "string",
                        "description": "A1 range such as A1:F500. Combined with tab when both are given."
                    },
                    "filters": {
                        "type": "array",
                        "description": "Row filters, all of which must match",
                        "items": {
                            "type": "object",
                            "properties": {
                                "column": {"type": "string"},
                                "op": {
                                    "type": "string",
                                    "enum": ["eq", "ne", "contains", "gt", "gte", "lt", "lte"]
                                },
                                "value": {"type": ["string", "number"]}
                            },
                            "required": ["column", "op", "value"]
                        }
                    },
                    "cursor": {
                        "type": "string",
                        "description": "nextCursor from a previous call to fetch the next page"
                    },
                    "pageSize": {
                        "type": "integer",
                        "description": "Rows per page (default: 100)"
                    },
                    "depends_on": depends_on_schema()
                },
                "required": []
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_context;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_1_0".to_string(),
            name: name.to_string(),
            arguments,
            depends_on: None,
        }
    }

    fn deadline() -> Instant {
        Instant::now() + std::time::Duration::from_secs(30)
    }

    #[test]
    fn test_tool_definitions_per_agent() {
        let ga4 = get_tool_definitions(AgentKind::Ga4);
        assert_eq!(ga4.len(), 1);
        assert_eq!(ga4[0].function.name, "query_ga4");

        let seo = get_tool_definitions(AgentKind::Seo);
        assert_eq!(seo[0].function.name, "query_seo_sheet");
        assert!(seo[0].function.parameters["properties"]["cursor"].is_object());
    }

    #[test]
    fn test_tool_name_parse() {
        assert_eq!(ToolName::parse("query_ga4"), Some(ToolName::QueryGa4));
        assert_eq!(ToolName::parse("rm_rf"), None);
        assert_eq!(ToolName::QuerySeoSheet.owner(), AgentKind::Seo);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fault_result() {
        let ctx = test_context();
        let result = ctx
            .tools
            .execute(
                AgentKind::Ga4,
                &call("delete_property", json!({})),
                &TaskTarget::Property("42".to_string()),
                deadline(),
            )
            .await;

        assert_eq!(result.call_id, "call_1_0");
        assert_eq!(result.error.unwrap().code, FaultCode::UnknownTool);
    }

    #[tokio::test]
    async fn test_tool_of_other_agent_is_rejected() {
        let ctx = test_context();
        let result = ctx
            .tools
            .execute(
                AgentKind::Ga4,
                &call("query_seo_sheet", json!({"tab": "Keywords"})),
                &TaskTarget::Property("42".to_string()),
                deadline(),
            )
            .await;

        assert_eq!(result.error.unwrap().code, FaultCode::UnknownTool);
    }
}
