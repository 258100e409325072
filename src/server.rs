//! HTTP surface: `POST /query` and `GET /health`.

use crate::context::HealthReport;
use crate::error::CoreError;
use crate::models::{AgentKind, DataRow, ErrorEntry, Query, QueryResult};
use crate::orchestrator::Orchestrator;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub sheet_id: Option<String>,
}

impl From<QueryRequest> for Query {
    fn from(request: QueryRequest) -> Self {
        Query {
            text: request.query,
            property_id: request.property_id,
            sheet_id: request.sheet_id,
        }
    }
}

/// Response body of `POST /query`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEnvelope {
    pub answer: String,
    pub agents_used: Vec<AgentKind>,
    pub data: BTreeMap<AgentKind, Vec<DataRow>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
    pub degraded: bool,
}

impl From<&QueryResult> for QueryEnvelope {
    fn from(result: &QueryResult) -> Self {
        Self {
            answer: result.narrative.clone(),
            agents_used: result.agents_used.clone(),
            data: result.data.clone(),
            errors: result.errors.clone(),
            degraded: result.degraded,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// HTTP status for a finished query.
pub fn status_for(result: &QueryResult) -> StatusCode {
    if !result.all_failed() {
        StatusCode::OK
    } else if result.deadline_exceeded {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/query", post(query_handler))
        .route("/health", get(health_handler))
        .with_state(orchestrator)
}

pub async fn serve(orchestrator: Arc<Orchestrator>, addr: SocketAddr) -> Result<(), ServerError> {
    info!(%addr, "Binding HTTP server");
    let app = router(orchestrator);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!(%addr, "HTTP server ready to accept connections");

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(ServerError::Serve)
}

pub async fn query_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(payload): Json<QueryRequest>,
) -> Response {
    info!(
        property = payload.property_id.as_deref(),
        sheet = payload.sheet_id.as_deref(),
        "Received /query request"
    );

    match orchestrator.handle(payload.into()).await {
        Ok(result) => {
            let status = status_for(&result);
            if status != StatusCode::OK {
                warn!(status = status.as_u16(), errors = result.errors.len(), "Query failed");
            }
            (status, Json(QueryEnvelope::from(&result))).into_response()
        }
        Err(CoreError::Validation(message)) => {
            warn!(%message, "Rejecting invalid query");
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse { error: message }),
            )
                .into_response()
        }
    }
}

pub async fn health_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Json<HealthReport> {
    Json(orchestrator.context().health())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::model::ModelReply;
    use crate::context::HealthStatus;
    use crate::error::FaultCode;
    use crate::resilience::CircuitState;
    use crate::testing::{context_with, test_config, tool_call, FakeAnalytics, FakeSheets, ScriptedModel};
    use serde_json::{json, Value};

    fn orchestrator(analytics: FakeAnalytics, sheets: FakeSheets) -> Arc<Orchestrator> {
        let model = ScriptedModel::new(|request| {
            let tool = request.tools[0].function.name.clone();
            if request.messages.last().map(|m| m.role.as_str()) == Some("tool") {
                return Ok(ModelReply::text("done"));
            }
            Ok(ModelReply::calls(vec![if tool == "query_ga4" {
                tool_call(
                    "query_ga4",
                    json!({"metrics": ["sessions"], "startDate": "today", "endDate": "today"}),
                )
            } else {
                tool_call("query_seo_sheet", json!({"tab": "Keywords"}))
            }]))
        });
        let ctx = context_with(test_config(), model, Arc::new(analytics), Arc::new(sheets));
        Arc::new(Orchestrator::new(ctx))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn request(query: &str) -> Json<QueryRequest> {
        Json(QueryRequest {
            query: query.to_string(),
            property_id: None,
            sheet_id: None,
        })
    }

    #[test]
    fn test_request_accepts_camel_case() {
        let request: QueryRequest =
            serde_json::from_value(json!({"query": "q", "propertyId": "42", "sheetId": "s"})).unwrap();
        let query = Query::from(request);
        assert_eq!(query.property_id.as_deref(), Some("42"));
        assert_eq!(query.sheet_id.as_deref(), Some("s"));
    }

    #[test]
    fn test_status_for_failures() {
        use crate::analysis::aggregate;
        use crate::error::ErrorKind;
        use crate::models::AgentResponse;

        let failed = AgentResponse::failed(
            AgentKind::Ga4,
            ErrorEntry::new(AgentKind::Ga4, ErrorKind::DeadlineExceeded, "query deadline exceeded"),
        );
        assert_eq!(
            status_for(&aggregate(vec![failed.clone()], true)),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&aggregate(vec![failed], false)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_query_ok() {
        let state = orchestrator(
            FakeAnalytics::with_rows(vec![("/", 10)]),
            FakeSheets::default(),
        );
        let response = query_handler(State(state), request("sessions today")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["answer"], "done");
        assert_eq!(body["agents_used"], json!(["GA4"]));
        assert_eq!(body["data"]["GA4"][0]["values"]["pagePath"], "/");
        assert!(body.get("errors").is_none());
        assert_eq!(body["degraded"], false);
    }

    #[tokio::test]
    async fn test_empty_query_is_bad_request() {
        let state = orchestrator(FakeAnalytics::default(), FakeSheets::default());
        let response = query_handler(State(state), request("   ")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_agents_failing_is_service_unavailable() {
        let state = orchestrator(
            FakeAnalytics::failing(FaultCode::Unavailable),
            FakeSheets::failing(FaultCode::RateLimited),
        );
        let response = query_handler(State(state.clone()), request("how is the site doing")).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
        assert_eq!(body["answer"], "");
        assert_eq!(body["degraded"], true);

        let health = health_handler(State(state)).await;
        assert_eq!(health.0.status, HealthStatus::Degraded);
        assert_eq!(health.0.dependencies["ga4"], CircuitState::Open);
        assert_eq!(health.0.dependencies["model"], CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_health_when_idle() {
        let state = orchestrator(FakeAnalytics::default(), FakeSheets::default());
        let health = health_handler(State(state)).await;
        assert_eq!(health.0.status, HealthStatus::Healthy);
    }
}
