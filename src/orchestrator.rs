//! Query orchestration.
//!
//! Routes a question to its agents, runs one runtime per agent
//! concurrently under a shared deadline, and aggregates what comes back.

use crate::adapters::ga4::normalize_property_id;
use crate::agent::AgentRuntime;
use crate::analysis::aggregate;
use crate::context::AppContext;
use crate::error::{CoreError, ErrorKind};
use crate::models::{AgentKind, AgentResponse, AgentTask, ErrorEntry, Query, QueryResult, TaskTarget};
use crate::router::{normalize, route};
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// A task ready to run, or one rejected during planning.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedTask {
    Ready(AgentTask),
    Rejected { kind: AgentKind, reason: String },
}

pub struct Orchestrator {
    ctx: Arc<AppContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Decide which agents run and what they target.
    pub fn plan(&self, query: &Query) -> Result<Vec<PlannedTask>, CoreError> {
        let text = query.text.trim();
        if normalize(text).is_empty() {
            return Err(CoreError::validation("query text is empty"));
        }

        let kinds = route(text);
        let planned: Vec<PlannedTask> = kinds
            .into_iter()
            .map(|kind| match self.resolve_target(kind, query) {
                Ok(target) => PlannedTask::Ready(AgentTask {
                    kind,
                    subquery: text.to_string(),
                    target,
                }),
                Err(reason) => PlannedTask::Rejected { kind, reason },
            })
            .collect();

        if let [PlannedTask::Rejected { reason, .. }] = planned.as_slice() {
            return Err(CoreError::Validation(reason.clone()));
        }

        Ok(planned)
    }

    fn resolve_target(&self, kind: AgentKind, query: &Query) -> Result<TaskTarget, String> {
        match kind {
            AgentKind::Ga4 => {
                let raw = query
                    .property_id
                    .as_deref()
                    .or(self.ctx.config.ga4.property_id.as_deref())
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        "no GA4 property id: pass propertyId or set ga4.property_id".to_string()
                    })?;
                normalize_property_id(raw)
                    .map(TaskTarget::Property)
                    .map_err(|fault| fault.message)
            }
            AgentKind::Seo => query
                .sheet_id
                .as_deref()
                .or(self.ctx.config.sheets.sheet_id.as_deref())
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| TaskTarget::Sheet(id.to_string()))
                .ok_or_else(|| "no SEO sheet id: pass sheetId or set sheets.sheet_id".to_string()),
        }
    }

    /// Answer one query. Only validation problems are errors; everything
    /// else is reported inside the result.
    pub async fn handle(&self, query: Query) -> Result<QueryResult, CoreError> {
        let planned = self.plan(&query)?;
        let deadline = Instant::now() + self.ctx.config.agent.query_deadline();

        let kinds: Vec<AgentKind> = planned
            .iter()
            .map(|p| match p {
                PlannedTask::Ready(task) => task.kind,
                PlannedTask::Rejected { kind, .. } => *kind,
            })
            .collect();
        info!(agents = ?kinds, "Dispatching query");

        let runs = planned.into_iter().map(|planned| {
            let ctx = self.ctx.clone();
            async move {
                match planned {
                    PlannedTask::Ready(task) => AgentRuntime::new(ctx, task, deadline).run().await,
                    PlannedTask::Rejected { kind, reason } => {
                        warn!(agent = %kind, reason = %reason, "Task rejected");
                        AgentResponse::failed(kind, ErrorEntry::new(kind, ErrorKind::Validation, reason))
                    }
                }
            }
        });
        let responses = join_all(runs).await;

        let deadline_exceeded =
            Instant::now() >= deadline || responses.iter().any(AgentResponse::hit_deadline);
        if deadline_exceeded {
            warn!("Query deadline exceeded");
        }

        let result = aggregate(responses, deadline_exceeded);
        info!(
            completed = result.completed_count(),
            rows = result.total_rows(),
            errors = result.errors.len(),
            degraded = result.degraded,
            "Query finished"
        );

        Ok(result)
    }
}
