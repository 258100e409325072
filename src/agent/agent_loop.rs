//! Agent runtime: the bounded model/tool loop for one task.
//!
//! A runtime alternates between asking the model for its next turn and
//! executing the tool calls that turn requested. It ends `Completed` when
//! the model answers without tool calls, and `Failed` on a model fault, an
//! unrecoverable tool fault, or when the iteration ceiling is reached.
//! Recoverable tool faults are handed back to the model as tool results so
//! it can correct its arguments.

use crate::agent::model::{ChatMessage, ModelReply, ModelRequest, ToolCallFunction};
use crate::agent::tools::get_tool_definitions;
use crate::context::AppContext;
use crate::error::{ErrorKind, Fault};
use crate::models::{
    AgentKind, AgentResponse, AgentStatus, AgentTask, DataRow, ErrorEntry, Provenance,
    TaskTarget, ToolCall, ToolExchange, ToolResult,
};
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Where the runtime is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    ExecutingTools,
    Completed,
    Failed,
}

pub struct AgentRuntime {
    ctx: Arc<AppContext>,
    task: AgentTask,
    deadline: Instant,
    state: LoopState,
    messages: Vec<ChatMessage>,
    pending: Vec<ToolCall>,
    exchanges: Vec<ToolExchange>,
    rows: Vec<DataRow>,
    errors: Vec<ErrorEntry>,
    narrative: String,
    iterations: usize,
}

impl AgentRuntime {
    pub fn new(ctx: Arc<AppContext>, task: AgentTask, deadline: Instant) -> Self {
        info!(
            agent = %task.kind,
            target = %task.target.id(),
            max_iterations = ctx.config.agent.max_iterations,
            "Agent runtime created"
        );

        Self {
            ctx,
            task,
            deadline,
            state: LoopState::AwaitingModel,
            messages: Vec::new(),
            pending: Vec::new(),
            exchanges: Vec::new(),
            rows: Vec::new(),
            errors: Vec::new(),
            narrative: String::new(),
            iterations: 0,
        }
    }

    /// Drive the loop to a terminal state.
    pub async fn run(mut self) -> AgentResponse {
        let kind = self.task.kind;
        self.messages
            .push(ChatMessage::system(system_prompt(kind, &self.task.target)));
        self.messages.push(ChatMessage::user(self.task.subquery.clone()));

        let max_iterations = self.ctx.config.agent.max_iterations;

        loop {
            match self.state {
                LoopState::AwaitingModel => {
                    if self.iterations >= max_iterations {
                        warn!(agent = %kind, iterations = self.iterations, "Iteration limit reached");
                        self.errors.push(ErrorEntry::new(
                            kind,
                            ErrorKind::IterationLimit,
                            format!("no final answer after {} model turns", max_iterations),
                        ));
                        self.transition(LoopState::Failed);
                        continue;
                    }

                    self.iterations += 1;
                    debug!(agent = %kind, iteration = self.iterations, "Agent iteration");

                    match self.request_model().await {
                        Ok(reply) => self.accept_reply(reply),
                        Err(fault) => {
                            warn!(agent = %kind, code = %fault.code, "Model call failed");
                            self.errors.push(ErrorEntry::from_model(kind, &fault));
                            self.transition(LoopState::Failed);
                        }
                    }
                }
                LoopState::ExecutingTools => {
                    let calls = std::mem::take(&mut self.pending);
                    let results = self.execute_calls(&calls).await;

                    if self.record_results(calls, results) {
                        self.transition(LoopState::Failed);
                    } else {
                        self.prune_old_messages();
                        self.transition(LoopState::AwaitingModel);
                    }
                }
                LoopState::Completed | LoopState::Failed => break,
            }
        }

        self.into_response()
    }

    fn transition(&mut self, next: LoopState) {
        debug!(agent = %self.task.kind, from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    async fn request_model(&self) -> Result<ModelReply, Fault> {
        let request = ModelRequest {
            messages: self.messages.clone(),
            tools: get_tool_definitions(self.task.kind),
        };

        let model = self.ctx.model.clone();
        self.ctx
            .model_guard
            .call(self.deadline, || {
                let model = model.clone();
                let request = request.clone();
                async move { model.complete(&request).await }
            })
            .await
    }

    fn accept_reply(&mut self, reply: ModelReply) {
        if !reply.content.trim().is_empty() {
            self.narrative = reply.content.trim().to_string();
        }

        if reply.is_final() {
            info!(agent = %self.task.kind, iterations = self.iterations, "Agent produced final answer");
            self.messages
                .push(ChatMessage::assistant(reply.content, Vec::new()));
            self.transition(LoopState::Completed);
            return;
        }

        self.pending = assign_call_ids(self.iterations, &reply.tool_calls);
        self.messages
            .push(ChatMessage::assistant(reply.content, reply.tool_calls));
        self.transition(LoopState::ExecutingTools);
    }

    /// Run one turn's calls, honoring `depends_on`. Returns exactly one
    /// result per call, in call order.
    async fn execute_calls(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let plan = plan_waves(calls);
        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];

        for (index, fault) in plan.rejected {
            slots[index] = Some(ToolResult::error(calls[index].id.clone(), fault));
        }

        for wave in plan.waves {
            let futures = wave.iter().map(|&index| {
                self.ctx.tools.execute(
                    self.task.kind,
                    &calls[index],
                    &self.task.target,
                    self.deadline,
                )
            });
            let results = join_all(futures).await;

            for (index, result) in wave.into_iter().zip(results) {
                slots[index] = Some(result);
            }
        }

        slots
            .into_iter()
            .zip(calls)
            .map(|(slot, call)| {
                slot.unwrap_or_else(|| {
                    ToolResult::error(
                        call.id.clone(),
                        Fault::invalid_argument("call was not scheduled"),
                    )
                })
            })
            .collect()
    }

    /// Record results in call order. Returns true if any fault is one the
    /// model cannot correct.
    fn record_results(&mut self, calls: Vec<ToolCall>, results: Vec<ToolResult>) -> bool {
        let kind = self.task.kind;
        let mut terminal = false;

        for (call, result) in calls.into_iter().zip(results) {
            self.messages
                .push(ChatMessage::tool(call.name.clone(), result.to_model_content()));

            match result.error {
                Some(ref fault) => {
                    debug!(agent = %kind, call_id = %call.id, code = %fault.code, "Tool call failed");
                    self.errors.push(ErrorEntry::from_tool(kind, &call, fault));
                    if !fault.code.is_caller_correctable() {
                        terminal = true;
                    }
                }
                None => {
                    let rows = extract_rows(kind, &call, &result.output);
                    info!(agent = %kind, tool = %call.name, rows = rows.len(), "Tool executed");
                    self.rows.extend(rows);
                }
            }

            self.exchanges.push(ToolExchange { call, result });
        }

        terminal
    }

    /// Drop the oldest whole turns so the conversation stays within the
    /// context window. The system prompt and the question are always kept.
    fn prune_old_messages(&mut self) {
        let window = self.ctx.config.agent.max_context_messages;
        let keep_start = 2;

        if self.messages.len() <= keep_start + window {
            return;
        }

        // Never split a tool result from the assistant turn that requested it.
        let mut cut = self.messages.len() - window;
        while cut > keep_start && self.messages[cut].role != "assistant" {
            cut -= 1;
        }

        if cut > keep_start {
            self.messages.drain(keep_start..cut);
            debug!("Pruned {} old messages to save context", cut - keep_start);
        }
    }

    fn into_response(self) -> AgentResponse {
        let completed = self.state == LoopState::Completed;
        info!(
            agent = %self.task.kind,
            completed,
            iterations = self.iterations,
            rows = self.rows.len(),
            errors = self.errors.len(),
            "Agent runtime finished"
        );

        AgentResponse {
            kind: self.task.kind,
            status: if completed {
                AgentStatus::Completed
            } else {
                AgentStatus::Failed
            },
            degraded: !completed,
            narrative: self.narrative,
            rows: self.rows,
            errors: self.errors,
            iterations: self.iterations,
            exchanges: self.exchanges,
        }
    }
}

/// Give each call in a turn a stable id and pull out its dependency.
fn assign_call_ids(turn: usize, functions: &[ToolCallFunction]) -> Vec<ToolCall> {
    functions
        .iter()
        .enumerate()
        .map(|(index, function)| {
            let mut arguments = function.arguments.clone();
            let depends_on = arguments
                .as_object_mut()
                .and_then(|args| args.remove("depends_on"))
                .and_then(|v| match v {
                    Value::Number(n) => n.as_u64().map(|n| n as usize),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                });

            ToolCall {
                id: format!("call_{}_{}", turn, index),
                name: function.name.clone(),
                arguments,
                depends_on,
            }
        })
        .collect()
}

/// Execution order for one turn.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct WavePlan {
    /// Call indices per wave; every call in a wave may run concurrently.
    pub waves: Vec<Vec<usize>>,
    /// Calls that cannot run, with the fault to report for them.
    pub rejected: Vec<(usize, Fault)>,
}

pub(crate) fn plan_waves(calls: &[ToolCall]) -> WavePlan {
    let mut memo: Vec<Option<Result<usize, Fault>>> = vec![None; calls.len()];
    let mut visiting = vec![false; calls.len()];

    for index in 0..calls.len() {
        depth_of(index, calls, &mut memo, &mut visiting);
    }

    let mut plan = WavePlan::default();
    for (index, depth) in memo.into_iter().enumerate() {
        match depth {
            Some(Ok(depth)) => {
                if plan.waves.len() <= depth {
                    plan.waves.resize_with(depth + 1, Vec::new);
                }
                plan.waves[depth].push(index);
            }
            Some(Err(fault)) => plan.rejected.push((index, fault)),
            None => plan
                .rejected
                .push((index, Fault::invalid_argument("call was not scheduled"))),
        }
    }
    plan.waves.retain(|wave| !wave.is_empty());
    plan
}

fn depth_of(
    index: usize,
    calls: &[ToolCall],
    memo: &mut [Option<Result<usize, Fault>>],
    visiting: &mut [bool],
) -> Result<usize, Fault> {
    if let Some(ref known) = memo[index] {
        return known.clone();
    }
    if visiting[index] {
        return Err(Fault::invalid_argument(format!(
            "depends_on cycle involving call {}",
            index
        )));
    }

    let depth = match calls[index].depends_on {
        None => Ok(0),
        Some(dep) if dep == index || dep >= calls.len() => Err(Fault::invalid_argument(format!(
            "depends_on {} does not name another call in this turn",
            dep
        ))),
        Some(dep) => {
            visiting[index] = true;
            let parent = depth_of(dep, calls, memo, visiting);
            visiting[index] = false;
            parent.map(|d| d + 1).map_err(|_| {
                Fault::invalid_argument(format!("depends_on {} cannot be satisfied", dep))
            })
        }
    };

    memo[index] = Some(depth.clone());
    depth
}

/// Rows from a successful tool result, tagged with where they came from.
fn extract_rows(agent: AgentKind, call: &ToolCall, output: &Value) -> Vec<DataRow> {
    let Some(rows) = output.get("rows").and_then(Value::as_array) else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(Value::as_object)
        .map(|values| DataRow {
            source: Provenance {
                agent,
                tool: call.name.clone(),
                call_id: call.id.clone(),
            },
            values: values.clone(),
        })
        .collect()
}

fn system_prompt(kind: AgentKind, target: &TaskTarget) -> String {
    let today = Utc::now().format("%Y-%m-%d");
    match kind {
        AgentKind::Ga4 => format!(
            "You are a web analytics assistant answering questions from Google Analytics 4 data.\n\
             Today is {today}. The GA4 property is {id}.\n\n\
             Use the query_ga4 tool to fetch the data you need. Use GA4 API names for \
             dimensions and metrics (for example pagePath, sessionSource, sessions, totalUsers). \
             Dates are YYYY-MM-DD, 'today', 'yesterday' or 'NdaysAgo'.\n\
             If a tool returns an error, fix the arguments and try again.\n\
             When you have the data, answer in a few sentences without calling any tool. \
             When listing items, keep the order the tool returned them in and include the numbers.",
            today = today,
            id = target.id()
        ),
        AgentKind::Seo => format!(
            "You are an SEO assistant answering questions from an SEO spreadsheet \
             (keyword rankings, clicks, impressions, backlinks).\n\
             Today is {today}. The spreadsheet id is {id}.\n\n\
             Use the query_seo_sheet tool with a tab name such as Keywords or Backlinks. \
             The first row of a tab is its header; filter on those column names. \
             If the result has a nextCursor and you need more rows, call again with that cursor.\n\
             If a tool returns an error, fix the arguments and try again.\n\
             When you have the data, answer in a few sentences without calling any tool.",
            today = today,
            id = target.id()
        ),
    }
}
