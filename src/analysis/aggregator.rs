//! Result aggregation and statistics.
//!
//! Merges the per-agent responses of one query into a single result and
//! computes the per-agent summary shown in reports.

use crate::models::{AgentKind, AgentResponse, AgentStatus, DataRow, ErrorEntry, QueryResult};
use std::collections::BTreeMap;

/// Merge agent responses into one result. `responses` must be in task
/// order; the output keeps GA4 ahead of SEO regardless.
pub fn aggregate(mut responses: Vec<AgentResponse>, deadline_exceeded: bool) -> QueryResult {
    responses.sort_by_key(|r| r.kind);

    let agents_used: Vec<AgentKind> = responses.iter().map(|r| r.kind).collect();

    let mut data: BTreeMap<AgentKind, Vec<DataRow>> = BTreeMap::new();
    for response in &responses {
        if !response.rows.is_empty() {
            data.entry(response.kind)
                .or_default()
                .extend(response.rows.iter().cloned());
        }
    }

    let errors: Vec<ErrorEntry> = responses
        .iter()
        .flat_map(|r| {
            r.errors.iter().cloned().map(move |mut e| {
                if e.agent.is_none() {
                    e.agent = Some(r.kind);
                }
                e
            })
        })
        .collect();

    let all_failed = !responses.is_empty() && responses.iter().all(AgentResponse::is_failed);
    let narrative = if all_failed {
        String::new()
    } else {
        merge_narratives(&responses)
    };

    let degraded = deadline_exceeded || responses.iter().any(|r| r.degraded || r.is_failed());

    QueryResult {
        responses,
        narrative,
        agents_used,
        data,
        errors,
        degraded,
        deadline_exceeded,
    }
}

/// Join the narratives that have text. With more than one contributor each
/// gets a heading naming its agent.
fn merge_narratives(responses: &[AgentResponse]) -> String {
    let contributing: Vec<&AgentResponse> = responses
        .iter()
        .filter(|r| !r.narrative.trim().is_empty())
        .collect();

    match contributing.as_slice() {
        [] => String::new(),
        [only] => only.narrative.trim().to_string(),
        many => many
            .iter()
            .map(|r| format!("## {}\n\n{}", r.kind, r.narrative.trim()))
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

/// Per-agent numbers for reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub rows: usize,
    pub errors: usize,
    pub iterations: usize,
    pub tool_calls: usize,
}

pub fn summarize(result: &QueryResult) -> Vec<AgentSummary> {
    result
        .responses
        .iter()
        .map(|r| AgentSummary {
            kind: r.kind,
            status: r.status,
            rows: r.rows.len(),
            errors: r.errors.len(),
            iterations: r.iterations,
            tool_calls: r.exchanges.len(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::Provenance;
    use serde_json::{json, Map};

    fn row(agent: AgentKind, key: &str) -> DataRow {
        let mut values = Map::new();
        values.insert("key".to_string(), json!(key));
        DataRow {
            source: Provenance {
                agent,
                tool: "tool".to_string(),
                call_id: "call_1_0".to_string(),
            },
            values,
        }
    }

    fn completed(kind: AgentKind, narrative: &str, rows: Vec<DataRow>) -> AgentResponse {
        AgentResponse {
            kind,
            status: AgentStatus::Completed,
            degraded: false,
            narrative: narrative.to_string(),
            rows,
            errors: Vec::new(),
            iterations: 2,
            exchanges: Vec::new(),
        }
    }

    fn failed(kind: AgentKind) -> AgentResponse {
        AgentResponse::failed(
            kind,
            ErrorEntry::new(kind, ErrorKind::ToolExecution, "backend down"),
        )
    }

    #[test]
    fn test_single_agent_has_no_heading() {
        let result = aggregate(
            vec![completed(AgentKind::Ga4, "Top page is /.", vec![row(AgentKind::Ga4, "/")])],
            false,
        );
        assert_eq!(result.narrative, "Top page is /.");
        assert_eq!(result.agents_used, vec![AgentKind::Ga4]);
        assert_eq!(result.data[&AgentKind::Ga4].len(), 1);
        assert!(!result.degraded);
    }

    #[test]
    fn test_ga4_before_seo_with_headings() {
        let result = aggregate(
            vec![
                completed(AgentKind::Seo, "Rankings improved.", vec![row(AgentKind::Seo, "rust")]),
                completed(AgentKind::Ga4, "Traffic is up.", vec![]),
            ],
            false,
        );
        assert_eq!(result.agents_used, vec![AgentKind::Ga4, AgentKind::Seo]);
        assert_eq!(
            result.narrative,
            "## GA4\n\nTraffic is up.\n\n## SEO\n\nRankings improved."
        );
        assert!(!result.data.contains_key(&AgentKind::Ga4));
        assert_eq!(result.data[&AgentKind::Seo][0].source.agent, AgentKind::Seo);
    }

    #[test]
    fn test_partial_failure_is_degraded() {
        let result = aggregate(
            vec![completed(AgentKind::Ga4, "Traffic is up.", vec![]), failed(AgentKind::Seo)],
            false,
        );
        assert_eq!(result.narrative, "Traffic is up.");
        assert!(result.degraded);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].agent, Some(AgentKind::Seo));
        assert!(!result.all_failed());
    }

    #[test]
    fn test_all_failed_has_empty_narrative() {
        let mut ga4 = failed(AgentKind::Ga4);
        ga4.narrative = "partial".to_string();
        let result = aggregate(vec![ga4, failed(AgentKind::Seo)], true);
        assert!(result.all_failed());
        assert!(result.narrative.is_empty());
        assert_eq!(result.errors.len(), 2);
        assert!(result.deadline_exceeded);
    }

    #[test]
    fn test_summarize_counts() {
        let result = aggregate(
            vec![
                completed(AgentKind::Ga4, "ok", vec![row(AgentKind::Ga4, "/"), row(AgentKind::Ga4, "/a")]),
                failed(AgentKind::Seo),
            ],
            false,
        );
        let summary = summarize(&result);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].rows, 2);
        assert_eq!(summary[0].iterations, 2);
        assert_eq!(summary[1].status, AgentStatus::Failed);
        assert_eq!(summary[1].errors, 1);
    }
}
