//! Result synthesis - merge partial subtask outcomes into one response

use serde_json::Value;

use crate::types::{AgentResult, Query, Subtask, SynthesizedResponse};

/// Combines subtask results into a response.
///
/// Must accept any mix of successes and failures and always produce a
/// non-empty summary.
pub trait Synthesizer: Send + Sync {
    fn synthesize(
        &self,
        query: &Query,
        subtasks: &[Subtask],
        results: &[AgentResult],
    ) -> SynthesizedResponse;
}

/// Line-per-agent summary built from successful payloads
#[derive(Debug, Clone, Default)]
pub struct SummarySynthesizer;

impl SummarySynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Text contributed by one payload
    fn extract(payload: &Value) -> String {
        match payload {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("summary")
                .or_else(|| map.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| payload.to_string()),
            other => other.to_string(),
        }
    }
}

impl Synthesizer for SummarySynthesizer {
    fn synthesize(
        &self,
        query: &Query,
        subtasks: &[Subtask],
        results: &[AgentResult],
    ) -> SynthesizedResponse {
        // Plan order first, then anything not in the plan
        let mut ordered: Vec<&AgentResult> = subtasks
            .iter()
            .filter_map(|s| results.iter().find(|r| r.subtask_id == s.id))
            .collect();
        ordered.extend(
            results
                .iter()
                .filter(|r| !subtasks.iter().any(|s| s.id == r.subtask_id)),
        );

        let succeeded_count = ordered.iter().filter(|r| r.is_success()).count();
        let failed_count = ordered.len() - succeeded_count;

        let lines: Vec<String> = ordered
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| {
                let text = Self::extract(r.payload.as_ref()?);
                let text = text.trim();
                (!text.is_empty()).then(|| format!("[{}] {}", r.agent_name, text))
            })
            .collect();

        let summary = if !lines.is_empty() {
            lines.join("\n")
        } else if ordered.is_empty() {
            format!("I'm unable to help with \"{}\" right now.", query.text)
        } else if succeeded_count > 0 {
            format!("Nothing to report for \"{}\".", query.text)
        } else {
            format!("No agent could answer \"{}\".", query.text)
        };

        SynthesizedResponse {
            query: query.text.clone(),
            results: ordered.into_iter().cloned().collect(),
            summary,
            succeeded_count,
            failed_count,
            latency_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;
    use serde_json::json;

    fn subtask(id: &str, agent: &str) -> Subtask {
        Subtask::new(id, agent, json!({}))
    }

    #[test]
    fn test_empty_plan_has_fallback_summary() {
        let response = SummarySynthesizer::new().synthesize(&Query::new("tell me a joke"), &[], &[]);
        assert_eq!(response.succeeded_count, 0);
        assert_eq!(response.failed_count, 0);
        assert!(response.summary.contains("unable to help"));
        assert!(response.results.is_empty());
    }

    #[test]
    fn test_all_failed_is_degraded_not_error() {
        let a = subtask("a", "recommender");
        let results = vec![AgentResult::failure(&a, FailureKind::Timeout, "slow", 100, 2)];

        let response = SummarySynthesizer::new().synthesize(&Query::new("music?"), &[a], &results);
        assert_eq!(response.succeeded_count, 0);
        assert_eq!(response.failed_count, 1);
        assert_eq!(response.summary, "No agent could answer \"music?\".");
        assert_eq!(response.results.len(), 1);
    }

    #[test]
    fn test_summary_uses_only_successes() {
        let a = subtask("a", "pattern_detector");
        let b = subtask("b", "recommender");
        let c = subtask("c", "insight_generator");
        let results = vec![
            AgentResult::failure(&c, FailureKind::DependencyFailed, "dep", 0, 0),
            AgentResult::success(&a, json!({ "summary": "You run on Tuesdays" }), 5, 1),
            AgentResult::success(&b, json!("Try some jazz"), 5, 1),
        ];

        let response = SummarySynthesizer::new().synthesize(
            &Query::new("q"),
            &[a, b, c],
            &results,
        );

        assert_eq!(response.succeeded_count, 2);
        assert_eq!(response.failed_count, 1);
        assert_eq!(
            response.summary,
            "[pattern_detector] You run on Tuesdays\n[recommender] Try some jazz"
        );
        // failures are kept for diagnostics, in plan order
        let ids: Vec<&str> = response.results.iter().map(|r| r.subtask_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_payload_extraction() {
        assert_eq!(SummarySynthesizer::extract(&json!({ "message": "hi" })), "hi");
        assert_eq!(SummarySynthesizer::extract(&json!({ "score": 3 })), "{\"score\":3}");
        assert_eq!(SummarySynthesizer::extract(&json!(42)), "42");
    }

    #[test]
    fn test_blank_payloads_still_give_summary() {
        let a = subtask("a", "general");
        let results = vec![AgentResult::success(&a, json!("   "), 1, 1)];
        let response = SummarySynthesizer::new().synthesize(&Query::new("q"), &[a], &results);
        assert_eq!(response.succeeded_count, 1);
        assert!(!response.summary.is_empty());
    }

    #[test]
    fn test_synthesis_is_idempotent() {
        let a = subtask("a", "x");
        let b = subtask("b", "y");
        let subtasks = vec![a.clone(), b.clone()];
        let results = vec![
            AgentResult::success(&a, json!({ "summary": "one" }), 1, 1),
            AgentResult::failure(&b, FailureKind::InternalError, "boom", 1, 1),
        ];
        let synth = SummarySynthesizer::new();
        let query = Query::new("q");

        assert_eq!(
            synth.synthesize(&query, &subtasks, &results),
            synth.synthesize(&query, &subtasks, &results)
        );
    }
}
