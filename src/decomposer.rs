//! Task decomposition - query to subtask DAG

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::OrchestratorError;
use crate::registry::AgentRegistry;
use crate::types::{Query, Subtask, SubtaskId};

/// Turns a query into an ordered list of subtasks.
///
/// Implementations must return a DAG and should return at least one
/// subtask; an empty plan is answered with an "unable to help" response
/// without dispatching anything.
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(
        &self,
        query: &Query,
        registry: &AgentRegistry,
    ) -> Result<Vec<Subtask>, OrchestratorError>;
}

/// Which earlier subtasks a rule's subtask waits for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleDependencies {
    /// Runs as a root
    None,
    /// Subtasks of these agents, when they are part of the same plan
    Agents(Vec<String>),
    /// Every subtask emitted before this one
    AllPrevious,
}

/// Keyword trigger for one agent
#[derive(Debug, Clone)]
pub struct DecompositionRule {
    /// Agent the emitted subtask is bound to
    pub agent: String,
    /// Lowercased triggers; single words match word prefixes
    pub keywords: Vec<String>,
    pub depends_on: RuleDependencies,
}

impl DecompositionRule {
    pub fn new<I, S>(agent: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agent: agent.into(),
            keywords: keywords.into_iter().map(|k| k.into().to_lowercase()).collect(),
            depends_on: RuleDependencies::None,
        }
    }

    pub fn after<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = RuleDependencies::Agents(agents.into_iter().map(Into::into).collect());
        self
    }

    pub fn after_all(mut self) -> Self {
        self.depends_on = RuleDependencies::AllPrevious;
        self
    }

    /// Keywords found in the query.
    ///
    /// Single words match the start of any query word ("recommend" matches
    /// "recommendations"); phrases match as substrings.
    fn matches(&self, lowered: &str, words: &[&str]) -> Vec<String> {
        self.keywords
            .iter()
            .filter(|kw| {
                if kw.contains(' ') {
                    lowered.contains(kw.as_str())
                } else {
                    words.iter().any(|w| w.starts_with(kw.as_str()))
                }
            })
            .cloned()
            .collect()
    }
}

/// Rule-table decomposer.
///
/// Rules are evaluated in order and may only depend on subtasks emitted by
/// earlier rules, so the output is acyclic by construction.
#[derive(Debug, Clone)]
pub struct KeywordDecomposer {
    rules: Vec<DecompositionRule>,
    fallback_agent: String,
    skip_unregistered: bool,
}

impl KeywordDecomposer {
    pub fn new(fallback_agent: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            fallback_agent: fallback_agent.into(),
            skip_unregistered: false,
        }
    }

    /// Behavioral-analytics table: pattern detection, personality
    /// estimation, recommendations and insight generation.
    pub fn personality_default(fallback_agent: impl Into<String>) -> Self {
        Self::new(fallback_agent)
            .rule(DecompositionRule::new(
                "pattern_detector",
                ["pattern", "habit", "routine", "schedule", "calendar", "trend"],
            ))
            .rule(DecompositionRule::new(
                "personality_estimator",
                ["personality", "trait", "big five", "introvert", "extrovert", "who am i"],
            ))
            .rule(
                DecompositionRule::new(
                    "recommender",
                    ["recommend", "suggest", "playlist", "music", "song", "listen", "watch"],
                )
                .after(["pattern_detector"]),
            )
            .rule(
                DecompositionRule::new(
                    "insight_generator",
                    ["insight", "why", "explain", "understand", "summar"],
                )
                .after_all(),
            )
    }

    pub fn rule(mut self, rule: DecompositionRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Skip rules whose agent is not registered
    pub fn skip_unregistered(mut self, skip: bool) -> Self {
        self.skip_unregistered = skip;
        self
    }

    pub fn rules(&self) -> &[DecompositionRule] {
        &self.rules
    }

    fn plan(&self, query: &Query, registry: &AgentRegistry) -> Vec<Subtask> {
        let lowered = query.text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let mut subtasks: Vec<Subtask> = Vec::new();
        let mut emitted: HashMap<&str, SubtaskId> = HashMap::new();

        for rule in &self.rules {
            if emitted.contains_key(rule.agent.as_str()) {
                continue;
            }
            if self.skip_unregistered && !registry.contains(&rule.agent) {
                continue;
            }
            let matched = rule.matches(&lowered, &words);
            if matched.is_empty() {
                continue;
            }

            let depends_on = match &rule.depends_on {
                RuleDependencies::None => Vec::new(),
                RuleDependencies::Agents(agents) => agents
                    .iter()
                    .filter_map(|a| emitted.get(a.as_str()).cloned())
                    .collect(),
                RuleDependencies::AllPrevious => subtasks.iter().map(|s| s.id.clone()).collect(),
            };

            let id = SubtaskId::new(format!("{}-{}", subtasks.len(), rule.agent));
            subtasks.push(Subtask {
                id: id.clone(),
                agent_name: rule.agent.clone(),
                input: json!({
                    "query": query.text,
                    "intent": rule.agent,
                    "matched": matched,
                }),
                depends_on,
            });
            emitted.insert(rule.agent.as_str(), id);
        }

        if subtasks.is_empty() {
            subtasks.push(Subtask::new(
                format!("0-{}", self.fallback_agent),
                self.fallback_agent.clone(),
                json!({ "query": query.text, "intent": "general", "matched": [] }),
            ));
        }

        subtasks
    }
}

#[async_trait]
impl Decomposer for KeywordDecomposer {
    async fn decompose(
        &self,
        query: &Query,
        registry: &AgentRegistry,
    ) -> Result<Vec<Subtask>, OrchestratorError> {
        let subtasks = self.plan(query, registry);
        debug!(
            subtasks = subtasks.len(),
            agents = ?subtasks.iter().map(|s| s.agent_name.as_str()).collect::<Vec<_>>(),
            "Decomposed query"
        );
        Ok(subtasks)
    }
}

/// Decomposer that returns a fixed plan regardless of the query
#[derive(Debug, Clone, Default)]
pub struct StaticDecomposer {
    subtasks: Vec<Subtask>,
}

impl StaticDecomposer {
    pub fn new(subtasks: Vec<Subtask>) -> Self {
        Self { subtasks }
    }
}

#[async_trait]
impl Decomposer for StaticDecomposer {
    async fn decompose(
        &self,
        _query: &Query,
        _registry: &AgentRegistry,
    ) -> Result<Vec<Subtask>, OrchestratorError> {
        Ok(self.subtasks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ExecutionPlan;

    fn decompose(decomposer: &KeywordDecomposer, text: &str) -> Vec<Subtask> {
        let registry = AgentRegistry::new();
        tokio_test::block_on(decomposer.decompose(&Query::new(text), &registry)).unwrap()
    }

    fn agents(subtasks: &[Subtask]) -> Vec<&str> {
        subtasks.iter().map(|s| s.agent_name.as_str()).collect()
    }

    #[test]
    fn test_fallback_when_nothing_matches() {
        let decomposer = KeywordDecomposer::personality_default("general");
        let subtasks = decompose(&decomposer, "hello there");

        assert_eq!(agents(&subtasks), vec!["general"]);
        assert!(subtasks[0].depends_on.is_empty());
        assert_eq!(subtasks[0].input["query"], "hello there");
    }

    #[test]
    fn test_single_match() {
        let decomposer = KeywordDecomposer::personality_default("general");
        let subtasks = decompose(&decomposer, "Can you recommend some music?");

        assert_eq!(agents(&subtasks), vec!["recommender"]);
        // pattern_detector was not planned, so no dependency
        assert!(subtasks[0].depends_on.is_empty());
        assert_eq!(subtasks[0].input["matched"], json!(["recommend", "music"]));
    }

    #[test]
    fn test_dependencies_follow_rule_table() {
        let decomposer = KeywordDecomposer::personality_default("general");
        let subtasks = decompose(
            &decomposer,
            "Look at my weekly routine, suggest a playlist and explain why",
        );

        assert_eq!(
            agents(&subtasks),
            vec!["pattern_detector", "recommender", "insight_generator"]
        );
        assert_eq!(subtasks[1].depends_on, vec![subtasks[0].id.clone()]);
        assert_eq!(
            subtasks[2].depends_on,
            vec![subtasks[0].id.clone(), subtasks[1].id.clone()]
        );
        assert!(ExecutionPlan::new(&subtasks).is_ok());
    }

    #[test]
    fn test_phrase_keywords() {
        let decomposer = KeywordDecomposer::personality_default("general");
        let subtasks = decompose(&decomposer, "What's my Big Five profile?");
        assert_eq!(agents(&subtasks), vec!["personality_estimator"]);
    }

    #[test]
    fn test_deterministic() {
        let decomposer = KeywordDecomposer::personality_default("general");
        let text = "recommend music based on my habits";
        assert_eq!(decompose(&decomposer, text), decompose(&decomposer, text));
    }

    #[test]
    fn test_skip_unregistered() {
        let decomposer = KeywordDecomposer::personality_default("general").skip_unregistered(true);
        // Nothing registered: every rule is skipped, fallback remains
        let subtasks = decompose(&decomposer, "recommend music");
        assert_eq!(agents(&subtasks), vec!["general"]);
    }

    #[test]
    fn test_static_decomposer() {
        let plan = vec![Subtask::new("a", "x", json!(1))];
        let decomposer = StaticDecomposer::new(plan.clone());
        let registry = AgentRegistry::new();
        let out =
            tokio_test::block_on(decomposer.decompose(&Query::new("anything"), &registry)).unwrap();
        assert_eq!(out, plan);
    }
}
