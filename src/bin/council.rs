//! council demo binary.
//!
//! Wires a handful of sample behavioral-analytics agents into an
//! orchestrator and answers one query from the command line, printing the
//! synthesized response as JSON.
//!
//! # Environment Variables
//!
//! - `COUNCIL_CONFIG`: Path to a TOML config file (otherwise `COUNCIL_*` variables)
//! - `COUNCIL_SESSION`: Session id to record the exchange under
//! - `RUST_LOG`: Tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin council -- "recommend music based on my habits"
//! ```

use std::sync::Arc;

use anyhow::{bail, Context as _};
use serde_json::{json, Value};

use council::{
    telemetry, AgentContext, AgentDescriptor, AgentError, AgentInput, AgentRegistry, Context,
    FnAgent, Orchestrator, OrchestratorConfig, Query,
};

fn query_text(input: &AgentInput) -> String {
    input.payload["query"].as_str().unwrap_or_default().to_string()
}

async fn detect_patterns(_input: AgentInput, ctx: AgentContext) -> Result<Value, AgentError> {
    let events = ctx
        .context()
        .get("events")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    Ok(json!({
        "summary": format!("Found {events} upcoming events shaping your week."),
        "events": events,
    }))
}

async fn estimate_personality(input: AgentInput, _ctx: AgentContext) -> Result<Value, AgentError> {
    if query_text(&input).is_empty() {
        return Err(AgentError::invalid_input("empty query"));
    }
    Ok(json!({ "summary": "Openness looks high; more data would sharpen the estimate." }))
}

async fn recommend(input: AgentInput, _ctx: AgentContext) -> Result<Value, AgentError> {
    let summary = if input.dependencies.is_empty() {
        "Try a mellow discovery playlist."
    } else {
        "Based on your routine: a focus playlist for mornings."
    };
    Ok(json!({ "summary": summary }))
}

async fn generate_insight(input: AgentInput, _ctx: AgentContext) -> Result<Value, AgentError> {
    Ok(json!({
        "summary": format!("Drew on {} other findings.", input.dependencies.len()),
    }))
}

async fn answer_generally(input: AgentInput, _ctx: AgentContext) -> Result<Value, AgentError> {
    Ok(json!({ "message": format!("I heard: {}", query_text(&input)) }))
}

fn sample_registry() -> AgentRegistry {
    let registry = AgentRegistry::new();

    registry.register(FnAgent::new(
        AgentDescriptor::new("pattern_detector")
            .with_role("analyst")
            .with_capability("calendar")
            .with_capability("habits"),
        detect_patterns,
    ));
    registry.register(FnAgent::new(
        AgentDescriptor::new("personality_estimator")
            .with_role("psychometrics")
            .with_capability("big_five"),
        estimate_personality,
    ));
    registry.register(FnAgent::new(
        AgentDescriptor::new("recommender")
            .with_role("curator")
            .with_capability("music")
            .with_capability("media"),
        recommend,
    ));
    registry.register(FnAgent::new(
        AgentDescriptor::new("insight_generator")
            .with_role("narrator")
            .with_capability("insight"),
        generate_insight,
    ));
    registry.register(FnAgent::new(
        AgentDescriptor::new("general").with_role("generalist"),
        answer_generally,
    ));

    registry
}

fn load_config() -> anyhow::Result<OrchestratorConfig> {
    let config = match std::env::var("COUNCIL_CONFIG") {
        Ok(path) => OrchestratorConfig::from_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        Err(_) => OrchestratorConfig::from_env().context("reading COUNCIL_* variables")?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("info");

    let text = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if text.trim().is_empty() {
        bail!("usage: council <query>");
    }

    let orchestrator = Orchestrator::builder()
        .registry(Arc::new(sample_registry()))
        .config(load_config()?)
        .build()?;

    let mut context = Context::new();
    context.insert("events".into(), json!(["standup", "gym", "dinner"]));

    let mut query = Query::new(text).with_context(context);
    if let Ok(session) = std::env::var("COUNCIL_SESSION") {
        query = query.with_session(session);
    }

    let response = orchestrator.process_query(query).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    tracing::info!(metrics = %serde_json::to_string(&orchestrator.metrics())?, "Done");
    Ok(())
}
