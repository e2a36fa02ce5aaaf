use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use dialflow_agent::ambient::TracingSuspensionHook;
use dialflow_agent::channel::{ScriptedConnector, ScriptedTurn};
use dialflow_agent::dialer::LocalCallDialer;
use dialflow_agent::runtime::{ConversationExecutor, ExecutorSettings};
use dialflow_agent::tools::{LinkOutbox, OutboundLink, ToolRegistry};
use dialflow_core::audit::TracingAuditSink;
use dialflow_core::builder::TemplateContextBuilder;
use dialflow_core::config::{AppConfig, LoadOptions};
use dialflow_core::dispatch::{BatchDispatchResponse, DispatchOrchestrator};
use dialflow_core::domain::call::CallResult;
use dialflow_core::domain::job::JobStatus;
use dialflow_core::domain::lead::Lead;
use dialflow_core::domain::submission::{CallGoal, Campaign, SubmissionRequest};
use dialflow_core::registry::{ContextStore, JobRegistry};
use serde::{Deserialize, Serialize};

use super::{CommandResult, EXIT_CONFIG, EXIT_RUNTIME, EXIT_SCENARIO, EXIT_SUBMISSION};

const COMMAND: &str = "simulate";

pub enum ScenarioSource {
    File(PathBuf),
    Turns { turns: Vec<String>, goal: String },
}

/// A submission plus what each lead says when called.
#[derive(Clone, Debug, Deserialize)]
pub struct Scenario {
    pub submission: SubmissionRequest,
    /// Script for every lead without an entry in `callers`.
    #[serde(default)]
    pub caller: Vec<ScriptedTurn>,
    /// Scripts keyed by lead phone.
    #[serde(default)]
    pub callers: BTreeMap<String, Vec<ScriptedTurn>>,
}

#[derive(Debug, Serialize)]
pub struct SimulatedCall {
    pub position: usize,
    pub phone: String,
    pub status: Option<JobStatus>,
    pub agent_lines: Vec<String>,
    pub result: Option<CallResult>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub batch: BatchDispatchResponse,
    pub calls: Vec<SimulatedCall>,
    pub links: Vec<OutboundLink>,
}

#[derive(Debug)]
pub enum SimulateFailure {
    Config(String),
    Scenario(anyhow::Error),
    Submission(String),
    Runtime(String),
}

impl SimulateFailure {
    fn into_result(self) -> CommandResult {
        match self {
            Self::Config(message) => {
                CommandResult::failure(COMMAND, "config_validation", message, EXIT_CONFIG)
            }
            Self::Scenario(error) => {
                CommandResult::failure(COMMAND, "scenario", format!("{error:#}"), EXIT_SCENARIO)
            }
            Self::Submission(message) => {
                CommandResult::failure(COMMAND, "submission_validation", message, EXIT_SUBMISSION)
            }
            Self::Runtime(message) => {
                CommandResult::failure(COMMAND, "runtime", message, EXIT_RUNTIME)
            }
        }
    }
}

pub fn run(source: ScenarioSource) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return SimulateFailure::Config(error.to_string()).into_result(),
    };
    let scenario = match load_scenario(source) {
        Ok(scenario) => scenario,
        Err(error) => return SimulateFailure::Scenario(error).into_result(),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return SimulateFailure::Runtime(format!("failed to initialize async runtime: {error}"))
                .into_result();
        }
    };

    match runtime.block_on(simulate(&config, scenario)) {
        Ok(report) => CommandResult::json(COMMAND, &report),
        Err(failure) => failure.into_result(),
    }
}

pub fn load_scenario(source: ScenarioSource) -> anyhow::Result<Scenario> {
    match source {
        ScenarioSource::File(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("could not read scenario `{}`", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("could not parse scenario `{}`", path.display()))
        }
        ScenarioSource::Turns { turns, goal } => {
            let goal = CallGoal::parse(&goal)
                .with_context(|| format!("unknown goal `{goal}`"))?;
            Ok(Scenario {
                submission: sample_submission(goal),
                caller: turns.into_iter().map(ScriptedTurn::say).collect(),
                callers: BTreeMap::new(),
            })
        }
    }
}

fn sample_submission(goal: CallGoal) -> SubmissionRequest {
    let mut campaign = Campaign::new("Dialflow", goal);
    campaign.product_context = "Outbound calls that follow a script you control.".to_string();
    campaign.booking_link = Some("https://cal.example.com/dialflow-demo".to_string());
    campaign.payment_link = Some("https://pay.example.com/dialflow".to_string());

    SubmissionRequest {
        owner_email: "operator@example.com".to_string(),
        leads: vec![Lead::new("+15555550100").with_name("Sam").with_company("Example Co")],
        campaign,
        consent: true,
        idempotency_key: None,
    }
}

/// Dispatches the scenario's submission and waits for every call to write its result.
pub async fn simulate(
    config: &AppConfig,
    scenario: Scenario,
) -> Result<SimulationReport, SimulateFailure> {
    let submission = scenario
        .submission
        .validate()
        .map_err(|error| SimulateFailure::Submission(error.to_string()))?;

    let builder = TemplateContextBuilder::new(config.conversation.agent_persona.clone())
        .map_err(|error| SimulateFailure::Runtime(error.to_string()))?;
    let registry = Arc::new(JobRegistry::new(config.registry.ttl()));
    let outbox = LinkOutbox::default();
    let executor = Arc::new(
        ConversationExecutor::new(
            registry.clone(),
            Arc::new(ToolRegistry::standard(outbox.clone())),
            ExecutorSettings::from(&config.conversation),
        )
        .with_hook(Arc::new(TracingSuspensionHook)),
    );

    let connector = scenario
        .callers
        .into_iter()
        .fold(ScriptedConnector::new(scenario.caller), |connector, (phone, turns)| {
            connector.with_script(phone, turns)
        });
    let dialer = Arc::new(LocalCallDialer::new(executor, Arc::new(connector.clone())));
    let orchestrator = DispatchOrchestrator::new(
        Arc::new(builder),
        dialer.clone(),
        registry.clone(),
        Arc::new(ContextStore::new()),
        Arc::new(TracingAuditSink),
    );

    let batch = orchestrator.dispatch(&submission).await;
    dialer.wait_idle().await;

    let mut calls = Vec::with_capacity(batch.entries.len());
    for entry in &batch.entries {
        let job = match &entry.job_id {
            Some(job_id) => registry.get(job_id).await.ok(),
            None => None,
        };
        calls.push(SimulatedCall {
            position: entry.position,
            phone: entry.phone.clone(),
            status: job.as_ref().map(|job| job.status),
            agent_lines: connector.spoken_to(&entry.phone).unwrap_or_default(),
            result: job.as_ref().and_then(|job| job.result.clone()),
            error: job
                .and_then(|job| job.error)
                .or_else(|| entry.error.as_ref().map(|failure| failure.message.clone())),
        });
    }

    Ok(SimulationReport { batch, calls, links: outbox.links() })
}
