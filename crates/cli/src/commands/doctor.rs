use dialflow_core::builder::{ContextBundleBuilder, TemplateContextBuilder};
use dialflow_core::config::{AppConfig, LoadOptions};
use dialflow_core::domain::lead::Lead;
use dialflow_core::domain::submission::{CallGoal, Campaign};
use serde::Serialize;

use super::{escape_json, CommandResult, EXIT_CONFIG};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct DoctorCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub overall_status: CheckStatus,
    pub summary: String,
    pub checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report(AppConfig::load(LoadOptions::default()).map_err(|e| e.to_string()));
    let exit_code = if report.overall_status == CheckStatus::Fail { EXIT_CONFIG } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\
                 \"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

pub fn build_report(config: Result<AppConfig, String>) -> DoctorReport {
    let checks = match config {
        Ok(config) => vec![
            DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            },
            check_script_templates(&config),
            check_telephony(&config),
        ],
        Err(error) => vec![
            DoctorCheck { name: "config_validation", status: CheckStatus::Fail, details: error },
            skipped("script_templates"),
            skipped("telephony_readiness"),
        ],
    };

    let overall_status = if checks.iter().any(|check| check.status == CheckStatus::Fail) {
        CheckStatus::Fail
    } else if checks.iter().any(|check| check.status == CheckStatus::Warn) {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    let summary = match overall_status {
        CheckStatus::Pass => "doctor: all readiness checks passed",
        CheckStatus::Warn => "doctor: ready with warnings",
        _ => "doctor: one or more readiness checks failed",
    }
    .to_string();

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str) -> DoctorCheck {
    DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because configuration did not load".to_string(),
    }
}

/// Renders a sample bundle for every goal with the configured persona.
fn check_script_templates(config: &AppConfig) -> DoctorCheck {
    let builder = match TemplateContextBuilder::new(config.conversation.agent_persona.clone()) {
        Ok(builder) => builder,
        Err(error) => {
            return DoctorCheck {
                name: "script_templates",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
    };

    let lead = Lead::new("+15555550100").with_name("Sample Lead");
    let goals = [
        CallGoal::BookMeeting,
        CallGoal::QualifyInterest,
        CallGoal::CollectInfo,
        CallGoal::CloseSale,
    ];
    for goal in goals {
        let mut campaign = Campaign::new("Sample product", goal);
        campaign.booking_link = Some("https://cal.example.com/sample".to_string());
        campaign.payment_link = Some("https://pay.example.com/sample".to_string());
        if let Err(error) = builder.build(&lead, &campaign, "owner@example.com") {
            return DoctorCheck {
                name: "script_templates",
                status: CheckStatus::Fail,
                details: format!("{} scripts failed to render: {error}", goal.as_str()),
            };
        }
    }

    DoctorCheck {
        name: "script_templates",
        status: CheckStatus::Pass,
        details: format!("scripts render for every goal as `{}`", builder.persona()),
    }
}

fn check_telephony(config: &AppConfig) -> DoctorCheck {
    match config.telephony.dial_url.as_deref() {
        Some(url) if config.telephony.is_configured() => DoctorCheck {
            name: "telephony_readiness",
            status: CheckStatus::Pass,
            details: format!(
                "dispatching to `{url}` as `{}` ({})",
                config.telephony.agent_name,
                if config.telephony.api_token.is_some() { "token set" } else { "no token" }
            ),
        },
        _ => DoctorCheck {
            name: "telephony_readiness",
            status: CheckStatus::Warn,
            details: "telephony.dial_url is unset; the server will fail every dispatch".to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];
    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }
    lines.join("\n")
}
