use std::env;
use std::io::Write;
use std::sync::{Mutex, OnceLock};

use dialflow_cli::commands::simulate::{self, load_scenario, ScenarioSource, SimulateFailure};
use dialflow_cli::commands::{config, doctor};
use dialflow_core::config::AppConfig;
use dialflow_core::domain::call::CallOutcome;
use dialflow_core::domain::job::JobStatus;
use serde_json::{json, Value};

#[tokio::test]
async fn simulate_turns_walks_a_booking_call_to_the_end() {
    let scenario = load_scenario(ScenarioSource::Turns {
        turns: vec![
            "Sure, go ahead".to_string(),
            "We track it in spreadsheets".to_string(),
            "About twelve people".to_string(),
            "Sounds good".to_string(),
            "sam@example.com".to_string(),
        ],
        goal: "book_meeting".to_string(),
    })
    .expect("scenario");

    let report = simulate::simulate(&AppConfig::default(), scenario).await.expect("simulated");

    assert_eq!(report.batch.total, 1);
    assert_eq!(report.calls.len(), 1);
    let call = &report.calls[0];
    assert_eq!(call.status, Some(JobStatus::Completed));
    let result = call.result.as_ref().expect("result");
    assert!(call.agent_lines.first().is_some_and(|line| line.contains("Sam")));
    assert!(!result.transcript.is_empty());
    assert_ne!(result.outcome, CallOutcome::Error);
}

#[tokio::test]
async fn simulate_file_scenario_reports_every_lead() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    let scenario = json!({
        "submission": {
            "owner_email": "owner@example.com",
            "product": "Acme Dialer",
            "goal": "qualify_interest",
            "consent": true,
            "leads": [
                { "phone": "+14155550001", "name": "Ana" },
                { "phone": "+14155550002", "name": "Ben" }
            ]
        },
        "caller": [{ "kind": "say", "text": "No thanks, not interested" }],
        "callers": { "+14155550002": [{ "kind": "silence" }] }
    });
    write!(file, "{scenario}").expect("write scenario");

    let scenario = load_scenario(ScenarioSource::File(file.path().to_path_buf())).expect("load");
    let report = simulate::simulate(&AppConfig::default(), scenario).await.expect("simulated");

    assert_eq!(report.batch.dispatched, 2);
    let outcomes: Vec<_> = report
        .calls
        .iter()
        .map(|call| call.result.as_ref().map(|result| result.outcome))
        .collect();
    assert_eq!(outcomes, vec![Some(CallOutcome::NotInterested), Some(CallOutcome::NoAnswer)]);
    assert!(report.calls[1].agent_lines.iter().all(|line| !line.contains("Ana")));
}

#[tokio::test]
async fn simulate_rejects_invalid_submission_before_dialing() {
    let mut scenario = load_scenario(ScenarioSource::Turns {
        turns: vec!["Hello".to_string()],
        goal: "qualify_interest".to_string(),
    })
    .expect("scenario");
    scenario.submission.consent = false;

    let failure = simulate::simulate(&AppConfig::default(), scenario).await.expect_err("invalid");

    assert!(matches!(failure, SimulateFailure::Submission(_)));
}

#[test]
fn unknown_goal_is_a_scenario_error() {
    let error = load_scenario(ScenarioSource::Turns { turns: vec![], goal: "upsell".to_string() })
        .err()
        .expect("unknown goal");
    assert!(error.to_string().contains("upsell"));
}

#[test]
fn simulate_command_prints_json_report() {
    with_env(&[], || {
        let result = simulate::run(ScenarioSource::Turns {
            turns: vec!["Not interested".to_string()],
            goal: "qualify_interest".to_string(),
        });
        assert_eq!(result.exit_code, 0, "expected successful simulation");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["batch"]["total"], 1);
        assert_eq!(payload["calls"][0]["result"]["outcome"], "not_interested");
    });
}

#[test]
fn simulate_command_reports_missing_scenario_file() {
    with_env(&[], || {
        let result = simulate::run(ScenarioSource::File("does/not/exist.json".into()));
        assert_eq!(result.exit_code, 3);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "simulate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "scenario");
    });
}

#[test]
fn simulate_command_fails_on_invalid_config() {
    with_env(&[("DIALFLOW_REGISTRY_SWEEP_INTERVAL_SECS", "0")], || {
        let result = simulate::run(ScenarioSource::Turns {
            turns: vec![],
            goal: "qualify_interest".to_string(),
        });
        assert_eq!(result.exit_code, 2, "expected config validation failure code");
        assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
    });
}

#[test]
fn doctor_json_reports_telephony_readiness() {
    with_env(&[("DIALFLOW_TELEPHONY_DIAL_URL", "https://dialer.example.com/dispatch")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        assert_eq!(payload["checks"][2]["name"], "telephony_readiness");
    });
}

#[test]
fn config_command_never_prints_the_api_token() {
    with_env(&[("DIALFLOW_TELEPHONY_API_TOKEN", "tok-very-secret")], || {
        let output = config::run();
        assert!(!output.contains("tok-very-secret"));
        let expected =
            "- telephony.api_token = <redacted> (source: env (DIALFLOW_TELEPHONY_API_TOKEN))";
        assert!(output.contains(expected));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "DIALFLOW_SERVER_BIND_ADDRESS",
        "DIALFLOW_SERVER_PORT",
        "DIALFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "DIALFLOW_REGISTRY_TTL_SECS",
        "DIALFLOW_REGISTRY_SWEEP_INTERVAL_SECS",
        "DIALFLOW_CONVERSATION_AGENT_PERSONA",
        "DIALFLOW_CONVERSATION_MAX_OBJECTION_CYCLES",
        "DIALFLOW_CONVERSATION_MAX_CLOSE_TURNS",
        "DIALFLOW_CONVERSATION_MAX_TURNS",
        "DIALFLOW_CONVERSATION_MAX_CALL_DURATION_SECS",
        "DIALFLOW_CONVERSATION_LISTEN_TIMEOUT_SECS",
        "DIALFLOW_TELEPHONY_DIAL_URL",
        "DIALFLOW_TELEPHONY_API_TOKEN",
        "DIALFLOW_TELEPHONY_AGENT_NAME",
        "DIALFLOW_TELEPHONY_TIMEOUT_SECS",
        "DIALFLOW_RATE_LIMIT_MAX_REQUESTS",
        "DIALFLOW_RATE_LIMIT_WINDOW_SECS",
        "DIALFLOW_LOGGING_LEVEL",
        "DIALFLOW_LOGGING_FORMAT",
        "DIALFLOW_LOG_LEVEL",
        "DIALFLOW_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
