use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dialflow_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => render(&config, detect_config_path().as_deref()),
        Err(error) => format!("config validation failed: {error}"),
    }
}

/// Every effective value with the layer it came from. Secrets never appear.
pub fn render(config: &AppConfig, config_file: Option<&Path>) -> String {
    let doc = load_config_file_doc(config_file);
    let fields = [
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("registry.ttl_secs", config.registry.ttl_secs.to_string()),
        ("registry.sweep_interval_secs", config.registry.sweep_interval_secs.to_string()),
        ("conversation.agent_persona", config.conversation.agent_persona.clone()),
        (
            "conversation.max_objection_cycles",
            config.conversation.max_objection_cycles.to_string(),
        ),
        ("conversation.max_close_turns", config.conversation.max_close_turns.to_string()),
        ("conversation.max_turns", config.conversation.max_turns.to_string()),
        (
            "conversation.max_call_duration_secs",
            config.conversation.max_call_duration_secs.to_string(),
        ),
        ("conversation.listen_timeout_secs", config.conversation.listen_timeout_secs.to_string()),
        (
            "telephony.dial_url",
            config.telephony.dial_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        ("telephony.api_token", redact_token(config.telephony.api_token.as_ref())),
        ("telephony.agent_name", config.telephony.agent_name.clone()),
        ("telephony.timeout_secs", config.telephony.timeout_secs.to_string()),
        ("rate_limit.max_requests", config.rate_limit.max_requests.to_string()),
        ("rate_limit.window_secs", config.rate_limit.window_secs.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_lowercase()),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value) in fields {
        let source = field_source(key, doc.as_ref(), config_file);
        lines.push(format!("- {key} = {value} (source: {source})"));
    }
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["dialflow.toml", "config/dialflow.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn env_key(key_path: &str) -> String {
    format!("DIALFLOW_{}", key_path.replace('.', "_").to_uppercase())
}

fn field_source(key_path: &str, doc: Option<&Value>, config_file: Option<&Path>) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
        return format!("env ({env_key})");
    }

    let in_file = doc.is_some_and(|doc| {
        key_path.split('.').try_fold(doc, |current, key| current.get(key)).is_some()
    });
    if in_file {
        let file = config_file
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file})");
    }

    "default".to_string()
}

fn redact_token(token: Option<&secrecy::SecretString>) -> String {
    match token {
        None => "<unset>".to_string(),
        Some(token) if token.expose_secret().trim().is_empty() => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use dialflow_core::config::AppConfig;
    use secrecy::SecretString;

    use super::{env_key, render};

    #[test]
    fn env_keys_follow_section_layout() {
        assert_eq!(env_key("registry.ttl_secs"), "DIALFLOW_REGISTRY_TTL_SECS");
        assert_eq!(env_key("telephony.dial_url"), "DIALFLOW_TELEPHONY_DIAL_URL");
    }

    #[test]
    fn render_redacts_token_and_attributes_file_values() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[conversation]\nagent_persona = \"Riley\"").expect("write");

        let mut config = AppConfig::default();
        config.conversation.agent_persona = "Riley".to_string();
        config.telephony.api_token = Some(SecretString::from("super-secret".to_string()));

        let output = render(&config, Some(file.path()));

        assert!(!output.contains("super-secret"));
        assert!(output.contains("- telephony.api_token = <redacted>"));
        let persona_line = output
            .lines()
            .find(|line| line.contains("conversation.agent_persona"))
            .expect("persona line");
        assert!(persona_line.contains("Riley") && persona_line.contains("source: file ("));
    }
}
