use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::ConversationLimits;
use crate::registry::{DEFAULT_JOB_TTL_SECS, DEFAULT_SWEEP_INTERVAL_SECS};

/// Upper bound for `registry.ttl_secs`. Jobs are call-scoped; a day is far past any call.
pub const MAX_JOB_TTL_SECS: u64 = 86_400;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub conversation: ConversationConfig,
    pub telephony: TelephonyConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub agent_persona: String,
    pub max_objection_cycles: u32,
    pub max_close_turns: u32,
    pub max_turns: u32,
    pub max_call_duration_secs: u64,
    pub listen_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TelephonyConfig {
    pub dial_url: Option<String>,
    pub api_token: Option<SecretString>,
    pub agent_name: String,
    pub timeout_secs: u64,
}

/// Sliding-window limit on `POST /calls`, keyed by client address.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub registry_ttl_secs: Option<u64>,
    pub telephony_dial_url: Option<String>,
    pub telephony_api_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            registry: RegistryConfig {
                ttl_secs: DEFAULT_JOB_TTL_SECS,
                sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            },
            conversation: ConversationConfig {
                agent_persona: "Alex".to_string(),
                max_objection_cycles: 3,
                max_close_turns: 3,
                max_turns: 40,
                max_call_duration_secs: 900,
                listen_timeout_secs: 20,
            },
            telephony: TelephonyConfig {
                dial_url: None,
                api_token: None,
                agent_name: "dialflow-agent".to_string(),
                timeout_secs: 10,
            },
            rate_limit: RateLimitConfig { max_requests: 5, window_secs: 60 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl RegistryConfig {
    pub fn ttl(&self) -> chrono::Duration {
        let secs = self.ttl_secs.min(MAX_JOB_TTL_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or_default())
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ConversationConfig {
    pub fn limits(&self) -> ConversationLimits {
        ConversationLimits {
            max_objection_cycles: self.max_objection_cycles,
            max_close_turns: self.max_close_turns,
        }
    }

    pub fn max_call_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.max_call_duration_secs)
    }

    pub fn listen_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.listen_timeout_secs)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.window_secs)
    }
}

impl TelephonyConfig {
    pub fn is_configured(&self) -> bool {
        self.dial_url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("dialflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(registry) = patch.registry {
            if let Some(ttl_secs) = registry.ttl_secs {
                self.registry.ttl_secs = ttl_secs;
            }
            if let Some(sweep_interval_secs) = registry.sweep_interval_secs {
                self.registry.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(agent_persona) = conversation.agent_persona {
                self.conversation.agent_persona = agent_persona;
            }
            if let Some(max_objection_cycles) = conversation.max_objection_cycles {
                self.conversation.max_objection_cycles = max_objection_cycles;
            }
            if let Some(max_close_turns) = conversation.max_close_turns {
                self.conversation.max_close_turns = max_close_turns;
            }
            if let Some(max_turns) = conversation.max_turns {
                self.conversation.max_turns = max_turns;
            }
            if let Some(max_call_duration_secs) = conversation.max_call_duration_secs {
                self.conversation.max_call_duration_secs = max_call_duration_secs;
            }
            if let Some(listen_timeout_secs) = conversation.listen_timeout_secs {
                self.conversation.listen_timeout_secs = listen_timeout_secs;
            }
        }

        if let Some(telephony) = patch.telephony {
            if let Some(dial_url) = telephony.dial_url {
                self.telephony.dial_url = Some(dial_url);
            }
            if let Some(api_token) = telephony.api_token {
                self.telephony.api_token = Some(secret_value(api_token));
            }
            if let Some(agent_name) = telephony.agent_name {
                self.telephony.agent_name = agent_name;
            }
            if let Some(timeout_secs) = telephony.timeout_secs {
                self.telephony.timeout_secs = timeout_secs;
            }
        }

        if let Some(rate_limit) = patch.rate_limit {
            if let Some(max_requests) = rate_limit.max_requests {
                self.rate_limit.max_requests = max_requests;
            }
            if let Some(window_secs) = rate_limit.window_secs {
                self.rate_limit.window_secs = window_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("DIALFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("DIALFLOW_SERVER_PORT") {
            self.server.port = parse_u16("DIALFLOW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("DIALFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("DIALFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("DIALFLOW_REGISTRY_TTL_SECS") {
            self.registry.ttl_secs = parse_u64("DIALFLOW_REGISTRY_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("DIALFLOW_REGISTRY_SWEEP_INTERVAL_SECS") {
            self.registry.sweep_interval_secs =
                parse_u64("DIALFLOW_REGISTRY_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("DIALFLOW_CONVERSATION_AGENT_PERSONA") {
            self.conversation.agent_persona = value;
        }
        if let Some(value) = read_env("DIALFLOW_CONVERSATION_MAX_OBJECTION_CYCLES") {
            self.conversation.max_objection_cycles =
                parse_u32("DIALFLOW_CONVERSATION_MAX_OBJECTION_CYCLES", &value)?;
        }
        if let Some(value) = read_env("DIALFLOW_CONVERSATION_MAX_CLOSE_TURNS") {
            self.conversation.max_close_turns =
                parse_u32("DIALFLOW_CONVERSATION_MAX_CLOSE_TURNS", &value)?;
        }
        if let Some(value) = read_env("DIALFLOW_CONVERSATION_MAX_TURNS") {
            self.conversation.max_turns = parse_u32("DIALFLOW_CONVERSATION_MAX_TURNS", &value)?;
        }
        if let Some(value) = read_env("DIALFLOW_CONVERSATION_MAX_CALL_DURATION_SECS") {
            self.conversation.max_call_duration_secs =
                parse_u64("DIALFLOW_CONVERSATION_MAX_CALL_DURATION_SECS", &value)?;
        }
        if let Some(value) = read_env("DIALFLOW_CONVERSATION_LISTEN_TIMEOUT_SECS") {
            self.conversation.listen_timeout_secs =
                parse_u64("DIALFLOW_CONVERSATION_LISTEN_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DIALFLOW_TELEPHONY_DIAL_URL") {
            self.telephony.dial_url = Some(value);
        }
        if let Some(value) = read_env("DIALFLOW_TELEPHONY_API_TOKEN") {
            self.telephony.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("DIALFLOW_TELEPHONY_AGENT_NAME") {
            self.telephony.agent_name = value;
        }
        if let Some(value) = read_env("DIALFLOW_TELEPHONY_TIMEOUT_SECS") {
            self.telephony.timeout_secs = parse_u64("DIALFLOW_TELEPHONY_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DIALFLOW_RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit.max_requests =
                parse_u32("DIALFLOW_RATE_LIMIT_MAX_REQUESTS", &value)?;
        }
        if let Some(value) = read_env("DIALFLOW_RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = parse_u64("DIALFLOW_RATE_LIMIT_WINDOW_SECS", &value)?;
        }

        let log_level =
            read_env("DIALFLOW_LOGGING_LEVEL").or_else(|| read_env("DIALFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DIALFLOW_LOGGING_FORMAT").or_else(|| read_env("DIALFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(ttl_secs) = overrides.registry_ttl_secs {
            self.registry.ttl_secs = ttl_secs;
        }
        if let Some(dial_url) = overrides.telephony_dial_url {
            self.telephony.dial_url = Some(dial_url);
        }
        if let Some(api_token) = overrides.telephony_api_token {
            self.telephony.api_token = Some(secret_value(api_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        validate_registry(&self.registry)?;
        validate_conversation(&self.conversation)?;
        validate_telephony(&self.telephony)?;
        validate_rate_limit(&self.rate_limit)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("dialflow.toml"), PathBuf::from("config/dialflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_registry(registry: &RegistryConfig) -> Result<(), ConfigError> {
    if registry.ttl_secs == 0 || registry.ttl_secs > MAX_JOB_TTL_SECS {
        return Err(ConfigError::Validation(format!(
            "registry.ttl_secs must be in range 1..={MAX_JOB_TTL_SECS}"
        )));
    }

    if registry.sweep_interval_secs == 0 || registry.sweep_interval_secs > registry.ttl_secs {
        return Err(ConfigError::Validation(
            "registry.sweep_interval_secs must be in range 1..=registry.ttl_secs".to_string(),
        ));
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.agent_persona.trim().is_empty() {
        return Err(ConfigError::Validation(
            "conversation.agent_persona must not be empty".to_string(),
        ));
    }

    if conversation.max_objection_cycles == 0 || conversation.max_close_turns == 0 {
        return Err(ConfigError::Validation(
            "conversation.max_objection_cycles and max_close_turns must be greater than zero"
                .to_string(),
        ));
    }

    // Four phases need at least one caller turn each.
    if conversation.max_turns < 4 {
        return Err(ConfigError::Validation(
            "conversation.max_turns must be at least 4".to_string(),
        ));
    }

    if conversation.listen_timeout_secs == 0
        || conversation.listen_timeout_secs >= conversation.max_call_duration_secs
    {
        return Err(ConfigError::Validation(
            "conversation.listen_timeout_secs must be in range 1..max_call_duration_secs"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_telephony(telephony: &TelephonyConfig) -> Result<(), ConfigError> {
    if let Some(dial_url) = &telephony.dial_url {
        if !dial_url.starts_with("http://") && !dial_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "telephony.dial_url must start with http:// or https://".to_string(),
            ));
        }
    }

    let empty_token = telephony
        .api_token
        .as_ref()
        .map(|token| token.expose_secret().trim().is_empty())
        .unwrap_or(false);
    if empty_token {
        return Err(ConfigError::Validation(
            "telephony.api_token must not be empty when set".to_string(),
        ));
    }

    if telephony.agent_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "telephony.agent_name must not be empty".to_string(),
        ));
    }

    if telephony.timeout_secs == 0 || telephony.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "telephony.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), ConfigError> {
    if rate_limit.max_requests == 0 {
        return Err(ConfigError::Validation(
            "rate_limit.max_requests must be greater than zero".to_string(),
        ));
    }

    if rate_limit.window_secs == 0 || rate_limit.window_secs > MAX_JOB_TTL_SECS {
        return Err(ConfigError::Validation(format!(
            "rate_limit.window_secs must be in range 1..={MAX_JOB_TTL_SECS}"
        )));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    registry: Option<RegistryPatch>,
    conversation: Option<ConversationPatch>,
    telephony: Option<TelephonyPatch>,
    rate_limit: Option<RateLimitPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryPatch {
    ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    agent_persona: Option<String>,
    max_objection_cycles: Option<u32>,
    max_close_turns: Option<u32>,
    max_turns: Option<u32>,
    max_call_duration_secs: Option<u64>,
    listen_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TelephonyPatch {
    dial_url: Option<String>,
    api_token: Option<String>,
    agent_name: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitPatch {
    max_requests: Option<u32>,
    window_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_registry_and_conversation_limits() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.registry.ttl_secs == 600, "job ttl should default to ten minutes")?;
        ensure(config.registry.sweep_interval_secs == 60, "sweep should default to a minute")?;
        ensure(config.conversation.limits().max_objection_cycles == 3, "three objection cycles")?;
        ensure(config.conversation.max_turns == 40, "forty turns per call")?;
        ensure(!config.telephony.is_configured(), "telephony is off without a dial url")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_DIALFLOW_TOKEN", "tok-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("dialflow.toml");
            fs::write(
                &path,
                r#"
[telephony]
dial_url = "https://telephony.example.com/dispatch"
api_token = "${TEST_DIALFLOW_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.telephony.api_token.as_ref().map(|token| token.expose_secret().to_string())
                    == Some("tok-from-env".to_string()),
                "api token should be interpolated from the environment",
            )?;
            ensure(config.telephony.is_configured(), "dial url should enable telephony")
        })();

        clear_vars(&["TEST_DIALFLOW_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DIALFLOW_LOG_LEVEL", "warn");
        env::set_var("DIALFLOW_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["DIALFLOW_LOG_LEVEL", "DIALFLOW_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DIALFLOW_REGISTRY_TTL_SECS", "300");
        env::set_var("DIALFLOW_SERVER_PORT", "9100");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("dialflow.toml");
            fs::write(
                &path,
                r#"
[server]
port = 9000

[registry]
ttl_secs = 120
sweep_interval_secs = 30

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    port: Some(9200),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.server.port == 9200, "override port should win")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.registry.ttl_secs == 300, "env ttl should win over file")?;
            ensure(config.registry.sweep_interval_secs == 30, "file sweep interval should apply")
        })();

        clear_vars(&["DIALFLOW_REGISTRY_TTL_SECS", "DIALFLOW_SERVER_PORT"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DIALFLOW_TELEPHONY_DIAL_URL", "telephony.example.com");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("telephony.dial_url")
            );
            ensure(has_message, "validation failure should mention telephony.dial_url")
        })();

        clear_vars(&["DIALFLOW_TELEPHONY_DIAL_URL"]);
        result
    }

    #[test]
    fn sweep_interval_longer_than_ttl_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                registry_ttl_secs: Some(30),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        let rejected = matches!(
            result,
            Err(ConfigError::Validation(ref message)) if message.contains("sweep")
        );
        ensure(rejected, "a 60 s sweep cannot serve a 30 s ttl")
    }

    #[test]
    fn ttl_beyond_a_day_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                registry_ttl_secs: Some(10_000_000_000_000_000),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        let rejected = matches!(
            result,
            Err(ConfigError::Validation(ref message)) if message.contains("registry.ttl_secs")
        );
        ensure(rejected, "an out-of-range ttl fails validation")?;

        let mut config = AppConfig::default();
        config.registry.ttl_secs = u64::MAX;
        ensure(config.validate().is_err(), "u64::MAX ttl fails validation")?;
        ensure(
            config.registry.ttl().num_seconds() == 86_400,
            "an unvalidated ttl is clamped instead of overflowing",
        )
    }

    #[test]
    fn rate_limit_reads_env_and_rejects_zero_requests() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DIALFLOW_RATE_LIMIT_WINDOW_SECS", "30");
        env::set_var("DIALFLOW_RATE_LIMIT_MAX_REQUESTS", "0");

        let result = (|| -> Result<(), String> {
            let rejected = matches!(
                AppConfig::load(LoadOptions::default()),
                Err(ConfigError::Validation(ref message)) if message.contains("max_requests")
            );
            ensure(rejected, "zero requests per window is rejected")?;

            env::set_var("DIALFLOW_RATE_LIMIT_MAX_REQUESTS", "2");
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.rate_limit.max_requests == 2, "env max_requests applies")?;
            ensure(config.rate_limit.window().as_secs() == 30, "env window applies")
        })();

        clear_vars(&["DIALFLOW_RATE_LIMIT_WINDOW_SECS", "DIALFLOW_RATE_LIMIT_MAX_REQUESTS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DIALFLOW_TELEPHONY_API_TOKEN", "tok-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("tok-secret-value"), "debug output should not contain token")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&["DIALFLOW_TELEPHONY_API_TOKEN"]);
        result
    }
}
