pub mod config;
pub mod doctor;
pub mod simulate;

use serde::Serialize;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_SCENARIO: u8 = 3;
pub const EXIT_SUBMISSION: u8 = 4;
pub const EXIT_RUNTIME: u8 = 5;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandFailure<'a> {
    command: &'a str,
    status: &'static str,
    error_class: &'a str,
    message: String,
}

impl CommandResult {
    /// Pretty JSON payload with exit code 0.
    pub fn json<T: Serialize>(command: &str, payload: &T) -> Self {
        match serde_json::to_string_pretty(payload) {
            Ok(output) => Self { exit_code: 0, output },
            Err(error) => Self::failure(command, "serialization", error.to_string(), EXIT_RUNTIME),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload =
            CommandFailure { command, status: "error", error_class, message: message.into() };
        let output = serde_json::to_string(&payload).unwrap_or_else(|error| {
            format!(
                "{{\"command\":\"{command}\",\"status\":\"error\",\
                 \"error_class\":\"serialization\",\"message\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        Self { exit_code, output }
    }
}

pub(crate) fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
