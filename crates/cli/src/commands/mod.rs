pub mod config;
pub mod quote;
pub mod start;

use serde::Serialize;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_SETUP: u8 = 3;
pub const EXIT_UNRESOLVED: u8 = 4;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<&'a str>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::json(
            0,
            &CommandOutcome { command, status: "ok", error_class: None, message: message.into() },
        )
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::json(
            exit_code,
            &CommandOutcome {
                command,
                status: "error",
                error_class: Some(error_class),
                message: message.into(),
            },
        )
    }

    /// One JSON document on a single line.
    pub fn json<T: Serialize>(exit_code: u8, payload: &T) -> Self {
        let output = serde_json::to_string(payload).unwrap_or_else(|error| {
            format!(
                "{{\"command\":\"unknown\",\"status\":\"error\",\
                 \"error_class\":\"serialization\",\"message\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        });
        Self { exit_code, output }
    }
}
