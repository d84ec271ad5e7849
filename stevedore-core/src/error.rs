use thiserror::Error;

use crate::models::{ExecOutcome, ProbeConfig};

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid user: {0}")]
    InvalidUser(String),

    #[error("Invalid probe configuration: {0}")]
    InvalidProbeConfig(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error(
        "Command `{command}` still running after {polls} poll(s) \
         (poll_timeout={}ms, poll_interval={}ms)",
        .probe.poll_timeout().as_millis(),
        .probe.poll_interval().as_millis()
    )]
    Timeout {
        command: String,
        probe: ProbeConfig,
        polls: u32,
    },

    #[error(
        "Command `{command}` exited with code {exit_code}, expected one of {allowed:?} \
         (last inspection: {response:?})"
    )]
    ExitCodeValidation {
        command: String,
        exit_code: i64,
        allowed: Vec<i64>,
        response: ExecOutcome,
    },

    #[error("Output handler error: {0}")]
    Handler(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ExecError>;
