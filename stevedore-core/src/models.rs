use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExecError, Result};

pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// One command to execute inside a container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default = "default_attach")]
    pub attach_stdout: bool,
    #[serde(default = "default_attach")]
    pub attach_stderr: bool,
}

fn default_attach() -> bool {
    true
}

impl ExecSpec {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            user: None,
            working_dir: None,
            attach_stdout: true,
            attach_stderr: true,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_attach_stdout(mut self, attach: bool) -> Self {
        self.attach_stdout = attach;
        self
    }

    pub fn with_attach_stderr(mut self, attach: bool) -> Self {
        self.attach_stderr = attach;
        self
    }

    /// Space-joined command line, used in logs and error messages.
    pub fn display_command(&self) -> String {
        self.cmd.join(" ")
    }

    pub fn program(&self) -> Option<&str> {
        self.cmd.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.cmd.get(1..).unwrap_or(&[])
    }

    /// Parsed identity, if a user was configured.
    pub fn user_spec(&self) -> Result<Option<UserSpec>> {
        self.user.as_deref().map(UserSpec::parse).transpose()
    }

    pub fn validate(&self) -> Result<()> {
        match self.program() {
            None => {
                return Err(ExecError::InvalidCommand(
                    "command must contain at least one token".to_string(),
                ))
            }
            Some(program) if program.trim().is_empty() => {
                return Err(ExecError::InvalidCommand(format!(
                    "empty program name in `{}`",
                    self.display_command()
                )))
            }
            Some(_) => {}
        }

        if let Some(dir) = &self.working_dir {
            if dir.trim().is_empty() {
                return Err(ExecError::InvalidCommand(format!(
                    "empty working directory for `{}`",
                    self.display_command()
                )));
            }
        }

        self.user_spec()?;
        Ok(())
    }
}

/// `<name|uid>[:<group|gid>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub user: String,
    pub group: Option<String>,
}

impl UserSpec {
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        let user = parts.next().unwrap_or_default().trim();
        let group = parts.next().map(str::trim);

        if parts.next().is_some() {
            return Err(ExecError::InvalidUser(format!(
                "'{s}' has more than one ':' separator"
            )));
        }
        if user.is_empty() {
            return Err(ExecError::InvalidUser(format!("'{s}' has an empty user")));
        }
        if group == Some("") {
            return Err(ExecError::InvalidUser(format!("'{s}' has an empty group")));
        }

        Ok(Self {
            user: user.to_string(),
            group: group.map(str::to_string),
        })
    }
}

impl fmt::Display for UserSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}:{}", self.user, group),
            None => write!(f, "{}", self.user),
        }
    }
}

/// Poll policy used to detect exec completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProbeConfig", into = "RawProbeConfig")]
pub struct ProbeConfig {
    poll_timeout: Duration,
    poll_interval: Duration,
}

impl ProbeConfig {
    pub fn new(poll_timeout: Duration, poll_interval: Duration) -> Result<Self> {
        // A zero interval never consumes budget, so the loop would not end.
        if poll_interval.is_zero() && !poll_timeout.is_zero() {
            return Err(ExecError::InvalidProbeConfig(format!(
                "poll_interval must be greater than zero when poll_timeout is {}ms",
                poll_timeout.as_millis()
            )));
        }
        Ok(Self {
            poll_timeout,
            poll_interval,
        })
    }

    pub fn from_millis(poll_timeout_ms: u64, poll_interval_ms: u64) -> Result<Self> {
        Self::new(
            Duration::from_millis(poll_timeout_ms),
            Duration::from_millis(poll_interval_ms),
        )
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawProbeConfig {
    #[serde(default = "default_poll_timeout_ms")]
    poll_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
}

fn default_poll_timeout_ms() -> u64 {
    DEFAULT_POLL_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl TryFrom<RawProbeConfig> for ProbeConfig {
    type Error = ExecError;

    fn try_from(raw: RawProbeConfig) -> Result<Self> {
        ProbeConfig::from_millis(raw.poll_timeout_ms, raw.poll_interval_ms)
    }
}

impl From<ProbeConfig> for RawProbeConfig {
    fn from(probe: ProbeConfig) -> Self {
        Self {
            poll_timeout_ms: probe.poll_timeout.as_millis() as u64,
            poll_interval_ms: probe.poll_interval.as_millis() as u64,
        }
    }
}

/// Runtime identifier of one exec instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecHandle {
    pub id: String,
}

impl ExecHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for ExecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Result of a single inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub exec_id: String,
    pub running: bool,
    pub exit_code: Option<i64>,
}

impl ExecOutcome {
    pub fn running(exec_id: impl Into<String>) -> Self {
        Self {
            exec_id: exec_id.into(),
            running: true,
            exit_code: None,
        }
    }

    pub fn finished(exec_id: impl Into<String>, exit_code: Option<i64>) -> Self {
        Self {
            exec_id: exec_id.into(),
            running: false,
            exit_code,
        }
    }

    /// Exit code used for validation; a finished exec without one counts as 0.
    pub fn effective_exit_code(&self) -> i64 {
        self.exit_code.unwrap_or(0)
    }
}

/// Stream a frame was produced on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Stdout,
    Stderr,
    Raw,
    Other(String),
}

impl From<&str> for StreamType {
    fn from(s: &str) -> Self {
        match s {
            "stdout" => StreamType::Stdout,
            "stderr" => StreamType::Stderr,
            "raw" => StreamType::Raw,
            other => StreamType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Stdout => f.write_str("stdout"),
            StreamType::Stderr => f.write_str("stderr"),
            StreamType::Raw => f.write_str("raw"),
            StreamType::Other(tag) => write!(f, "other({tag})"),
        }
    }
}

/// A chunk of exec output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream: StreamType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(stream: StreamType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }

    pub fn stdout(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(StreamType::Stdout, payload)
    }

    pub fn stderr(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(StreamType::Stderr, payload)
    }

    pub fn raw(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(StreamType::Raw, payload)
    }

    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A command that reached a validated terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub handle: ExecHandle,
    pub command: String,
    pub exit_code: Option<i64>,
    pub polls: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Completed exec handles in submission order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionLedger {
    entries: Vec<LedgerEntry>,
}

impl ExecutionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    pub fn exec_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.handle.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_spec_defaults() {
        let spec = ExecSpec::new(["echo", "hello"]);
        assert_eq!(spec.cmd, vec!["echo".to_string(), "hello".to_string()]);
        assert!(spec.attach_stdout);
        assert!(spec.attach_stderr);
        assert!(spec.user.is_none());
        assert!(spec.working_dir.is_none());
        assert_eq!(spec.display_command(), "echo hello");
        assert_eq!(spec.program(), Some("echo"));
        assert_eq!(spec.args(), &["hello".to_string()]);
    }

    #[test]
    fn test_exec_spec_rejects_empty_command() {
        let spec = ExecSpec::new(Vec::<String>::new());
        assert!(matches!(spec.validate(), Err(ExecError::InvalidCommand(_))));

        let spec = ExecSpec::new(["  "]);
        assert!(matches!(spec.validate(), Err(ExecError::InvalidCommand(_))));
    }

    #[test]
    fn test_exec_spec_rejects_bad_user() {
        let spec = ExecSpec::new(["id"]).with_user("a:b:c");
        assert!(matches!(spec.validate(), Err(ExecError::InvalidUser(_))));
    }

    #[test]
    fn test_user_spec_parse() {
        let user = UserSpec::parse("1000").unwrap();
        assert_eq!(user.user, "1000");
        assert!(user.group.is_none());

        let user = UserSpec::parse("app:staff").unwrap();
        assert_eq!(user.user, "app");
        assert_eq!(user.group.as_deref(), Some("staff"));
        assert_eq!(user.to_string(), "app:staff");

        assert!(UserSpec::parse("").is_err());
        assert!(UserSpec::parse(":staff").is_err());
        assert!(UserSpec::parse("app:").is_err());
    }

    #[test]
    fn test_probe_config_default() {
        let probe = ProbeConfig::default();
        assert_eq!(probe.poll_timeout(), Duration::from_secs(60));
        assert_eq!(probe.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_probe_config_interval_may_exceed_timeout() {
        let probe = ProbeConfig::from_millis(100, 5_000).unwrap();
        assert!(probe.poll_interval() > probe.poll_timeout());
    }

    #[test]
    fn test_probe_config_rejects_zero_interval() {
        assert!(matches!(
            ProbeConfig::from_millis(1_000, 0),
            Err(ExecError::InvalidProbeConfig(_))
        ));
        assert!(ProbeConfig::from_millis(0, 0).is_ok());
    }

    #[test]
    fn test_probe_config_deserialize_fills_defaults() {
        let probe: ProbeConfig = serde_json::from_str(r#"{"poll_timeout_ms": 500}"#).unwrap();
        assert_eq!(probe.poll_timeout(), Duration::from_millis(500));
        assert_eq!(probe.poll_interval(), Duration::from_millis(2_000));

        let err = serde_json::from_str::<ProbeConfig>(
            r#"{"poll_timeout_ms": 500, "poll_interval_ms": 0}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_exec_outcome_missing_exit_code_counts_as_zero() {
        let outcome = ExecOutcome::finished("abc", None);
        assert!(!outcome.running);
        assert_eq!(outcome.effective_exit_code(), 0);
    }

    #[test]
    fn test_stream_type_from_str() {
        assert_eq!(StreamType::from("stdout"), StreamType::Stdout);
        assert_eq!(StreamType::from("stderr"), StreamType::Stderr);
        assert_eq!(StreamType::from("raw"), StreamType::Raw);
        assert_eq!(
            StreamType::from("stdin"),
            StreamType::Other("stdin".to_string())
        );
    }

    #[test]
    fn test_ledger_preserves_order() {
        let mut ledger = ExecutionLedger::new();
        for id in ["first", "second", "third"] {
            ledger.record(LedgerEntry {
                handle: ExecHandle::new(id),
                command: "true".to_string(),
                exit_code: Some(0),
                polls: 0,
                started_at: Utc::now(),
                completed_at: Utc::now(),
            });
        }
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.exec_ids(), vec!["first", "second", "third"]);
    }
}
