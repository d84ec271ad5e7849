use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use stevedore_core::{
    ExecError, ExecHandle, ExecPlan, ExecSpec, ExecutionLedger, LedgerEntry, ProbeConfig,
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::probe::{LivenessProbe, ProbeState};
use crate::router::{ConsoleSink, FrameRouter, OutputHandler};
use crate::runtime::ExecRuntime;
use crate::validator::ExitCodeValidator;

/// A session stopped on a failing command.
///
/// `completed` holds the commands that finished before the failure; the
/// failing command itself is never recorded.
#[derive(Error, Debug)]
#[error("command #{} `{command}` failed: {source}", .index + 1)]
pub struct SessionError {
    pub index: usize,
    pub command: String,
    #[source]
    pub source: ExecError,
    pub completed: ExecutionLedger,
}

/// Runs an ordered list of commands inside one container, strictly one after
/// another, stopping at the first failure.
pub struct ExecSession<R> {
    runtime: R,
    container_id: String,
    probe: Option<ProbeConfig>,
    validator: ExitCodeValidator,
    router: FrameRouter,
}

impl<R: ExecRuntime> ExecSession<R> {
    pub fn new(runtime: R, container_id: impl Into<String>) -> Self {
        Self {
            runtime,
            container_id: container_id.into(),
            probe: None,
            validator: ExitCodeValidator::default(),
            router: FrameRouter::default(),
        }
    }

    /// Session configured from a plan's container, probe and exit-code policy.
    pub fn from_plan(runtime: R, plan: &ExecPlan) -> Self {
        let mut session = Self::new(runtime, plan.container.clone());
        session.probe = plan.probe;
        session.validator = ExitCodeValidator::new(plan.success_on_exit_codes.clone());
        session
    }

    pub fn with_probe_config(mut self, probe: ProbeConfig) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_success_exit_codes<I: IntoIterator<Item = i64>>(mut self, codes: I) -> Self {
        self.validator = ExitCodeValidator::new(Some(codes.into_iter().collect::<BTreeSet<_>>()));
        self
    }

    pub fn with_output_handler(mut self, handler: Arc<dyn OutputHandler>) -> Self {
        self.router = FrameRouter::handler(handler);
        self
    }

    pub fn with_console_sink(mut self, sink: Arc<ConsoleSink>) -> Self {
        self.router = FrameRouter::console(sink);
        self
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Probe policy applied to each command.
    pub fn effective_probe(&self) -> ProbeConfig {
        self.probe.unwrap_or_default()
    }

    /// Execute `commands` in order and return the ledger of completed execs.
    ///
    /// Every spec is validated before the first exec is created. Command
    /// `i + 1` is created only after command `i` finished and passed exit-code
    /// validation.
    pub async fn run(&self, commands: &[ExecSpec]) -> Result<ExecutionLedger, SessionError> {
        for (index, spec) in commands.iter().enumerate() {
            if let Err(source) = spec.validate() {
                return Err(SessionError {
                    index,
                    command: spec.display_command(),
                    source,
                    completed: ExecutionLedger::new(),
                });
            }
        }

        info!(
            container = %self.container_id,
            commands = commands.len(),
            exit_codes_enforced = self.validator.is_enforced(),
            "Starting exec session"
        );

        let mut ledger = ExecutionLedger::new();
        for (index, spec) in commands.iter().enumerate() {
            match self.run_command(index, spec).await {
                Ok(entry) => ledger.record(entry),
                Err(source) => {
                    error!(
                        container = %self.container_id,
                        index,
                        command = %spec.display_command(),
                        error = %source,
                        "Command failed, stopping session"
                    );
                    return Err(SessionError {
                        index,
                        command: spec.display_command(),
                        source,
                        completed: ledger,
                    });
                }
            }
        }

        info!(
            container = %self.container_id,
            completed = ledger.len(),
            "Exec session completed"
        );
        Ok(ledger)
    }

    async fn run_command(&self, index: usize, spec: &ExecSpec) -> Result<LedgerEntry, ExecError> {
        let command = spec.display_command();
        let started_at = Utc::now();

        info!(
            container = %self.container_id,
            index,
            command = %command,
            "Executing command"
        );

        let handle = self.runtime.create_exec(&self.container_id, spec).await?;
        let probe = LivenessProbe::new(self.effective_probe());
        let state = match self.start_and_watch(&probe, &handle).await {
            Ok(state) => state,
            Err(e) => {
                self.abandon(&handle).await;
                return Err(e);
            }
        };

        match state {
            ProbeState::TimedOut { polls } => {
                warn!(
                    exec_id = %handle,
                    command = %command,
                    polls,
                    "Command did not finish within the poll timeout"
                );
                self.abandon(&handle).await;
                Err(ExecError::Timeout {
                    command,
                    probe: probe.config(),
                    polls,
                })
            }
            ProbeState::Finished { outcome, polls } => {
                self.validator.validate(spec, &outcome)?;

                info!(
                    exec_id = %handle,
                    command = %command,
                    exit_code = ?outcome.exit_code,
                    polls,
                    "Command completed"
                );

                Ok(LedgerEntry {
                    handle,
                    command,
                    exit_code: outcome.exit_code,
                    polls,
                    started_at,
                    completed_at: Utc::now(),
                })
            }
        }
    }

    async fn start_and_watch(
        &self,
        probe: &LivenessProbe,
        handle: &ExecHandle,
    ) -> Result<ProbeState, ExecError> {
        let router = Arc::new(self.router.clone().for_exec(handle.id.clone()));
        self.runtime.start_exec(handle, router).await?;
        probe.watch(&self.runtime, handle).await
    }

    async fn abandon(&self, handle: &ExecHandle) {
        if let Err(e) = self.runtime.abort_exec(handle).await {
            warn!(exec_id = %handle, error = %e, "Failed to abort exec");
        }
    }
}
