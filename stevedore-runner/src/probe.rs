use stevedore_core::{ExecHandle, ExecOutcome, ProbeConfig, Result};
use tokio::time::sleep;
use tracing::debug;

use crate::runtime::ExecRuntime;

/// Terminal state of one probe run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    Finished { outcome: ExecOutcome, polls: u32 },
    TimedOut { polls: u32 },
}

impl ProbeState {
    pub fn polls(&self) -> u32 {
        match self {
            ProbeState::Finished { polls, .. } | ProbeState::TimedOut { polls } => *polls,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LivenessProbe {
    config: ProbeConfig,
}

impl LivenessProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ProbeConfig {
        self.config
    }

    /// Inspect `handle` until it finishes or the budget runs out.
    ///
    /// An inspection error ends the probe immediately; there is no retry.
    pub async fn watch<R>(&self, runtime: &R, handle: &ExecHandle) -> Result<ProbeState>
    where
        R: ExecRuntime + ?Sized,
    {
        let interval = self.config.poll_interval();
        let mut remaining = self.config.poll_timeout();
        let mut polls: u32 = 0;

        loop {
            let outcome = runtime.inspect_exec(handle).await?;
            if !outcome.running {
                debug!(
                    exec_id = %handle,
                    polls,
                    exit_code = ?outcome.exit_code,
                    "exec finished"
                );
                return Ok(ProbeState::Finished { outcome, polls });
            }

            polls += 1;
            remaining = remaining.saturating_sub(interval);
            debug!(
                exec_id = %handle,
                polls,
                elapsed_ms = (interval * polls).as_millis() as u64,
                remaining_ms = remaining.as_millis() as u64,
                "exec still running"
            );

            if remaining.is_zero() {
                return Ok(ProbeState::TimedOut { polls });
            }
            sleep(interval).await;
        }
    }
}
