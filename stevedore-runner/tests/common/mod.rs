#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use stevedore_core::{ExecError, ExecHandle, ExecOutcome, ExecSpec, Frame, Result};
use stevedore_runner::{ExecRuntime, FrameRouter};
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialise tracing for tests; enable output with `RUST_LOG=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Runtime call as observed by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Start(String),
    Inspect(String),
    Abort(String),
}

/// Behaviour of one exec instance, consumed in creation order.
#[derive(Debug, Clone)]
pub struct ScriptedExec {
    pub frames: Vec<Frame>,
    pub running_polls: u32,
    pub exit_code: Option<i64>,
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_inspect: bool,
}

impl ScriptedExec {
    pub fn exits(code: i64) -> Self {
        Self {
            frames: Vec::new(),
            running_polls: 0,
            exit_code: Some(code),
            fail_create: false,
            fail_start: false,
            fail_inspect: false,
        }
    }

    pub fn without_exit_code() -> Self {
        Self {
            exit_code: None,
            ..Self::exits(0)
        }
    }

    pub fn hangs() -> Self {
        Self {
            running_polls: u32::MAX,
            ..Self::exits(0)
        }
    }

    pub fn create_fails() -> Self {
        Self {
            fail_create: true,
            ..Self::exits(0)
        }
    }

    pub fn start_fails() -> Self {
        Self {
            fail_start: true,
            ..Self::exits(0)
        }
    }

    /// Inspection errors once the exec stops reporting running.
    pub fn inspect_fails() -> Self {
        Self {
            fail_inspect: true,
            ..Self::exits(0)
        }
    }

    pub fn running_for(mut self, polls: u32) -> Self {
        self.running_polls = polls;
        self
    }

    pub fn with_frames(mut self, frames: Vec<Frame>) -> Self {
        self.frames = frames;
        self
    }
}

struct ActiveExec {
    script: ScriptedExec,
    inspections: u32,
    delivery: Option<JoinHandle<()>>,
}

/// Fake runtime that replays scripted execs and records every call.
pub struct ScriptedRuntime {
    script: Mutex<VecDeque<ScriptedExec>>,
    active: Mutex<HashMap<String, ActiveExec>>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU32,
}

impl ScriptedRuntime {
    pub fn new(script: Vec<ScriptedExec>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            active: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    pub fn inspections_of(&self, exec_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Inspect(id) if id == exec_id))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ExecRuntime for ScriptedRuntime {
    async fn create_exec(&self, _container_id: &str, spec: &ExecSpec) -> Result<ExecHandle> {
        self.record(Call::Create(spec.display_command()));

        let script = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ExecError::Runtime("no scripted exec left".to_string()))?;
        if script.fail_create {
            return Err(ExecError::Runtime("container is not running".to_string()));
        }

        let id = format!("exec-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.active.lock().unwrap().insert(
            id.clone(),
            ActiveExec {
                script,
                inspections: 0,
                delivery: None,
            },
        );
        Ok(ExecHandle::new(id))
    }

    async fn start_exec(&self, handle: &ExecHandle, router: Arc<FrameRouter>) -> Result<()> {
        self.record(Call::Start(handle.id.clone()));

        let mut active = self.active.lock().unwrap();
        let exec = active
            .get_mut(&handle.id)
            .ok_or_else(|| ExecError::Runtime(format!("no such exec: {handle}")))?;
        if exec.script.fail_start {
            return Err(ExecError::Runtime("exec start was refused".to_string()));
        }

        // Frames are pushed from a separate task, like a real runtime would.
        let frames = exec.script.frames.clone();
        exec.delivery = Some(tokio::spawn(async move {
            for frame in frames {
                router.route(&frame);
                tokio::task::yield_now().await;
            }
        }));
        Ok(())
    }

    async fn inspect_exec(&self, handle: &ExecHandle) -> Result<ExecOutcome> {
        self.record(Call::Inspect(handle.id.clone()));

        let delivery = {
            let mut active = self.active.lock().unwrap();
            let exec = active
                .get_mut(&handle.id)
                .ok_or_else(|| ExecError::Runtime(format!("no such exec: {handle}")))?;
            exec.inspections += 1;
            if exec.inspections <= exec.script.running_polls {
                return Ok(ExecOutcome::running(handle.id.clone()));
            }
            if exec.script.fail_inspect {
                return Err(ExecError::Runtime("exec inspect failed".to_string()));
            }
            exec.delivery.take()
        };

        // Output is complete by the time not-running is reported.
        if let Some(delivery) = delivery {
            delivery
                .await
                .map_err(|e| ExecError::Runtime(format!("frame delivery panicked: {e}")))?;
        }

        let active = self.active.lock().unwrap();
        let exec = &active[&handle.id];
        Ok(ExecOutcome::finished(handle.id.clone(), exec.script.exit_code))
    }

    async fn abort_exec(&self, handle: &ExecHandle) -> Result<()> {
        self.record(Call::Abort(handle.id.clone()));
        Ok(())
    }
}
