use std::collections::HashMap;
use std::env;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use stevedore_core::{ExecError, ExecHandle, ExecOutcome, ExecSpec, Frame, Result, StreamType};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::router::FrameRouter;
use crate::runtime::ExecRuntime;

const READ_CHUNK_SIZE: usize = 8 * 1024;

enum HostExecState {
    Created,
    Running {
        child: Child,
        readers: Vec<JoinHandle<()>>,
    },
    Exited {
        exit_code: Option<i64>,
        readers: Vec<JoinHandle<()>>,
    },
}

struct HostExec {
    container_id: String,
    spec: ExecSpec,
    state: HostExecState,
}

#[derive(Default)]
pub struct HostRuntime {
    execs: Mutex<HashMap<String, HostExec>>,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, HostExec>>> {
        self.execs
            .lock()
            .map_err(|_| ExecError::Runtime("host exec table lock poisoned".to_string()))
    }
}

#[async_trait]
impl ExecRuntime for HostRuntime {
    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<ExecHandle> {
        spec.validate()?;
        let program = spec.program().unwrap_or_default();
        // Relative paths like `./run.sh` resolve against the exec's working dir.
        let resolved = match &spec.working_dir {
            Some(dir) => which::which_in(program, env::var_os("PATH"), dir),
            None => which::which(program),
        };
        resolved.map_err(|e| {
            ExecError::Runtime(format!("executable `{program}` not found: {e}"))
        })?;

        let handle = ExecHandle::new(Uuid::new_v4().to_string());
        debug!(
            exec_id = %handle,
            container = %container_id,
            command = %spec.display_command(),
            "created host exec"
        );

        self.lock()?.insert(
            handle.id.clone(),
            HostExec {
                container_id: container_id.to_string(),
                spec: spec.clone(),
                state: HostExecState::Created,
            },
        );
        Ok(handle)
    }

    async fn start_exec(&self, handle: &ExecHandle, router: Arc<FrameRouter>) -> Result<()> {
        let mut execs = self.lock()?;
        let exec = execs
            .get_mut(&handle.id)
            .ok_or_else(|| ExecError::Runtime(format!("no such exec: {handle}")))?;

        if !matches!(exec.state, HostExecState::Created) {
            return Err(ExecError::Runtime(format!("exec {handle} already started")));
        }

        let spec = &exec.spec;
        if let Some(user) = &spec.user {
            warn!(exec_id = %handle, user = %user, "host runtime does not switch users; ignoring");
        }

        let mut cmd = Command::new(spec.program().unwrap_or_default());
        cmd.args(spec.args())
            .stdin(Stdio::null())
            .stdout(attach(spec.attach_stdout))
            .stderr(attach(spec.attach_stderr))
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ExecError::Runtime(format!("failed to spawn `{}`: {e}", spec.display_command()))
        })?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, StreamType::Stdout, Arc::clone(&router))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, StreamType::Stderr, Arc::clone(&router))));
        }

        info!(
            exec_id = %handle,
            container = %exec.container_id,
            pid = ?child.id(),
            "started host exec"
        );
        exec.state = HostExecState::Running { child, readers };
        Ok(())
    }

    async fn inspect_exec(&self, handle: &ExecHandle) -> Result<ExecOutcome> {
        let mut execs = self.lock()?;
        let exec = execs
            .get_mut(&handle.id)
            .ok_or_else(|| ExecError::Runtime(format!("no such exec: {handle}")))?;

        let wait = match &mut exec.state {
            HostExecState::Running { child, .. } => Some(child.try_wait()),
            _ => None,
        };

        match wait {
            Some(Ok(Some(status))) => {
                let previous = std::mem::replace(&mut exec.state, HostExecState::Created);
                if let HostExecState::Running { readers, .. } = previous {
                    exec.state = HostExecState::Exited {
                        exit_code: exit_code_of(status),
                        readers,
                    };
                }
            }
            Some(Ok(None)) => return Ok(ExecOutcome::running(handle.id.clone())),
            Some(Err(e)) => {
                return Err(ExecError::Runtime(format!("failed to poll exec {handle}: {e}")))
            }
            None => {}
        }

        let outcome = match &exec.state {
            HostExecState::Created => {
                return Err(ExecError::Runtime(format!(
                    "exec {handle} has not been started"
                )))
            }
            // Not finished until every frame has been routed.
            HostExecState::Exited { exit_code, readers }
                if readers.iter().all(JoinHandle::is_finished) =>
            {
                ExecOutcome::finished(handle.id.clone(), *exit_code)
            }
            _ => return Ok(ExecOutcome::running(handle.id.clone())),
        };

        execs.remove(&handle.id);
        debug!(exec_id = %handle, exit_code = ?outcome.exit_code, "released host exec");
        Ok(outcome)
    }

    async fn abort_exec(&self, handle: &ExecHandle) -> Result<()> {
        let removed = {
            let mut execs = self.lock()?;
            execs.remove(&handle.id)
        };
        let Some(exec) = removed else {
            return Ok(());
        };

        match exec.state {
            HostExecState::Running { mut child, readers } => {
                for reader in &readers {
                    reader.abort();
                }
                child.kill().await.map_err(|e| {
                    ExecError::Runtime(format!("failed to kill exec {handle}: {e}"))
                })?;
                info!(exec_id = %handle, container = %exec.container_id, "killed host exec");
            }
            HostExecState::Exited { readers, .. } => {
                for reader in &readers {
                    reader.abort();
                }
            }
            HostExecState::Created => {}
        }
        Ok(())
    }
}

fn attach(enabled: bool) -> Stdio {
    if enabled {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> Option<i64> {
    use std::os::unix::process::ExitStatusExt;

    // Signal deaths are reported shell-style as 128 + signal.
    status
        .code()
        .map(i64::from)
        .or_else(|| status.signal().map(|sig| 128 + i64::from(sig)))
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> Option<i64> {
    status.code().map(i64::from)
}

async fn pump<S>(mut stream: S, kind: StreamType, router: Arc<FrameRouter>)
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                router.route(&Frame::new(kind.clone(), &buf[..n]));
            }
            Err(e) => {
                warn!(stream = %kind, error = %e, "failed to read exec output");
                break;
            }
        }
    }
}
