use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use stevedore_core::{ExecError, Frame, StreamType};
use tracing::{trace, warn};

/// Caller-supplied consumer of exec output.
///
/// Returning an error never stops the stream; the router logs it and keeps
/// delivering subsequent frames.
pub trait OutputHandler: Send + Sync {
    fn on_frame(&self, frame: &Frame) -> anyhow::Result<()>;
}

impl<F> OutputHandler for F
where
    F: Fn(&Frame) -> anyhow::Result<()> + Send + Sync,
{
    fn on_frame(&self, frame: &Frame) -> anyhow::Result<()> {
        self(frame)
    }
}

type SharedWriter = Mutex<Box<dyn Write + Send>>;

/// Default destination for frames when no handler is configured.
pub struct ConsoleSink {
    stdout: SharedWriter,
    stderr: SharedWriter,
}

impl ConsoleSink {
    pub fn new<O, E>(stdout: O, stderr: E) -> Self
    where
        O: Write + Send + 'static,
        E: Write + Send + 'static,
    {
        Self {
            stdout: Mutex::new(Box::new(stdout)),
            stderr: Mutex::new(Box::new(stderr)),
        }
    }

    /// Sink bound to this process's standard output and error.
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    fn write_stdout(&self, payload: &[u8]) -> io::Result<()> {
        write_flush(&self.stdout, payload)
    }

    fn write_stderr(&self, payload: &[u8]) -> io::Result<()> {
        write_flush(&self.stderr, payload)
    }
}

fn write_flush(target: &SharedWriter, payload: &[u8]) -> io::Result<()> {
    let mut writer = target
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "console sink lock poisoned"))?;
    writer.write_all(payload)?;
    writer.flush()
}

/// What happened to a routed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Stdout,
    Stderr,
    Handler,
    HandlerFailed,
    SinkFailed,
    Anomaly,
}

#[derive(Clone)]
enum RouteTarget {
    Console(Arc<ConsoleSink>),
    Handler(Arc<dyn OutputHandler>),
}

/// Dispatches the frames of one exec instance.
#[derive(Clone)]
pub struct FrameRouter {
    target: RouteTarget,
    exec_id: Option<String>,
}

impl FrameRouter {
    pub fn console(sink: Arc<ConsoleSink>) -> Self {
        Self {
            target: RouteTarget::Console(sink),
            exec_id: None,
        }
    }

    pub fn handler(handler: Arc<dyn OutputHandler>) -> Self {
        Self {
            target: RouteTarget::Handler(handler),
            exec_id: None,
        }
    }

    /// Tag log records emitted while routing with the exec id.
    pub fn for_exec(mut self, exec_id: impl Into<String>) -> Self {
        self.exec_id = Some(exec_id.into());
        self
    }

    pub fn route(&self, frame: &Frame) -> RouteOutcome {
        let exec_id = self.exec_id.as_deref().unwrap_or("-");
        trace!(
            exec_id = %exec_id,
            stream = %frame.stream,
            bytes = frame.payload.len(),
            "routing frame"
        );

        match &self.target {
            RouteTarget::Handler(handler) => match handler.on_frame(frame) {
                Ok(()) => RouteOutcome::Handler,
                Err(e) => {
                    let err = ExecError::Handler(format!("{e:#}"));
                    warn!(
                        exec_id = %exec_id,
                        stream = %frame.stream,
                        error = %err,
                        "output handler failed; continuing with next frame"
                    );
                    RouteOutcome::HandlerFailed
                }
            },
            RouteTarget::Console(sink) => {
                let (result, outcome) = match frame.stream {
                    StreamType::Stdout | StreamType::Raw => {
                        (sink.write_stdout(&frame.payload), RouteOutcome::Stdout)
                    }
                    StreamType::Stderr => {
                        (sink.write_stderr(&frame.payload), RouteOutcome::Stderr)
                    }
                    StreamType::Other(ref tag) => {
                        warn!(
                            exec_id = %exec_id,
                            tag = %tag,
                            bytes = frame.payload.len(),
                            "frame with unknown stream type dropped"
                        );
                        return RouteOutcome::Anomaly;
                    }
                };

                if let Err(e) = result {
                    warn!(
                        exec_id = %exec_id,
                        stream = %frame.stream,
                        error = %e,
                        "failed to write frame to console"
                    );
                    return RouteOutcome::SinkFailed;
                }
                outcome
            }
        }
    }
}

impl Default for FrameRouter {
    fn default() -> Self {
        Self::console(Arc::new(ConsoleSink::stdio()))
    }
}
