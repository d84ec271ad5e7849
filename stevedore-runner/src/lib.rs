pub mod host;
pub mod probe;
pub mod router;
pub mod runtime;
pub mod session;
pub mod validator;

pub use host::HostRuntime;
pub use probe::{LivenessProbe, ProbeState};
pub use router::{ConsoleSink, FrameRouter, OutputHandler, RouteOutcome};
pub use runtime::ExecRuntime;
pub use session::{ExecSession, SessionError};
pub use validator::ExitCodeValidator;
