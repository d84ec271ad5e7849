use std::sync::Arc;

use async_trait::async_trait;
use stevedore_core::{ExecHandle, ExecOutcome, ExecSpec, Result};

use crate::router::FrameRouter;

/// Container primitives the session is built on.
///
/// Every frame of one exec must go through the supplied router, in the order
/// it was produced.
#[async_trait]
pub trait ExecRuntime: Send + Sync {
    /// Create an exec instance bound to `container_id` without starting it.
    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<ExecHandle>;

    /// Start a created exec in attached (non-detached) streaming mode.
    ///
    /// Resolves once the runtime acknowledged the start, not on completion.
    async fn start_exec(&self, handle: &ExecHandle, router: Arc<FrameRouter>) -> Result<()>;

    /// Point-in-time state of an exec instance.
    async fn inspect_exec(&self, handle: &ExecHandle) -> Result<ExecOutcome>;

    /// Stop an exec the session gave up on and release what the runtime holds
    /// for it. Runtimes that own no local resources can keep the default.
    async fn abort_exec(&self, _handle: &ExecHandle) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<R> ExecRuntime for Arc<R>
where
    R: ExecRuntime + ?Sized,
{
    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<ExecHandle> {
        (**self).create_exec(container_id, spec).await
    }

    async fn start_exec(&self, handle: &ExecHandle, router: Arc<FrameRouter>) -> Result<()> {
        (**self).start_exec(handle, router).await
    }

    async fn inspect_exec(&self, handle: &ExecHandle) -> Result<ExecOutcome> {
        (**self).inspect_exec(handle).await
    }

    async fn abort_exec(&self, handle: &ExecHandle) -> Result<()> {
        (**self).abort_exec(handle).await
    }
}
