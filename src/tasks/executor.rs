//! Executor contract — one implementation per task type.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;

use super::context::WorkerContext;
use crate::error::ExecutorError;

/// Domain work behind a task.
///
/// Return `Ok(())` on success, `Err(ExecutorError::Failed)` on a domain
/// failure, and propagate `ExecutorError::Cancelled` from
/// [`WorkerContext::check_cancelled`] to stop early. The engine finalizes the
/// task from the return value, so reporting a terminal status yourself is
/// optional.
#[async_trait]
pub trait TaskExecutor: Send + 'static {
    /// Payload shape published for this task type.
    type Payload: Serialize + Send + Sync + 'static;

    async fn execute(&mut self, ctx: &WorkerContext<Self::Payload>) -> Result<(), ExecutorError>;
}

/// Executor backed by an async closure, for collaborators that don't need a
/// dedicated type.
///
/// ```ignore
/// manager.submit("MetadataScanTask", counters, FnExecutor::new(|ctx| async move {
///     ctx.check_cancelled()?;
///     ctx.report_progress(50.0).await?;
///     Ok(())
/// })).await?;
/// ```
pub struct FnExecutor<P, F> {
    run: Option<F>,
    _payload: PhantomData<fn(P)>,
}

impl<P, F, Fut> FnExecutor<P, F>
where
    F: FnOnce(WorkerContext<P>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ExecutorError>> + Send + 'static,
{
    pub fn new(run: F) -> Self {
        Self {
            run: Some(run),
            _payload: PhantomData,
        }
    }
}

impl<P, F> fmt::Debug for FnExecutor<P, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExecutor")
            .field("consumed", &self.run.is_none())
            .finish()
    }
}

#[async_trait]
impl<P, F, Fut> TaskExecutor for FnExecutor<P, F>
where
    P: Serialize + Send + Sync + 'static,
    F: FnOnce(WorkerContext<P>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ExecutorError>> + Send + 'static,
{
    type Payload = P;

    async fn execute(&mut self, ctx: &WorkerContext<P>) -> Result<(), ExecutorError> {
        let run = self
            .run
            .take()
            .ok_or_else(|| ExecutorError::failed("executor already ran"))?;
        run(ctx.clone()).await
    }
}
