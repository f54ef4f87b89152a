//! Caller-supplied work bound to ships, and the handles that report results.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::core::provider::ShellSession;
use crate::core::ship::Ship;
use crate::core::{AppResult, FleetError, FleetResult};

/// Routine that prepares a scratch instance before it is snapshotted.
pub type PrepareFn =
    Arc<dyn Fn(Arc<dyn ShellSession>) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// Box an async closure as a [`PrepareFn`].
///
/// ```rust,ignore
/// let prepare = prepare_fn(|shell| async move {
///     shell.exec(ShellCommand::new("yum -y update").with_pty()).await?;
///     Ok(())
/// });
/// ```
pub fn prepare_fn<F, Fut>(f: F) -> PrepareFn
where
    F: Fn(Arc<dyn ShellSession>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    Arc::new(move |session| Box::pin(f(session)))
}

/// A preparation routine that does nothing.
#[must_use]
pub fn noop_prepare() -> PrepareFn {
    prepare_fn(|_| async { Ok(()) })
}

/// Future resolving to the result of a submitted job.
#[derive(Debug)]
#[must_use = "the job result is lost if the handle is dropped"]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<FleetResult<T>>,
}

impl<T> JobHandle<T> {
    pub(crate) const fn new(rx: oneshot::Receiver<FleetResult<T>>) -> Self {
        Self { rx }
    }

    /// A handle that is already settled with `error`.
    pub(crate) fn failed(error: FleetError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { rx }
    }
}

impl<T> Future for JobHandle<T> {
    type Output = FleetResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(FleetError::ShutDown)))
    }
}

/// Type-erased job waiting in the scheduler queue.
pub(crate) trait QueuedJob: Send {
    /// Run on `ship`; `on_settled` receives the ship and whether the job succeeded.
    fn dispatch(self: Box<Self>, ship: Ship, on_settled: Box<dyn FnOnce(Ship, bool) + Send>);
    /// Fail without running.
    fn reject(self: Box<Self>, error: FleetError);
}

/// A job together with its completion channel.
pub(crate) struct PendingJob<T, F> {
    work: F,
    reply: oneshot::Sender<FleetResult<T>>,
}

impl<T, F> PendingJob<T, F> {
    pub(crate) const fn new(work: F, reply: oneshot::Sender<FleetResult<T>>) -> Self {
        Self { work, reply }
    }
}

impl<T, F, Fut> QueuedJob for PendingJob<T, F>
where
    T: Send + 'static,
    F: FnOnce(Arc<dyn ShellSession>) -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<T>> + Send + 'static,
{
    fn dispatch(self: Box<Self>, ship: Ship, on_settled: Box<dyn FnOnce(Ship, bool) + Send>) {
        let Self { work, reply } = *self;
        tokio::spawn(async move {
            // A panicking job settles like a failed one so its ship is disposed.
            let result = AssertUnwindSafe(ship.run(work))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panicked(payload.as_ref())));
            on_settled(ship, result.is_ok());
            // The caller may have stopped waiting; the ship is already accounted for.
            let _ = reply.send(result);
        });
    }

    fn reject(self: Box<Self>, error: FleetError) {
        let _ = self.reply.send(Err(error));
    }
}

fn panicked(payload: &(dyn Any + Send)) -> FleetError {
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    FleetError::Job(anyhow::anyhow!("job panicked: {message}"))
}
