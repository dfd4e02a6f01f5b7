use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Background task owned by a subsystem or stream session.
pub trait WorkerTask {
    /// True once the task body returned.
    fn is_finished(&self) -> bool;
    /// Cancel the task at its next await point.
    fn cancel(&mut self);
}

impl WorkerTask for JoinHandle<()> {
    fn is_finished(&self) -> bool {
        Self::is_finished(self)
    }

    fn cancel(&mut self) {
        self.abort();
    }
}

/// Shutdown request delivered to a worker's select loop.
pub trait ShutdownSignal {
    /// Deliver the request; a worker that already exited is fine.
    fn fire(self);
}

impl ShutdownSignal for oneshot::Sender<()> {
    fn fire(self) {
        let _ = self.send(());
    }
}

/// What happened to a worker released without being awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Nothing was held.
    Empty,
    /// The worker had already exited.
    Exited,
    /// The worker was still running and got cancelled.
    Cancelled,
}

/// Release a worker without waiting for it.
///
/// Fires the shutdown signal when one is held, then cancels the task unless
/// it already exited. Both slots are left empty.
pub fn release_worker<W, S>(task: &mut Option<W>, shutdown: &mut Option<S>) -> Release
where
    W: WorkerTask,
    S: ShutdownSignal,
{
    if let Some(signal) = shutdown.take() {
        signal.fire();
    }
    match task.take() {
        None => Release::Empty,
        Some(t) if t.is_finished() => Release::Exited,
        Some(mut t) => {
            t.cancel();
            Release::Cancelled
        }
    }
}

/// Owner of a background task with cooperative shutdown.
///
/// `stop()` signals the task and waits for it to exit. Dropping the handle
/// releases it, so a worker never outlives its owner.
#[derive(Debug)]
pub struct StreamHandle {
    task: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StreamHandle {
    /// Wrap a task that listens on the receiving half of `shutdown`.
    #[must_use]
    pub const fn new(task: JoinHandle<()>, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            task: Some(task),
            shutdown: Some(shutdown),
        }
    }

    /// Wrap a task that has no shutdown channel; it can only be cancelled.
    #[must_use]
    pub const fn abort_only(task: JoinHandle<()>) -> Self {
        Self {
            task: Some(task),
            shutdown: None,
        }
    }

    /// Signal the task and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(signal) = self.shutdown.take() {
            signal.fire();
        }
        if let Some(t) = self.task.take() {
            let _ = t.await;
        }
    }

    /// Cancel the task without waiting.
    pub fn abort(mut self) {
        let mut none: Option<oneshot::Sender<()>> = None;
        release_worker(&mut self.task, &mut none);
    }

    /// True once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        release_worker(&mut self.task, &mut self.shutdown);
    }
}
