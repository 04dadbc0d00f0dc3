//! The abstract execution context the pipeline uses to fire background
//! work (spec §6, §9): `scheduleBackground(task)`, with a Tokio-backed
//! implementation whose `drain` lets tests await completion deterministically.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinSet;

pub trait ExecutionCtx: Send + Sync {
    /// Fire-and-forget: the task runs concurrently with the request that
    /// scheduled it. Failures are the task's own responsibility to log.
    fn schedule_background(&self, task: BoxFuture<'static, ()>);
}

/// Backed by a `JoinSet` so `drain()` can await every outstanding task
/// without needing a handle to each one individually — the same pattern a
/// test harness needs to observe background revalidation completing.
#[derive(Default)]
pub struct TokioExecutionCtx {
    tasks: Mutex<JoinSet<()>>,
}

impl TokioExecutionCtx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Awaits every task scheduled so far. Tasks scheduled by tasks that are
    /// themselves draining are not observed by this call.
    pub async fn drain(&self) {
        let mut pending = {
            let mut tasks = self.tasks.lock();
            std::mem::replace(&mut *tasks, JoinSet::new())
        };
        while pending.join_next().await.is_some() {}
    }
}

impl ExecutionCtx for TokioExecutionCtx {
    fn schedule_background(&self, task: BoxFuture<'static, ()>) {
        self.tasks.lock().spawn(task);
    }
}
