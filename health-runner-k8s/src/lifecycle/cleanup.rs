//! Idempotent job teardown (`spec.md` §3 "Job handle", invariant #3: the
//! cleanup closure runs exactly once on every exit path).

use health_runner_core::traits::CleanupGuard;
use kube::Client;
use tokio::runtime::Handle;
use tracing::warn;

use crate::infrastructure::jobs::delete_job;

/// Deletes a launched job exactly once. `Option::take` makes `cleanup`
/// safe to call from the happy path, a deadline branch, or `Drop` without
/// double-freeing, mirroring the teacher's `RunnerCleanup`.
pub struct JobCleanup {
    client: Client,
    namespace: String,
    job_name: String,
}

impl JobCleanup {
    #[must_use]
    pub const fn new(client: Client, namespace: String, job_name: String) -> Self {
        Self { client, namespace, job_name }
    }

    async fn delete(&self) {
        if let Err(err) = delete_job(&self.client, &self.namespace, &self.job_name).await {
            warn!(job = %self.job_name, namespace = %self.namespace, error = ?err, "job cleanup failed");
        }
    }
}

impl CleanupGuard for JobCleanup {
    fn cleanup(self: Box<Self>) {
        if let Ok(handle) = Handle::try_current() {
            let this = *self;
            handle.spawn(async move { this.delete().await });
            return;
        }

        match tokio::runtime::Runtime::new() {
            Ok(rt) => rt.block_on(self.delete()),
            Err(err) => warn!(error = ?err, "unable to create cleanup runtime; job left running"),
        }
    }
}

/// A guard that owns a list of per-job guards and releases all of them;
/// the driver's deferred-cleanup list (`spec.md` §5) is built from these.
pub struct CleanupList {
    guards: Vec<Box<dyn CleanupGuard>>,
}

impl CleanupList {
    #[must_use]
    pub const fn new() -> Self {
        Self { guards: Vec::new() }
    }

    pub fn push(&mut self, guard: Box<dyn CleanupGuard>) {
        self.guards.push(guard);
    }

    pub fn drain(&mut self) {
        for guard in self.guards.drain(..) {
            guard.cleanup();
        }
    }
}

impl Default for CleanupList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CleanupList {
    fn drop(&mut self) {
        self.drain();
    }
}
