//! Capability traits the k8s adapter implements and the driver consumes:
//! `Launcher`, `Watcher`, `Annotator`, `Sink`, plus the idempotent
//! `CleanupGuard` used to release launched jobs exactly once.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};

use crate::job::{JobHandle, JobStatus};
use crate::labels::TaintEffect;
use crate::results::Report;

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// A workload invocation targeting a fixed set of nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub name: String,
    pub node_ids: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Starts workloads on the control plane. Returns a handle plus the guard
/// that releases whatever was acquired; callers must run the guard's
/// `cleanup` on every exit path, including a deadline that cuts the run
/// short before the handle ever reaches a terminal state.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<(JobHandle, Box<dyn CleanupGuard>), DynError>;
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("{message}")]
    Timeout { message: String },
    #[error(transparent)]
    ControlPlane(#[from] DynError),
}

/// Observes job status on the control plane, polling until a terminal state
/// or the deadline elapses.
#[async_trait]
pub trait Watcher: Send + Sync {
    async fn status(&self, job: &JobHandle) -> Result<JobStatus, DynError>;

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn wait_until_terminal(&self, job: &JobHandle, deadline: Duration) -> Result<JobStatus, WatchError> {
        let poll_interval = self.poll_interval();
        let wait = timeout(deadline, async {
            loop {
                let status = self.status(job).await?;
                if status.is_terminal() {
                    return Ok(status);
                }
                sleep(poll_interval).await;
            }
        })
        .await;

        match wait {
            Ok(result) => result.map_err(WatchError::ControlPlane),
            Err(_) => Err(WatchError::Timeout {
                message: format!("job {} did not reach a terminal state in time", job.name),
            }),
        }
    }
}

/// Reads and writes the node labels/taints the rest of the system treats as
/// the single source of truth for in-flight and final verdicts.
#[async_trait]
pub trait Annotator: Send + Sync {
    async fn set_labels(&self, node_id: &str, labels: &BTreeMap<String, String>) -> Result<(), DynError>;

    async fn clear_labels(&self, node_id: &str, keys: &[String]) -> Result<(), DynError>;

    async fn taint(
        &self,
        node_id: &str,
        key: &str,
        value: &str,
        effect: TaintEffect,
    ) -> Result<(), DynError>;

    async fn read_labels(&self, node_id: &str) -> Result<BTreeMap<String, String>, DynError>;
}

/// Uploads the final report to durable storage.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn upload(&self, object_key: &str, report: &Report) -> Result<(), DynError>;
}

/// Releases whatever a launcher acquired. Implementations must make
/// `cleanup` safe to call at most once; the common pattern is an
/// `Option<T>::take`-guarded inner value so a guard can be driven from the
/// happy path, a timeout branch, or a `Drop` impl without double-freeing.
pub trait CleanupGuard: Send {
    fn cleanup(self: Box<Self>);
}

/// A `CleanupGuard` that does nothing; used where a launcher's jobs are
/// self-cleaning or ownership of teardown lies elsewhere.
pub struct NoopCleanup;

impl CleanupGuard for NoopCleanup {
    fn cleanup(self: Box<Self>) {}
}
