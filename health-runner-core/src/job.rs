//! Job handle lifecycle (`spec.md` §3 "Job handle").

use std::time::{SystemTime, UNIX_EPOCH};

/// A launched workload, owned by the run that created it until the
/// watcher observes a terminal state (or the global deadline force-frees
/// it).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
    pub created_at_epoch_secs: u64,
    pub release_handle: Option<String>,
}

impl JobHandle {
    #[must_use]
    pub fn new(name: impl Into<String>, release_handle: Option<String>) -> Self {
        let created_at_epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            name: name.into(),
            created_at_epoch_secs,
            release_handle,
        }
    }
}

/// Terminal status of a launched job as reported by the control plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}
