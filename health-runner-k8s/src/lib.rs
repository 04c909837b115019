//! Concrete control-plane adapter backed by `kube`/`k8s-openapi`, plus the
//! `object_store`-backed results sink.

pub mod infrastructure;
pub mod lifecycle;
pub mod sink;

pub use infrastructure::jobs::{JobTemplate, KubeLauncher, KubeWatcher, LaunchError, WorkloadTemplate};
pub use infrastructure::nodes::{KubeAnnotator, NodeListError, list_nodes};
pub use lifecycle::cleanup::{CleanupList, JobCleanup};
pub use sink::{ObjectStoreSink, SinkError};
