//! Workload launch and job-status polling (`spec.md` §4.B/§4.C), backed by
//! `Api<Job>` (batch/v1).

use std::collections::BTreeMap;

use async_trait::async_trait;
use health_runner_core::{
    job::{JobHandle, JobStatus},
    traits::{CleanupGuard, DynError, LaunchSpec, Launcher, Watcher},
};
use k8s_openapi::api::{
    batch::v1::{Job, JobSpec},
    core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec},
};
use kube::{
    Api, Client,
    api::{DeleteParams, ObjectMeta, PostParams},
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::lifecycle::cleanup::JobCleanup;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("workload template failed to render a job spec")]
    Template,
    #[error("job materialisation failed after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, #[source] source: kube::Error },
}

/// Materialises a workload with parameter overrides and returns a handle
/// (`spec.md` §4.B). The default implementation renders a single-container
/// batch `Job`; production deployments that install a Helm chart per
/// workload implement this trait against their own chart.
#[async_trait]
pub trait WorkloadTemplate: Send + Sync {
    async fn render(&self, spec: &LaunchSpec, job_name: &str) -> Result<Job, LaunchError>;
}

/// Default template: one pod, one container, overrides passed as env vars.
pub struct JobTemplate {
    pub image: String,
}

#[async_trait]
impl WorkloadTemplate for JobTemplate {
    async fn render(&self, spec: &LaunchSpec, job_name: &str) -> Result<Job, LaunchError> {
        let env: Vec<EnvVar> = spec
            .env
            .iter()
            .map(|(k, v)| EnvVar { name: k.clone(), value: Some(v.clone()), value_from: None })
            .collect();

        Ok(Job {
            metadata: ObjectMeta { name: Some(job_name.to_owned()), ..Default::default() },
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_owned()),
                        containers: vec![Container {
                            name: spec.name.clone(),
                            image: Some(self.image.clone()),
                            env: Some(env),
                            ..Default::default()
                        }],
                        node_selector: node_selector(spec),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                backoff_limit: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

fn node_selector(spec: &LaunchSpec) -> Option<BTreeMap<String, String>> {
    if spec.node_ids.is_empty() {
        return None;
    }
    Some(BTreeMap::from([("kubernetes.io/hostname".to_owned(), spec.node_ids[0].clone())]))
}

pub struct KubeLauncher {
    client: Client,
    namespace: String,
    template: Box<dyn WorkloadTemplate>,
    retry_attempts: u32,
    retry_backoff: std::time::Duration,
}

impl KubeLauncher {
    #[must_use]
    pub fn new(
        client: Client,
        namespace: String,
        template: Box<dyn WorkloadTemplate>,
        retry_attempts: u32,
        retry_backoff: std::time::Duration,
    ) -> Self {
        Self { client, namespace, template, retry_attempts, retry_backoff }
    }

    fn api(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl Launcher for KubeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<(JobHandle, Box<dyn CleanupGuard>), DynError> {
        let job_name = format!("{}-{}", spec.name, Uuid::new_v4().simple());
        let job = self.template.render(spec, &job_name).await?;

        let mut last_err = None;
        for attempt in 1..=self.retry_attempts.max(1) {
            match self.api().create(&PostParams::default(), &job).await {
                Ok(_) => {
                    info!(job = %job_name, attempt, "job created");
                    let cleanup = JobCleanup::new(self.client.clone(), self.namespace.clone(), job_name.clone());
                    return Ok((JobHandle::new(job_name, None), Box::new(cleanup)));
                }
                Err(err) => {
                    warn!(job = %job_name, attempt, error = ?err, "job creation failed, retrying");
                    last_err = Some(err);
                    if attempt < self.retry_attempts {
                        sleep(self.retry_backoff).await;
                    }
                }
            }
        }

        Err(Box::new(LaunchError::Exhausted {
            attempts: self.retry_attempts,
            source: last_err.expect("at least one attempt recorded an error"),
        }))
    }
}

pub struct KubeWatcher {
    client: Client,
    namespace: String,
    poll_interval: std::time::Duration,
}

impl KubeWatcher {
    #[must_use]
    pub const fn new(client: Client, namespace: String, poll_interval: std::time::Duration) -> Self {
        Self { client, namespace, poll_interval }
    }

    fn api(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl Watcher for KubeWatcher {
    async fn status(&self, job: &JobHandle) -> Result<JobStatus, DynError> {
        match self.api().get(&job.name).await {
            Ok(resource) => {
                let status = resource.status.unwrap_or_default();
                if status.succeeded.unwrap_or(0) >= 1 {
                    Ok(JobStatus::Succeeded)
                } else if status.failed.unwrap_or(0) >= 1 {
                    Ok(JobStatus::Failed)
                } else {
                    Ok(JobStatus::Running)
                }
            }
            Err(err) => {
                warn!(job = %job.name, error = ?err, "transient error polling job status");
                Ok(JobStatus::Running)
            }
        }
    }

    fn poll_interval(&self) -> std::time::Duration {
        self.poll_interval
    }
}

/// Deletes a job; used by the cleanup guard and directly by callers that
/// want synchronous teardown (tests, the performance runner's per-sweep
/// cleanup in `spec.md` §4.G step 5).
pub async fn delete_job(client: &Client, namespace: &str, name: &str) -> Result<(), kube::Error> {
    let api: Api<Job> = Api::namespaced(client.clone(), namespace);
    api.delete(name, &DeleteParams::background()).await?;
    Ok(())
}
