//! Results upload (`spec.md` §4.I), backed by `object_store` so the
//! concrete backend (GCS in production, a local filesystem in tests) is
//! swappable without touching the driver.

use std::sync::Arc;

use async_trait::async_trait;
use health_runner_core::{results::Report, traits::Sink};
use object_store::{ObjectStore, gcp::GoogleCloudStorageBuilder, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to configure GCS store for bucket {bucket}: {source}")]
    Configure { bucket: String, #[source] source: object_store::Error },
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to upload report to {key}: {source}")]
    Upload { key: String, #[source] source: object_store::Error },
}

pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreSink {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn gcs(bucket: &str) -> Result<Self, SinkError> {
        let store = GoogleCloudStorageBuilder::new()
            .with_bucket_name(bucket)
            .build()
            .map_err(|source| SinkError::Configure { bucket: bucket.to_owned(), source })?;
        Ok(Self::new(Arc::new(store)))
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    async fn upload(&self, object_key: &str, report: &Report) -> Result<(), health_runner_core::traits::DynError> {
        let body = serde_json::to_vec(report).map_err(SinkError::Serialize)?;
        let path = Path::from(object_key);
        self.store
            .put(&path, body.into())
            .await
            .map_err(|source| SinkError::Upload { key: object_key.to_owned(), source })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use health_runner_core::results::{EntityKind, HealthResult, HealthResultEntry};
    use health_runner_core::verdict::Verdict;
    use object_store::local::LocalFileSystem;

    use super::*;

    #[tokio::test]
    async fn uploads_report_to_local_filesystem() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(LocalFileSystem::new_with_prefix(dir.path()).expect("local store"));
        let sink = ObjectStoreSink::new(store.clone());

        let report = Report::new(vec![HealthResult {
            name: "nccl".to_owned(),
            kind: EntityKind::Node,
            entries: vec![HealthResultEntry { id: "n0".to_owned(), status: Verdict::Pass, measurements: vec![] }],
        }]);

        sink.upload("health_results_test.json", &report).await.expect("upload");

        let bytes = store.get(&Path::from("health_results_test.json")).await.expect("get").bytes().await.expect("bytes");
        let round_tripped: Report = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(round_tripped, report);
    }
}
