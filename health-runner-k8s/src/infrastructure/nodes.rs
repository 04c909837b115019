//! Node listing and the `Annotator` implementation backed by `Api<Node>`
//! (`spec.md` §4.D, §6).

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use health_runner_core::{labels::TaintEffect, topology::NodeRecord, traits::Annotator};
use k8s_openapi::api::core::v1::{Node, Taint};
use kube::{
    Api, Client,
    api::{ListParams, Patch, PatchParams},
};
use serde_json::json;
use tracing::warn;

const GPU_RESOURCE_KEY: &str = "nvidia.com/gpu";

#[derive(Debug, thiserror::Error)]
pub enum NodeListError {
    #[error("failed to list nodes: {0}")]
    Kube(#[from] kube::Error),
}

/// Lists every node the control plane knows about, translated into the
/// core's schema-agnostic `NodeRecord`.
pub async fn list_nodes(client: Client) -> Result<Vec<NodeRecord>, NodeListError> {
    let api: Api<Node> = Api::all(client);
    let nodes = api.list(&ListParams::default()).await?;
    Ok(nodes.items.into_iter().map(node_record).collect())
}

fn node_record(node: Node) -> NodeRecord {
    let name = node.metadata.name.clone().unwrap_or_default();
    let labels: BTreeMap<String, String> = node.metadata.labels.clone().unwrap_or_default().into_iter().collect();

    let spec = node.spec.clone().unwrap_or_default();
    let taints: HashSet<String> = spec.taints.unwrap_or_default().iter().map(taint_to_string).collect();

    let status = node.status.unwrap_or_default();
    let ready = status
        .conditions
        .unwrap_or_default()
        .iter()
        .any(|condition| condition.type_ == "Ready" && condition.status == "True");

    let allocatable_gpus = status
        .allocatable
        .as_ref()
        .and_then(|allocatable| allocatable.get(GPU_RESOURCE_KEY))
        .and_then(|quantity| quantity.0.parse::<u32>().ok())
        .unwrap_or(0);

    let host = labels
        .get("kubernetes.io/hostname")
        .cloned()
        .unwrap_or_else(|| name.clone());

    NodeRecord { id: name, host, labels, taints, ready, allocatable_gpus }
}

fn taint_to_string(taint: &Taint) -> String {
    format!("{}={}:{}", taint.key, taint.value.clone().unwrap_or_default(), taint.effect)
}

/// Reads/writes node labels and taints — the only component allowed to
/// mutate cluster state outside of launching workloads (`spec.md` §4.D).
pub struct KubeAnnotator {
    client: Client,
}

impl KubeAnnotator {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl Annotator for KubeAnnotator {
    async fn set_labels(
        &self,
        node_id: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), health_runner_core::traits::DynError> {
        let patch = Patch::Merge(json!({ "metadata": { "labels": labels } }));
        self.api().patch(node_id, &PatchParams::default(), &patch).await?;
        Ok(())
    }

    async fn clear_labels(
        &self,
        node_id: &str,
        keys: &[String],
    ) -> Result<(), health_runner_core::traits::DynError> {
        // A JSON merge patch removes a key when its value is `null`, which
        // makes this idempotent: clearing an already-absent key is not an
        // error (invariant #8).
        let nulls: BTreeMap<&str, serde_json::Value> =
            keys.iter().map(|k| (k.as_str(), serde_json::Value::Null)).collect();
        let patch = Patch::Merge(json!({ "metadata": { "labels": nulls } }));
        match self.api().patch(node_id, &PatchParams::default(), &patch).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                warn!(node_id, "node missing while clearing result labels");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn taint(
        &self,
        node_id: &str,
        key: &str,
        value: &str,
        effect: TaintEffect,
    ) -> Result<(), health_runner_core::traits::DynError> {
        let api = self.api();
        let node = api.get(node_id).await?;
        let mut taints = node.spec.and_then(|spec| spec.taints).unwrap_or_default();
        taints.retain(|t| t.key != key);
        taints.push(Taint {
            key: key.to_owned(),
            value: Some(value.to_owned()),
            effect: effect.as_str().to_owned(),
            time_added: None,
        });
        let patch = Patch::Merge(json!({ "spec": { "taints": taints } }));
        api.patch(node_id, &PatchParams::default(), &patch).await?;
        Ok(())
    }

    async fn read_labels(
        &self,
        node_id: &str,
    ) -> Result<BTreeMap<String, String>, health_runner_core::traits::DynError> {
        let node = self.api().get(node_id).await?;
        Ok(node.metadata.labels.unwrap_or_default().into_iter().collect())
    }
}
