//! Typed topology model: `Cluster -> Rack -> Node`, built once per run from
//! whatever the control plane reports and never mutated afterwards.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Sentinel used for a node whose topology labels are missing under either
/// known schema.
pub const UNKNOWN_TOPOLOGY_ID: &str = "unknown";

/// Label schema a fleet may expose its rack/block placement under. The
/// model locks onto whichever is present on the first GPU node it sees and
/// applies that choice uniformly to the whole snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologySchema {
    /// `topology.kubernetes.io/{zone,block,rack}`-style keys.
    V1,
    /// Vendor-specific GPU placement keys
    /// (`cloud.google.com/gce-{cluster,rack}`-style).
    V2,
}

impl TopologySchema {
    const V1_CLUSTER_KEY: &'static str = "topology.kubernetes.io/zone";
    const V1_RACK_KEY: &'static str = "topology.kubernetes.io/rack";
    const V2_CLUSTER_KEY: &'static str = "cloud.google.com/gce-cluster";
    const V2_RACK_KEY: &'static str = "cloud.google.com/gce-rack";

    fn cluster_key(self) -> &'static str {
        match self {
            Self::V1 => Self::V1_CLUSTER_KEY,
            Self::V2 => Self::V2_CLUSTER_KEY,
        }
    }

    fn rack_key(self) -> &'static str {
        match self {
            Self::V1 => Self::V1_RACK_KEY,
            Self::V2 => Self::V2_RACK_KEY,
        }
    }

    fn detect(labels: &BTreeMap<String, String>) -> Option<Self> {
        if labels.contains_key(Self::V1_CLUSTER_KEY) || labels.contains_key(Self::V1_RACK_KEY) {
            Some(Self::V1)
        } else if labels.contains_key(Self::V2_CLUSTER_KEY)
            || labels.contains_key(Self::V2_RACK_KEY)
        {
            Some(Self::V2)
        } else {
            None
        }
    }
}

/// A node record as reported by the control plane, before it has been
/// organised into the `Cluster/Rack` tree.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub id: String,
    pub host: String,
    pub labels: BTreeMap<String, String>,
    pub taints: HashSet<String>,
    pub ready: bool,
    pub allocatable_gpus: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub host: String,
    pub labels: BTreeMap<String, String>,
    pub taints: HashSet<String>,
    pub ready: bool,
    pub allocatable_gpus: u32,
}

impl Node {
    #[must_use]
    pub fn has_gpu(&self) -> bool {
        self.allocatable_gpus > 0
    }

    #[must_use]
    pub fn matches_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).is_some_and(|v| v == value)
    }

    #[must_use]
    pub fn has_taint_prefix(&self, prefix: &str) -> bool {
        self.taints.iter().any(|taint| taint.starts_with(prefix))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rack {
    pub id: String,
    pub nodes: Vec<Node>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub racks: Vec<Rack>,
}

/// Optional filters applied while a snapshot is assembled, mirroring the
/// `FILTER_LABEL_NAME`/`FILTER_LABEL_VALUE` config keys and the
/// already-quarantined-taint exclusion.
#[derive(Clone, Debug, Default)]
pub struct TopologyFilters {
    pub require_gpu: bool,
    pub require_ready: bool,
    pub label: Option<(String, String)>,
    pub exclude_taint_prefix: Option<String>,
}

impl TopologyFilters {
    fn admits(&self, node: &NodeRecord) -> bool {
        if self.require_gpu && node.allocatable_gpus == 0 {
            return false;
        }
        if self.require_ready && !node.ready {
            return false;
        }
        if let Some((key, value)) = &self.label
            && node.labels.get(key) != Some(value)
        {
            return false;
        }
        if let Some(prefix) = &self.exclude_taint_prefix
            && node.taints.iter().any(|taint| taint.starts_with(prefix))
        {
            return false;
        }
        true
    }
}

/// Immutable snapshot of the fleet produced at the start of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TopologySnapshot {
    clusters: Vec<Cluster>,
}

impl TopologySnapshot {
    /// Build a snapshot from raw node records, applying `filters` and
    /// locking onto whichever topology schema the first admitted GPU node
    /// exposes (falling back to the single `"unknown"` bucket).
    #[must_use]
    pub fn build(records: Vec<NodeRecord>, filters: &TopologyFilters) -> Self {
        let admitted: Vec<NodeRecord> = records.into_iter().filter(|n| filters.admits(n)).collect();

        let schema = admitted
            .iter()
            .find(|n| n.allocatable_gpus > 0)
            .and_then(|n| TopologySchema::detect(&n.labels))
            .or_else(|| admitted.iter().find_map(|n| TopologySchema::detect(&n.labels)));

        let mut clusters: BTreeMap<String, BTreeMap<String, Vec<Node>>> = BTreeMap::new();

        for record in admitted {
            let (cluster_id, rack_id) = schema.map_or_else(
                || (UNKNOWN_TOPOLOGY_ID.to_owned(), UNKNOWN_TOPOLOGY_ID.to_owned()),
                |schema| {
                    let cluster_id = record
                        .labels
                        .get(schema.cluster_key())
                        .cloned()
                        .unwrap_or_else(|| UNKNOWN_TOPOLOGY_ID.to_owned());
                    let rack_id = record
                        .labels
                        .get(schema.rack_key())
                        .cloned()
                        .unwrap_or_else(|| UNKNOWN_TOPOLOGY_ID.to_owned());
                    (cluster_id, rack_id)
                },
            );

            let node = Node {
                id: record.id,
                host: record.host,
                labels: record.labels,
                taints: record.taints,
                ready: record.ready,
                allocatable_gpus: record.allocatable_gpus,
            };

            clusters.entry(cluster_id).or_default().entry(rack_id).or_default().push(node);
        }

        let clusters = clusters
            .into_iter()
            .map(|(cluster_id, racks)| Cluster {
                id: cluster_id,
                racks: racks
                    .into_iter()
                    .map(|(rack_id, nodes)| Rack { id: rack_id, nodes })
                    .collect(),
            })
            .collect();

        tracing::debug!(schema = ?schema, "topology snapshot built");

        Self { clusters }
    }

    #[must_use]
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    #[must_use]
    pub fn racks(&self) -> Vec<&Rack> {
        self.clusters.iter().flat_map(|c| c.racks.iter()).collect()
    }

    #[must_use]
    pub fn nodes(&self) -> Vec<&Node> {
        self.racks().into_iter().flat_map(|r| r.nodes.iter()).collect()
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes().into_iter().find(|n| n.id == id)
    }

    /// Rack id a node belongs to, if it is present in the snapshot.
    #[must_use]
    pub fn rack_of(&self, node_id: &str) -> Option<&str> {
        self.clusters
            .iter()
            .flat_map(|c| c.racks.iter())
            .find(|r| r.nodes.iter().any(|n| n.id == node_id))
            .map(|r| r.id.as_str())
    }

    /// Cluster id a node belongs to, if it is present in the snapshot.
    #[must_use]
    pub fn cluster_of(&self, node_id: &str) -> Option<&str> {
        self.clusters
            .iter()
            .find(|c| c.racks.iter().any(|r| r.nodes.iter().any(|n| n.id == node_id)))
            .map(|c| c.id.as_str())
    }
}
