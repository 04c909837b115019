//! Performance Runner (`spec.md` §4.G): runs one job per element of a test
//! sweep against each topology level (rack or block) with more than one
//! node, evaluating every eligible level rather than stopping at the
//! first (per the resolved Open Question in `SPEC_FULL.md` §9).

use crate::{results::EntityKind, topology::TopologySnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyLevel {
    Rack,
    /// Maps onto the model's `Cluster` grouping, which plays the role of
    /// the glossary's "Block / SBRG" level above rack.
    Block,
}

impl TopologyLevel {
    #[must_use]
    pub const fn entity_kind(self) -> EntityKind {
        match self {
            Self::Rack => EntityKind::Rack,
            Self::Block => EntityKind::Block,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LevelGroup {
    pub id: String,
    pub node_ids: Vec<String>,
}

/// One sweep element, e.g. a distinct NCCL benchmark variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepElement {
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PerformanceInvocation {
    pub level: LevelGroup,
    pub sweep: SweepElement,
}

#[derive(Debug, Default)]
pub struct PerformancePlan {
    pub invocations: Vec<PerformanceInvocation>,
    pub skipped: Vec<LevelGroup>,
}

pub struct PerformanceRunner;

impl PerformanceRunner {
    fn groups(snapshot: &TopologySnapshot, level: TopologyLevel) -> Vec<LevelGroup> {
        match level {
            TopologyLevel::Rack => snapshot
                .racks()
                .into_iter()
                .map(|rack| LevelGroup {
                    id: rack.id.clone(),
                    node_ids: rack.nodes.iter().map(|n| n.id.clone()).collect(),
                })
                .collect(),
            TopologyLevel::Block => snapshot
                .clusters()
                .iter()
                .map(|cluster| LevelGroup {
                    id: cluster.id.clone(),
                    node_ids: cluster
                        .racks
                        .iter()
                        .flat_map(|r| r.nodes.iter())
                        .map(|n| n.id.clone())
                        .collect(),
                })
                .collect(),
        }
    }

    /// Builds one invocation per (eligible level, sweep element) pair.
    /// Levels with at most one node are recorded as skipped up front and
    /// never launched against.
    #[must_use]
    pub fn plan(snapshot: &TopologySnapshot, level: TopologyLevel, sweep: &[SweepElement]) -> PerformancePlan {
        let mut plan = PerformancePlan::default();
        for group in Self::groups(snapshot, level) {
            if group.node_ids.len() <= 1 {
                plan.skipped.push(group);
                continue;
            }
            for element in sweep {
                plan.invocations.push(PerformanceInvocation {
                    level: group.clone(),
                    sweep: element.clone(),
                });
            }
        }
        plan
    }
}

/// The master participant of a launched job is conventionally the rank-0
/// pod, recognisable by a `-0` index suffix in its name (`spec.md` §4.G
/// step 3).
#[must_use]
pub fn is_master_participant(pod_name: &str) -> bool {
    pod_name.ends_with("-0")
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use super::*;
    use crate::topology::{NodeRecord, TopologyFilters};

    fn record(id: &str) -> NodeRecord {
        NodeRecord {
            id: id.to_owned(),
            host: format!("{id}.local"),
            labels: BTreeMap::new(),
            taints: HashSet::new(),
            ready: true,
            allocatable_gpus: 8,
        }
    }

    #[test]
    fn small_block_is_skipped_without_launch() {
        let mut big = BTreeMap::new();
        big.insert("cloud.google.com/gce-cluster".to_owned(), "block-a".to_owned());
        let mut small = BTreeMap::new();
        small.insert("cloud.google.com/gce-cluster".to_owned(), "block-b".to_owned());

        let records = vec![
            NodeRecord { labels: big.clone(), ..record("a0") },
            NodeRecord { labels: big.clone(), ..record("a1") },
            NodeRecord { labels: big, ..record("a2") },
            NodeRecord { labels: small, ..record("b0") },
        ];
        let snapshot = TopologySnapshot::build(records, &TopologyFilters::default());
        let sweep = vec![SweepElement { label: "all_gather_perf".to_owned() }];
        let plan = PerformanceRunner::plan(&snapshot, TopologyLevel::Block, &sweep);

        assert_eq!(plan.invocations.len(), 1);
        assert_eq!(plan.invocations[0].level.id, "block-a");
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].id, "block-b");
    }

    #[test]
    fn master_participant_recognised_by_index_suffix() {
        assert!(is_master_participant("nccl-perf-job-0"));
        assert!(!is_master_participant("nccl-perf-job-1"));
    }
}
