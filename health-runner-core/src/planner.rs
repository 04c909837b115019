//! Pair Planner (`spec.md` §4.E): turns a topology snapshot plus a pairing
//! mode into the set of pair-test invocations for the first pass, and
//! (conditionally) a diagnostic second pass over suspect nodes.

use std::collections::HashMap;

use rand::{Rng, seq::SliceRandom as _};

use crate::topology::TopologySnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingMode {
    IntraRack,
    InterRack,
    InterCluster,
    Random,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pair {
    pub a: String,
    pub b: String,
}

impl Pair {
    fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self { a: a.into(), b: b.into() }
    }
}

/// Shuffles `items`, pops pairs from the back, and pairs a single leftover
/// item with any other item drawn uniformly (never itself) — the
/// deterministic-given-a-seed matching rule in `spec.md` §4.E.
fn perfect_matching<T: Clone>(items: &[T], rng: &mut impl Rng) -> Vec<(T, T)> {
    let mut indices: Vec<usize> = (0..items.len()).collect();
    indices.shuffle(rng);

    let mut pairs = Vec::with_capacity(items.len() / 2);
    while indices.len() >= 2 {
        let b = indices.pop().unwrap();
        let a = indices.pop().unwrap();
        pairs.push((items[a].clone(), items[b].clone()));
    }

    if let Some(leftover) = indices.pop() {
        if items.len() > 1 {
            let other = loop {
                let candidate = rng.gen_range(0..items.len());
                if candidate != leftover {
                    break candidate;
                }
            };
            pairs.push((items[leftover].clone(), items[other].clone()));
        }
    }

    pairs
}

pub struct PairPlanner;

impl PairPlanner {
    /// First-pass invocation set for the given pairing mode.
    #[must_use]
    pub fn plan(snapshot: &TopologySnapshot, mode: PairingMode, rng: &mut impl Rng) -> Vec<Pair> {
        match mode {
            PairingMode::IntraRack => Self::plan_intra_rack(snapshot, rng),
            PairingMode::InterRack => Self::plan_inter_rack(snapshot, rng),
            PairingMode::InterCluster => Self::plan_inter_cluster(snapshot, rng),
            PairingMode::Random => Self::plan_random(snapshot, rng),
        }
    }

    fn plan_intra_rack(snapshot: &TopologySnapshot, rng: &mut impl Rng) -> Vec<Pair> {
        let mut pairs = Vec::new();
        for rack in snapshot.racks() {
            if rack.nodes.len() < 2 {
                continue;
            }
            let ids: Vec<String> = rack.nodes.iter().map(|n| n.id.clone()).collect();
            pairs.extend(perfect_matching(&ids, rng).into_iter().map(|(a, b)| Pair::new(a, b)));
        }
        pairs
    }

    fn plan_inter_rack(snapshot: &TopologySnapshot, rng: &mut impl Rng) -> Vec<Pair> {
        let mut pairs = Vec::new();
        for cluster in snapshot.clusters() {
            let racks: Vec<_> = cluster.racks.iter().filter(|r| !r.nodes.is_empty()).collect();
            if racks.len() < 2 {
                continue;
            }
            let rack_indices: Vec<usize> = (0..racks.len()).collect();
            for (ia, ib) in perfect_matching(&rack_indices, rng) {
                let node_a = racks[ia].nodes.choose(rng).expect("non-empty rack");
                let node_b = racks[ib].nodes.choose(rng).expect("non-empty rack");
                pairs.push(Pair::new(node_a.id.clone(), node_b.id.clone()));
            }
        }
        pairs
    }

    fn plan_inter_cluster(snapshot: &TopologySnapshot, rng: &mut impl Rng) -> Vec<Pair> {
        let clusters: Vec<_> = snapshot
            .clusters()
            .iter()
            .filter(|c| c.racks.iter().any(|r| !r.nodes.is_empty()))
            .collect();
        if clusters.len() < 2 {
            return Vec::new();
        }
        let cluster_indices: Vec<usize> = (0..clusters.len()).collect();
        let mut pairs = Vec::new();
        for (ia, ib) in perfect_matching(&cluster_indices, rng) {
            let node_a = clusters[ia]
                .racks
                .iter()
                .flat_map(|r| r.nodes.iter())
                .collect::<Vec<_>>()
                .choose(rng)
                .copied()
                .expect("non-empty cluster");
            let node_b = clusters[ib]
                .racks
                .iter()
                .flat_map(|r| r.nodes.iter())
                .collect::<Vec<_>>()
                .choose(rng)
                .copied()
                .expect("non-empty cluster");
            pairs.push(Pair::new(node_a.id.clone(), node_b.id.clone()));
        }
        pairs
    }

    fn plan_random(snapshot: &TopologySnapshot, rng: &mut impl Rng) -> Vec<Pair> {
        let ids: Vec<String> = snapshot.nodes().iter().map(|n| n.id.clone()).collect();
        if ids.len() < 2 {
            return Vec::new();
        }
        perfect_matching(&ids, rng).into_iter().map(|(a, b)| Pair::new(a, b)).collect()
    }

    /// Whether the two-pass policy should run given the first pass'
    /// classification (`spec.md` §4.E): two-pass enabled, suspects
    /// non-empty, and at least one known-good partner exists.
    #[must_use]
    pub fn needs_second_pass(enabled: bool, passed: &[String], suspect: &[String]) -> bool {
        enabled && !suspect.is_empty() && !passed.is_empty()
    }

    /// Pairs each suspect with a partner drawn from `passed` that shares
    /// its topology bucket (same rack for intra-rack, same cluster for
    /// inter-rack, any for inter-cluster/random). Partners are reused
    /// cyclically from a per-bucket shuffled order so every eligible
    /// passer is used at least once before any is reused (invariant #12).
    /// Suspects whose bucket has no eligible passed partner are skipped.
    #[must_use]
    pub fn plan_second_pass(
        snapshot: &TopologySnapshot,
        mode: PairingMode,
        passed: &[String],
        suspect: &[String],
        rng: &mut impl Rng,
    ) -> Vec<Pair> {
        let bucket_of = |node_id: &str| -> String {
            match mode {
                PairingMode::IntraRack => snapshot.rack_of(node_id).unwrap_or("unknown").to_owned(),
                PairingMode::InterRack => snapshot.cluster_of(node_id).unwrap_or("unknown").to_owned(),
                PairingMode::InterCluster | PairingMode::Random => "*".to_owned(),
            }
        };

        let mut passed_by_bucket: HashMap<String, Vec<String>> = HashMap::new();
        for node_id in passed {
            passed_by_bucket.entry(bucket_of(node_id)).or_default().push(node_id.clone());
        }
        for candidates in passed_by_bucket.values_mut() {
            candidates.shuffle(rng);
        }

        let mut cursor: HashMap<String, usize> = HashMap::new();
        let mut pairs = Vec::new();

        for suspect_id in suspect {
            let bucket = bucket_of(suspect_id);
            let Some(candidates) = passed_by_bucket.get(&bucket) else {
                tracing::debug!(node = %suspect_id, %bucket, "no second-pass partner available in bucket");
                continue;
            };
            if candidates.is_empty() {
                continue;
            }
            let idx = cursor.entry(bucket).or_insert(0);
            let partner = candidates[*idx % candidates.len()].clone();
            *idx += 1;
            pairs.push(Pair::new(suspect_id.clone(), partner));
        }

        pairs
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use rand::{SeedableRng, rngs::StdRng};

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

    fn snapshot_of(ids: &[&str]) -> TopologySnapshot {
        TopologySnapshot::build(ids.iter().map(|id| record(id)).collect(), &TopologyFilters::default())
    }

    #[test]
    fn never_pairs_a_node_with_itself() {
        let snapshot = snapshot_of(&["n0", "n1", "n2", "n3", "n4"]);
        let mut rng = StdRng::seed_from_u64(7);
        for pair in PairPlanner::plan(&snapshot, PairingMode::Random, &mut rng) {
            assert_ne!(pair.a, pair.b);
        }
    }

    #[test]
    fn single_node_rack_yields_no_pairs() {
        let snapshot = snapshot_of(&["n0"]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(PairPlanner::plan(&snapshot, PairingMode::IntraRack, &mut rng).is_empty());
    }

    #[test]
    fn odd_node_out_gets_paired() {
        let snapshot = snapshot_of(&["n0", "n1", "n2"]);
        let mut rng = StdRng::seed_from_u64(3);
        let pairs = PairPlanner::plan(&snapshot, PairingMode::IntraRack, &mut rng);
        let touched: HashSet<&str> =
            pairs.iter().flat_map(|p| [p.a.as_str(), p.b.as_str()]).collect();
        assert_eq!(touched.len(), 3);
    }

    #[test]
    fn second_pass_reuses_passers_cyclically_within_bound() {
        let snapshot = snapshot_of(&["n0", "n1", "n2", "n3", "n4"]);
        let passed = vec!["n0".to_owned()];
        let suspect = vec!["n1".to_owned(), "n2".to_owned(), "n3".to_owned()];
        let mut rng = StdRng::seed_from_u64(9);
        let pairs = PairPlanner::plan_second_pass(&snapshot, PairingMode::Random, &passed, &suspect, &mut rng);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|p| p.b == "n0"));
    }

    #[test]
    fn second_pass_respects_rack_locality() {
        let mut labels_a = BTreeMap::new();
        labels_a.insert("topology.kubernetes.io/zone".to_owned(), "c0".to_owned());
        labels_a.insert("topology.kubernetes.io/rack".to_owned(), "r0".to_owned());
        let mut labels_b = labels_a.clone();
        labels_b.insert("topology.kubernetes.io/rack".to_owned(), "r1".to_owned());

        let records = vec![
            NodeRecord { labels: labels_a.clone(), ..record("good-r0") },
            NodeRecord { labels: labels_a, ..record("bad-r0") },
            NodeRecord { labels: labels_b, ..record("bad-r1") },
        ];
        let snapshot = TopologySnapshot::build(records, &TopologyFilters::default());

        let passed = vec!["good-r0".to_owned()];
        let suspect = vec!["bad-r0".to_owned(), "bad-r1".to_owned()];
        let mut rng = StdRng::seed_from_u64(2);
        let pairs =
            PairPlanner::plan_second_pass(&snapshot, PairingMode::IntraRack, &passed, &suspect, &mut rng);

        // bad-r1 has no same-rack passed partner, so only bad-r0 gets paired.
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].a, "bad-r0");
        assert_eq!(pairs[0].b, "good-r0");
    }
}
