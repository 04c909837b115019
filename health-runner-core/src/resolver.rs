//! Verdict Resolver (`spec.md` §4.F): turns the pre-result labels a
//! workload wrote into final verdicts, aggregates NCCL bandwidth samples,
//! and merges first- and second-pass verdicts under the monotonicity
//! rule.

use std::collections::{HashMap, HashSet};

use crate::verdict::{NodeMeasurement, PreResult, SizeMeasurement, Verdict, aggregate_bandwidth};

/// Everything read back from one node's labels for a single pass.
#[derive(Clone, Debug, Default)]
pub struct NodeLabelSnapshot {
    pub pre_result: Option<String>,
    /// One entry per test iteration; `None` means that iteration returned
    /// no parseable bandwidth line.
    pub bandwidth_iterations: Vec<Option<f64>>,
    pub benchmark: Option<String>,
    pub size_measurements: Vec<SizeMeasurement>,
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedPass {
    pub verdicts: HashMap<String, Verdict>,
    pub measurements: HashMap<String, NodeMeasurement>,
}

impl ResolvedPass {
    #[must_use]
    pub fn passed(&self) -> Vec<String> {
        self.verdicts
            .iter()
            .filter(|(_, v)| **v == Verdict::Pass)
            .map(|(id, _)| id.clone())
            .collect()
    }

    #[must_use]
    pub fn suspect(&self) -> Vec<String> {
        self.verdicts
            .iter()
            .filter(|(_, v)| **v != Verdict::Pass)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

pub struct VerdictResolver {
    bandwidth_threshold: f64,
}

impl VerdictResolver {
    #[must_use]
    pub const fn new(bandwidth_threshold: f64) -> Self {
        Self { bandwidth_threshold }
    }

    /// Classifies every (deduplicated) tested node by reading its fresh
    /// labels. Empty `tested` yields empty verdicts (`spec.md` §4.F edge
    /// case).
    #[must_use]
    pub fn resolve(&self, tested: &[String], labels: &HashMap<String, NodeLabelSnapshot>) -> ResolvedPass {
        let mut seen = HashSet::new();
        let mut resolved = ResolvedPass::default();

        for node_id in tested {
            if !seen.insert(node_id.clone()) {
                continue;
            }

            let snapshot = labels.get(node_id);
            let pre_result = snapshot.and_then(|s| PreResult::parse(s.pre_result.as_deref()));

            let verdict = match pre_result {
                None => Verdict::Timeout,
                Some(PreResult::Crash) => Verdict::Crash,
                Some(PreResult::Fail) => Verdict::Fail,
                Some(PreResult::Pass) => Verdict::Pass,
            };

            resolved.verdicts.insert(node_id.clone(), verdict);

            if let Some(snapshot) = snapshot {
                resolved.measurements.insert(node_id.clone(), self.measurement_of(snapshot));
            }
        }

        resolved
    }

    fn measurement_of(&self, snapshot: &NodeLabelSnapshot) -> NodeMeasurement {
        let avg_bandwidth_gbps = if snapshot.bandwidth_iterations.is_empty() {
            None
        } else {
            let (avg, _) = aggregate_bandwidth(&snapshot.bandwidth_iterations, self.bandwidth_threshold);
            Some(avg)
        };

        NodeMeasurement {
            avg_bandwidth_gbps,
            benchmark: snapshot.benchmark.clone(),
            by_size: snapshot
                .size_measurements
                .iter()
                .map(|m| (m.message_size.clone(), m.clone()))
                .collect(),
        }
    }

    /// Merges a first-pass result with a second-pass result under the
    /// monotonicity rule (`spec.md` §4.F item 4): a node is `Pass` iff it
    /// passed in either pass; otherwise it inherits the second-pass
    /// classification, falling back to the first-pass classification if
    /// it was not re-tested.
    #[must_use]
    pub fn merge(first: ResolvedPass, second: ResolvedPass) -> ResolvedPass {
        let mut merged = ResolvedPass::default();

        for (node_id, first_verdict) in &first.verdicts {
            let second_verdict = second.verdicts.get(node_id).copied();
            merged.verdicts.insert(node_id.clone(), Verdict::merge_monotone(*first_verdict, second_verdict));

            let measurement = second
                .measurements
                .get(node_id)
                .or_else(|| first.measurements.get(node_id))
                .cloned();
            if let Some(measurement) = measurement {
                merged.measurements.insert(node_id.clone(), measurement);
            }
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pre_result: &str) -> NodeLabelSnapshot {
        NodeLabelSnapshot {
            pre_result: Some(pre_result.to_owned()),
            bandwidth_iterations: Vec::new(),
            benchmark: None,
            size_measurements: Vec::new(),
        }
    }

    #[test]
    fn absent_pre_result_is_timeout() {
        let resolver = VerdictResolver::new(80.0);
        let resolved = resolver.resolve(&["n0".to_owned()], &HashMap::new());
        assert_eq!(resolved.verdicts["n0"], Verdict::Timeout);
    }

    #[test]
    fn deduplicates_tested_nodes() {
        let resolver = VerdictResolver::new(80.0);
        let mut map = HashMap::new();
        map.insert("n0".to_owned(), labels("pass"));
        let resolved =
            resolver.resolve(&["n0".to_owned(), "n0".to_owned()], &map);
        assert_eq!(resolved.verdicts.len(), 1);
    }

    #[test]
    fn crash_is_distinct_from_fail() {
        let resolver = VerdictResolver::new(80.0);
        let mut map = HashMap::new();
        map.insert("n0".to_owned(), labels("crash"));
        map.insert("n1".to_owned(), labels("fail"));
        let resolved = resolver.resolve(&["n0".to_owned(), "n1".to_owned()], &map);
        assert_eq!(resolved.verdicts["n0"], Verdict::Crash);
        assert_eq!(resolved.verdicts["n1"], Verdict::Fail);
    }

    #[test]
    fn second_pass_rescues_a_suspect() {
        let resolver = VerdictResolver::new(80.0);

        let mut first_labels = HashMap::new();
        first_labels.insert("n0".to_owned(), labels("fail"));
        let first = resolver.resolve(&["n0".to_owned()], &first_labels);

        let mut second_labels = HashMap::new();
        second_labels.insert("n0".to_owned(), labels("pass"));
        let second = resolver.resolve(&["n0".to_owned()], &second_labels);

        let merged = VerdictResolver::merge(first, second);
        assert_eq!(merged.verdicts["n0"], Verdict::Pass);
    }

    #[test]
    fn first_pass_pass_is_never_downgraded() {
        let resolver = VerdictResolver::new(80.0);

        let mut first_labels = HashMap::new();
        first_labels.insert("n0".to_owned(), labels("pass"));
        let first = resolver.resolve(&["n0".to_owned()], &first_labels);

        // n0 was not re-tested in the second pass.
        let second = ResolvedPass::default();

        let merged = VerdictResolver::merge(first, second);
        assert_eq!(merged.verdicts["n0"], Verdict::Pass);
    }

    #[test]
    fn pass_pre_result_is_never_recomputed_from_bandwidth() {
        let resolver = VerdictResolver::new(80.0);
        let mut map = HashMap::new();
        map.insert(
            "n0".to_owned(),
            NodeLabelSnapshot {
                pre_result: Some("pass".to_owned()),
                bandwidth_iterations: vec![None, None, Some(120.0)],
                benchmark: None,
                size_measurements: Vec::new(),
            },
        );
        let resolved = resolver.resolve(&["n0".to_owned()], &map);
        assert_eq!(resolved.verdicts["n0"], Verdict::Pass);
        assert_eq!(resolved.measurements["n0"].avg_bandwidth_gbps, Some(-1.0));
    }
}
