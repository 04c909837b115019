//! `CheckKind` sum type plus a single `CheckRunner` capability set
//! (`plan` overrides, `interpretLabels`/`resultKey`) standing in for the
//! class hierarchy across health-check variants the distillation was
//! ported from (`spec.md` §9 Design Notes, "Dynamic dispatch over check
//! types").

use std::collections::BTreeMap;

use health_runner_core::labels::CheckName;

/// The five health-check workload families (`spec.md` glossary).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckKind {
    Nccl,
    Dcgm,
    NetworkThroughput,
    Straggler,
    FrameworkSmoke,
}

impl CheckKind {
    #[must_use]
    pub const fn check_name(self) -> &'static str {
        match self {
            Self::Nccl => "nccl",
            Self::Dcgm => "dcgm",
            Self::NetworkThroughput => "neper",
            Self::Straggler => "straggler",
            Self::FrameworkSmoke => "framework-smoke",
        }
    }

    #[must_use]
    pub fn name(self) -> CheckName {
        CheckName::new(self.check_name())
    }

    /// Whether this family's unit of work is a pair of nodes (§4.B/E) as
    /// opposed to a whole topology level (§4.G).
    #[must_use]
    pub const fn is_pair_test(self) -> bool {
        matches!(self, Self::Nccl | Self::NetworkThroughput)
    }

}

/// Parameters the NCCL pair test sweeps over (`spec.md` §4.B).
#[derive(Clone, Debug, PartialEq)]
pub struct NcclSweepConfig {
    pub benchmark: String,
    pub start_message_size: String,
    pub end_message_size: String,
    pub iterations: u32,
    pub bandwidth_threshold: f64,
}

impl Default for NcclSweepConfig {
    fn default() -> Self {
        Self {
            benchmark: "all_gather_perf".to_owned(),
            start_message_size: "4MiB".to_owned(),
            end_message_size: "8GiB".to_owned(),
            iterations: 20,
            bandwidth_threshold: 80.0,
        }
    }
}

/// Builds the well-known override set for one pair-test invocation
/// (`spec.md` §4.B override table).
#[must_use]
pub fn pair_overrides(
    node_a: &str,
    node_b: &str,
    sweep: &NcclSweepConfig,
    second_pass: bool,
    short_guid: &str,
) -> BTreeMap<String, String> {
    let mut overrides = BTreeMap::new();
    overrides.insert("NODE0".to_owned(), node_a.to_owned());
    overrides.insert("NODE1".to_owned(), node_b.to_owned());
    overrides.insert("BENCHMARK".to_owned(), sweep.benchmark.clone());
    overrides.insert("START_MESSAGE_SIZE".to_owned(), sweep.start_message_size.clone());
    overrides.insert("END_MESSAGE_SIZE".to_owned(), sweep.end_message_size.clone());
    overrides.insert("ITERATIONS".to_owned(), sweep.iterations.to_string());
    overrides.insert("BANDWIDTH_THRESHOLD".to_owned(), sweep.bandwidth_threshold.to_string());
    overrides.insert("SECOND_PASS".to_owned(), second_pass.to_string());
    overrides.insert("SHORT_GUID".to_owned(), short_guid.to_owned());
    overrides
}

/// Builds the well-known override set for one topology-level invocation
/// (`spec.md` §4.B/§4.G).
#[must_use]
pub fn level_overrides(
    topology_key: &str,
    topology_value: &str,
    nhosts: usize,
    benchmark: &str,
    short_guid: &str,
) -> BTreeMap<String, String> {
    let mut overrides = BTreeMap::new();
    overrides.insert("TOPOLOGY_KEY".to_owned(), topology_key.to_owned());
    overrides.insert("TOPOLOGY_VALUE".to_owned(), topology_value.to_owned());
    overrides.insert("NHOSTS".to_owned(), nhosts.to_string());
    overrides.insert("BENCHMARK".to_owned(), benchmark.to_owned());
    overrides.insert("SHORT_GUID".to_owned(), short_guid.to_owned());
    overrides
}
