//! Node verdicts and the raw per-message-size measurements a workload
//! reports alongside them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Final or intermediate classification of a tested node.
///
/// `Crash` is kept distinct from `Fail` (see `SPEC_FULL.md` §9): a crash
/// means the workload's infrastructure failed to execute at all, while a
/// fail means it ran and produced a negative result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Crash,
    Timeout,
    Skip,
}

impl Verdict {
    #[must_use]
    pub const fn as_label_value(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Crash => "crash",
            Self::Timeout => "timeout",
            Self::Skip => "skip",
        }
    }

    /// Merge a first-pass verdict with a second-pass verdict under the
    /// monotonicity rule (`spec.md` §4.F / invariant #2): a node that
    /// passed the first pass can never be downgraded.
    #[must_use]
    pub fn merge_monotone(first: Self, second: Option<Self>) -> Self {
        if first == Self::Pass {
            return Self::Pass;
        }
        second.unwrap_or(first)
    }
}

/// The raw verdict a workload writes to its own node label, before the
/// resolver turns it into a final `Verdict`. Absent means the workload
/// never wrote one, which the resolver reads as a timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreResult {
    Pass,
    Fail,
    Crash,
}

impl PreResult {
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw {
            Some("pass") => Some(Self::Pass),
            Some("fail") => Some(Self::Fail),
            Some("crash") => Some(Self::Crash),
            _ => None,
        }
    }

    #[must_use]
    pub const fn into_verdict(self) -> Verdict {
        match self {
            Self::Pass => Verdict::Pass,
            Self::Fail => Verdict::Fail,
            Self::Crash => Verdict::Crash,
        }
    }
}

/// Sentinel bandwidth reported when more than half of a node's test
/// iterations failed to produce a parseable bandwidth line.
pub const FAILED_BANDWIDTH_SENTINEL: f64 = -1.0;

/// Bandwidth/latency readings for one message size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SizeMeasurement {
    pub message_size: String,
    pub bandwidth_gbps: Option<f64>,
    pub latency_ms: Option<f64>,
}

/// Everything an NCCL-style pair test reports about one node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeasurement {
    pub avg_bandwidth_gbps: Option<f64>,
    pub benchmark: Option<String>,
    pub by_size: BTreeMap<String, SizeMeasurement>,
}

/// Average bandwidth across successful iterations only, per `spec.md`
/// §4.F. A test iteration is successful iff it returned any parseable
/// bandwidth line; if more than half the iterations failed the aggregate
/// is the sentinel `-1` and the node fails regardless of the threshold.
#[must_use]
pub fn aggregate_bandwidth(iterations: &[Option<f64>], threshold: f64) -> (f64, bool) {
    if iterations.is_empty() {
        return (FAILED_BANDWIDTH_SENTINEL, false);
    }

    let successful: Vec<f64> = iterations.iter().filter_map(|v| *v).collect();
    let failure_rate = 1.0 - (successful.len() as f64 / iterations.len() as f64);

    if failure_rate > 0.5 {
        return (FAILED_BANDWIDTH_SENTINEL, false);
    }

    let avg = successful.iter().sum::<f64>() / successful.len() as f64;
    (avg, avg >= threshold)
}
