//! Single translation layer between the closed enums used everywhere else
//! in the codebase and the stringly-typed label/taint schema the control
//! plane actually stores (`spec.md` §6, Design Notes "string-typed enums").

use crate::verdict::Verdict;

/// A health-check family name, e.g. `nccl`, `dcgm`. Used to build the
/// `aiinfra/<check>-healthcheck-*` label family.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckName(String);

impl CheckName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

const NAMESPACE: &str = "aiinfra";

/// Builds the stable label/taint keys documented in `spec.md` §6.
pub struct LabelSchema<'a> {
    check: &'a CheckName,
}

impl<'a> LabelSchema<'a> {
    #[must_use]
    pub const fn new(check: &'a CheckName) -> Self {
        Self { check }
    }

    #[must_use]
    pub fn launch_filter_label(&self) -> String {
        format!("{NAMESPACE}/{}-healthcheck-test", self.check)
    }

    #[must_use]
    pub fn pre_result_label(&self) -> String {
        format!("{NAMESPACE}/{}-healthcheck-pre-result", self.check)
    }

    #[must_use]
    pub fn result_label(&self) -> String {
        format!("{NAMESPACE}/{}-healthcheck-result", self.check)
    }

    #[must_use]
    pub fn runtime_label(&self) -> String {
        format!("{NAMESPACE}/{}-healthcheck-runtime-sec", self.check)
    }

    #[must_use]
    pub fn taint_key(&self) -> String {
        format!("{NAMESPACE}/{}-healthcheck", self.check)
    }

    #[must_use]
    pub fn bandwidth_label(&self) -> String {
        format!("{NAMESPACE}/nccl-healthcheck-bandwidth")
    }

    #[must_use]
    pub fn size_bandwidth_label(&self, message_size: &str) -> String {
        format!("{NAMESPACE}/nccl-healthcheck-{message_size}-bandwidth")
    }

    #[must_use]
    pub fn size_latency_label(&self, message_size: &str) -> String {
        format!("{NAMESPACE}/nccl-healthcheck-{message_size}-latency-ms")
    }

    /// The fixed set of result-related label keys cleared at the start of
    /// a run (`spec.md` §4.D `clearResultLabels`).
    #[must_use]
    pub fn result_keys(&self) -> Vec<String> {
        vec![
            self.pre_result_label(),
            self.result_label(),
            self.runtime_label(),
        ]
    }
}

/// Taint effect, mirrored 1:1 onto the control plane's own enum by the
/// k8s adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaintEffect {
    PreferNoSchedule,
    NoSchedule,
}

impl TaintEffect {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreferNoSchedule => "PreferNoSchedule",
            Self::NoSchedule => "NoSchedule",
        }
    }
}

/// Taint value/effect a node receives once the resolver has a final
/// verdict for it.
#[must_use]
pub fn taint_for_verdict(verdict: Verdict) -> Option<(&'static str, TaintEffect)> {
    match verdict {
        Verdict::Fail | Verdict::Crash => Some(("failed", TaintEffect::NoSchedule)),
        Verdict::Timeout => Some(("suspect", TaintEffect::PreferNoSchedule)),
        Verdict::Pass | Verdict::Skip => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_documented_label_keys() {
        let check = CheckName::new("nccl");
        let schema = LabelSchema::new(&check);
        assert_eq!(schema.pre_result_label(), "aiinfra/nccl-healthcheck-pre-result");
        assert_eq!(schema.result_label(), "aiinfra/nccl-healthcheck-result");
        assert_eq!(schema.taint_key(), "aiinfra/nccl-healthcheck");
        assert_eq!(schema.size_bandwidth_label("4MiB"), "aiinfra/nccl-healthcheck-4MiB-bandwidth");
    }

    #[test]
    fn fail_and_crash_taint_as_failed() {
        assert_eq!(taint_for_verdict(Verdict::Fail), Some(("failed", TaintEffect::NoSchedule)));
        assert_eq!(taint_for_verdict(Verdict::Crash), Some(("failed", TaintEffect::NoSchedule)));
        assert_eq!(taint_for_verdict(Verdict::Pass), None);
    }
}
