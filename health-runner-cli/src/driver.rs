//! Health Runner Driver (`spec.md` §4.H): loads config, builds the
//! topology snapshot, plans invocations, drives them to completion under
//! nested deadlines, resolves verdicts, and uploads the report.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use health_runner_checks::{CheckKind, NcclSweepConfig, level_overrides, pair_overrides};
use health_runner_config::Config;
use health_runner_core::{
    labels::{CheckName, LabelSchema, taint_for_verdict},
    performance::{PerformanceRunner, SweepElement, TopologyLevel},
    planner::{Pair, PairPlanner, PairingMode},
    resolver::{NodeLabelSnapshot, ResolvedPass, VerdictResolver},
    results::{EntityKind, HealthResult, HealthResultEntry, Report, results_object_key},
    topology::{NodeRecord, TopologyFilters, TopologySnapshot},
    traits::{Annotator, CleanupGuard, LaunchSpec, Launcher, Sink, Watcher},
    verdict::{SizeMeasurement, Verdict},
};
use health_runner_k8s::CleanupList;
use rand::SeedableRng as _;
use rand::rngs::StdRng;
use tracing::{info, warn};
use uuid::Uuid;

/// Machine-readable outcome of one run, so a binary wrapper can derive a
/// process exit code without re-parsing logs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tested: usize,
    pub passed: usize,
    pub failed: usize,
    pub crashed: usize,
    pub timed_out: usize,
    pub second_pass_ran: bool,
}

pub struct Driver<L, W, A, S> {
    launcher: L,
    watcher: W,
    annotator: A,
    sink: S,
    config: Config,
    check: CheckKind,
    sweep: NcclSweepConfig,
}

impl<L, W, A, S> Driver<L, W, A, S>
where
    L: Launcher,
    W: Watcher,
    A: Annotator,
    S: Sink,
{
    #[must_use]
    pub const fn new(launcher: L, watcher: W, annotator: A, sink: S, config: Config, check: CheckKind, sweep: NcclSweepConfig) -> Self {
        Self { launcher, watcher, annotator, sink, config, check, sweep }
    }

    fn check_name(&self) -> CheckName {
        self.check.name()
    }

    fn filters(&self) -> TopologyFilters {
        let check_name = self.check_name();
        TopologyFilters {
            require_gpu: true,
            require_ready: true,
            label: self.config.filter.as_ref().map(|f| (f.name.clone(), f.value.clone())),
            exclude_taint_prefix: Some(LabelSchema::new(&check_name).taint_key()),
        }
    }

    /// Runs one full pass: plan → launch → watch → resolve. Returns the
    /// resolved pass plus the set of nodes whose launch failed outright
    /// (recorded as `CRASH` without consuming a watch slot, `spec.md`
    /// §4.B).
    async fn run_pass(&self, specs: Vec<(LaunchSpec, Vec<String>)>, per_pass_deadline: Duration) -> (ResolvedPass, BTreeSet<String>) {
        let launched = join_all(specs.iter().map(|(spec, _)| self.launcher.launch(spec))).await;

        // Every guard a launch returns is pushed here; `CleanupList::drop`
        // releases whatever is left on every exit path, including one
        // forced by the enclosing global-deadline `timeout` dropping this
        // future before `drain` below ever runs.
        let mut cleanups = CleanupList::new();
        let mut handles = Vec::new();
        let mut tested = Vec::new();
        let mut crashed = BTreeSet::new();

        for ((_, node_ids), outcome) in specs.iter().zip(launched) {
            match outcome {
                Ok((handle, guard)) => {
                    tested.extend(node_ids.iter().cloned());
                    cleanups.push(guard);
                    handles.push((handle, node_ids.clone()));
                }
                Err(err) => {
                    warn!(error = ?err, nodes = ?node_ids, "launch failed; recording as crash");
                    crashed.extend(node_ids.iter().cloned());
                }
            }
        }

        let statuses = join_all(handles.iter().map(|(handle, _)| self.watcher.wait_until_terminal(handle, per_pass_deadline))).await;

        for ((handle, _node_ids), status) in handles.iter().zip(&statuses) {
            if let Err(err) = status {
                warn!(job = %handle.name, error = ?err, "job did not reach a terminal state");
            }
        }

        let raw_labels = self.collect_labels(&tested).await;
        let resolver = VerdictResolver::new(self.sweep.bandwidth_threshold);
        let resolved = resolver.resolve(&tested, &raw_labels);

        cleanups.drain();

        (resolved, crashed)
    }

    async fn collect_labels(&self, node_ids: &[String]) -> HashMap<String, NodeLabelSnapshot> {
        let check_name = self.check_name();
        let schema = LabelSchema::new(&check_name);
        let fetched = join_all(node_ids.iter().map(|id| self.annotator.read_labels(id))).await;

        let mut out = HashMap::new();
        for (node_id, labels) in node_ids.iter().zip(fetched) {
            let Ok(labels) = labels else {
                continue;
            };
            out.insert(node_id.clone(), parse_snapshot(&schema, &labels));
        }
        out
    }

    async fn write_back(&self, verdicts: &HashMap<String, Verdict>) {
        let check_name = self.check_name();
        let schema = LabelSchema::new(&check_name);
        let runtime_secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();

        for (node_id, verdict) in verdicts {
            let mut labels = BTreeMap::new();
            labels.insert(schema.result_label(), verdict.as_label_value().to_owned());
            labels.insert(schema.runtime_label(), runtime_secs.to_string());
            if let Err(err) = self.annotator.set_labels(node_id, &labels).await {
                warn!(%node_id, error = ?err, "failed to write final result label");
            }

            if let Some((value, effect)) = taint_for_verdict(*verdict) {
                if let Err(err) = self.annotator.taint(node_id, &schema.taint_key(), value, effect).await {
                    warn!(%node_id, error = ?err, "failed to write taint");
                }
            }
        }
    }

    fn build_pair_specs(&self, pairs: &[Pair], second_pass: bool) -> Vec<(LaunchSpec, Vec<String>)> {
        pairs
            .iter()
            .map(|pair| {
                let short_guid = Uuid::new_v4().simple().to_string()[..8].to_owned();
                let env = pair_overrides(&pair.a, &pair.b, &self.sweep, second_pass, &short_guid);
                let spec = LaunchSpec {
                    name: format!("{}-pair-{short_guid}", self.check_name()),
                    node_ids: vec![pair.a.clone(), pair.b.clone()],
                    env,
                };
                (spec, vec![pair.a.clone(), pair.b.clone()])
            })
            .collect()
    }

    /// Runs the pair-test pipeline for a pair-unit check (`spec.md` §4.E/F):
    /// first pass, conditional second pass, monotonic merge, write-back.
    /// The whole sequence runs under the global deadline (`spec.md` §4.H/§5);
    /// a per-pass timeout only ends that pass, but the global deadline
    /// expiring aborts the run outright, which is why it wraps this method
    /// rather than being folded into `per_pass_deadline`.
    pub async fn run_pair_check(&self, records: Vec<NodeRecord>, pairing_mode: PairingMode) -> anyhow::Result<RunSummary> {
        match tokio::time::timeout(self.config.global_timeout, self.run_pair_check_inner(records, pairing_mode)).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("global deadline elapsed before the pair-test run finished"),
        }
    }

    async fn run_pair_check_inner(&self, records: Vec<NodeRecord>, pairing_mode: PairingMode) -> anyhow::Result<RunSummary> {
        let snapshot = TopologySnapshot::build(records, &self.filters());
        info!(
            clusters = snapshot.clusters().len(),
            nodes = snapshot.nodes().len(),
            check = %self.check_name(),
            pairing_mode = ?pairing_mode,
            "topology snapshot built"
        );

        self.clear_all_labels(&snapshot).await;

        let mut rng = StdRng::from_entropy();
        let pairs = PairPlanner::plan(&snapshot, pairing_mode, &mut rng);
        let specs = self.build_pair_specs(&pairs, false);

        let (first, mut crashed_first) = self.run_pass(specs, self.config.per_pass_deadline).await;

        let passed = first.passed();
        let suspect: Vec<String> = first.suspect().into_iter().chain(crashed_first.iter().cloned()).collect();

        let mut merged = first;
        let mut second_pass_ran = false;

        if PairPlanner::needs_second_pass(self.config.second_pass_enabled, &passed, &suspect) {
            second_pass_ran = true;
            let second_pairs = PairPlanner::plan_second_pass(&snapshot, pairing_mode, &passed, &suspect, &mut rng);
            let second_specs = self.build_pair_specs(&second_pairs, true);
            let (second, crashed_second) = self.run_pass(second_specs, self.config.per_pass_deadline).await;
            crashed_first.extend(crashed_second);
            merged = VerdictResolver::merge(merged, second);
        }

        for node_id in &crashed_first {
            merged.verdicts.entry(node_id.clone()).or_insert(Verdict::Crash);
        }

        self.write_back(&merged.verdicts).await;

        let report = self.build_node_report(&merged);
        self.upload(&report).await;

        Ok(summarize(&merged, second_pass_ran))
    }

    /// Runs the performance runner for a topology-level check (`spec.md`
    /// §4.G): one invocation per (eligible level, sweep element), no
    /// second pass. Wrapped in the global deadline, same as
    /// `run_pair_check`.
    pub async fn run_level_check(&self, records: Vec<NodeRecord>, level: TopologyLevel, sweep: Vec<SweepElement>) -> anyhow::Result<RunSummary> {
        match tokio::time::timeout(self.config.global_timeout, self.run_level_check_inner(records, level, sweep)).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("global deadline elapsed before the level check run finished"),
        }
    }

    async fn run_level_check_inner(
        &self,
        records: Vec<NodeRecord>,
        level: TopologyLevel,
        sweep: Vec<SweepElement>,
    ) -> anyhow::Result<RunSummary> {
        let snapshot = TopologySnapshot::build(records, &self.filters());
        self.clear_all_labels(&snapshot).await;

        let plan = PerformanceRunner::plan(&snapshot, level, &sweep);
        for skipped in &plan.skipped {
            info!(level = %skipped.id, "topology level has at most one node; skipped without launch");
        }

        let mut results = Vec::new();
        for invocation in &plan.invocations {
            let short_guid = Uuid::new_v4().simple().to_string()[..8].to_owned();
            let env = level_overrides(
                topology_key_label(level),
                &invocation.level.id,
                invocation.level.node_ids.len(),
                &invocation.sweep.label,
                &short_guid,
            );
            let spec = LaunchSpec {
                name: format!("{}-{}-{short_guid}", self.check_name(), invocation.level.id),
                node_ids: invocation.level.node_ids.clone(),
                env,
            };

            let (resolved, crashed) = self.run_pass(vec![(spec, invocation.level.node_ids.clone())], self.config.per_pass_deadline).await;
            let verdict = crashed
                .iter()
                .next()
                .map(|_| Verdict::Crash)
                .or_else(|| resolved.verdicts.values().copied().next())
                .unwrap_or(Verdict::Timeout);

            results.push(HealthResultEntry {
                id: invocation.level.id.clone(),
                status: verdict,
                measurements: resolved.measurements.values().cloned().collect(),
            });
        }

        for skipped in &plan.skipped {
            results.push(HealthResultEntry { id: skipped.id.clone(), status: Verdict::Skip, measurements: Vec::new() });
        }

        let invocation_count = plan.invocations.len();
        let report = Report::new(vec![HealthResult { name: self.check_name().to_string(), kind: level.entity_kind(), entries: results }]);
        self.upload(&report).await;

        Ok(RunSummary { tested: invocation_count, ..RunSummary::default() })
    }

    async fn clear_all_labels(&self, snapshot: &TopologySnapshot) {
        let check_name = self.check_name();
        let schema = LabelSchema::new(&check_name);
        let keys = schema.result_keys();
        let _ = join_all(snapshot.nodes().iter().map(|node| self.annotator.clear_labels(&node.id, &keys))).await;
    }

    fn build_node_report(&self, resolved: &ResolvedPass) -> Report {
        let entries = resolved
            .verdicts
            .iter()
            .map(|(id, verdict)| HealthResultEntry {
                id: id.clone(),
                status: *verdict,
                measurements: resolved.measurements.get(id).cloned().into_iter().collect(),
            })
            .collect();

        Report::new(vec![HealthResult { name: self.check_name().to_string(), kind: EntityKind::Node, entries }])
    }

    async fn upload(&self, report: &Report) {
        let key = results_object_key(self.config.workflow_id.as_deref());
        match self.sink.upload(&key, report).await {
            Ok(()) => info!(%key, "report uploaded"),
            // A sink failure does not invalidate the run; node labels
            // remain the authoritative record (`spec.md` §7).
            Err(err) => warn!(%key, error = ?err, "report upload failed"),
        }
    }
}

const fn topology_key_label(level: TopologyLevel) -> &'static str {
    match level {
        TopologyLevel::Rack => "rack",
        TopologyLevel::Block => "block",
    }
}

fn parse_snapshot(schema: &LabelSchema<'_>, raw: &BTreeMap<String, String>) -> NodeLabelSnapshot {
    let pre_result = raw.get(&schema.pre_result_label()).cloned();
    let bandwidth_iterations = match raw.get(&schema.bandwidth_label()).and_then(|v| v.parse::<f64>().ok()) {
        Some(value) => vec![Some(value)],
        None => Vec::new(),
    };

    NodeLabelSnapshot { pre_result, bandwidth_iterations, benchmark: None, size_measurements: parse_size_measurements(raw, schema) }
}

fn parse_size_measurements(raw: &BTreeMap<String, String>, schema: &LabelSchema<'_>) -> Vec<SizeMeasurement> {
    const BW_SUFFIX: &str = "-bandwidth";
    const LAT_SUFFIX: &str = "-latency-ms";
    let prefix = schema.bandwidth_label().trim_end_matches("bandwidth").to_owned();

    let mut by_size: BTreeMap<String, SizeMeasurement> = BTreeMap::new();
    for (key, value) in raw {
        let Some(rest) = key.strip_prefix(&prefix) else { continue };
        if let Some(size) = rest.strip_suffix(BW_SUFFIX) {
            if size.is_empty() {
                continue;
            }
            let entry = by_size
                .entry(size.to_owned())
                .or_insert_with(|| SizeMeasurement { message_size: size.to_owned(), bandwidth_gbps: None, latency_ms: None });
            entry.bandwidth_gbps = value.parse().ok();
        } else if let Some(size) = rest.strip_suffix(LAT_SUFFIX) {
            if size.is_empty() {
                continue;
            }
            let entry = by_size
                .entry(size.to_owned())
                .or_insert_with(|| SizeMeasurement { message_size: size.to_owned(), bandwidth_gbps: None, latency_ms: None });
            entry.latency_ms = value.parse().ok();
        }
    }
    by_size.into_values().collect()
}

fn summarize(resolved: &ResolvedPass, second_pass_ran: bool) -> RunSummary {
    let mut summary = RunSummary { tested: resolved.verdicts.len(), second_pass_ran, ..RunSummary::default() };
    for verdict in resolved.verdicts.values() {
        match verdict {
            Verdict::Pass => summary.passed += 1,
            Verdict::Fail => summary.failed += 1,
            Verdict::Crash => summary.crashed += 1,
            Verdict::Timeout => summary.timed_out += 1,
            Verdict::Skip => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use health_runner_config::RetryPolicy;
    use health_runner_core::job::{JobHandle, JobStatus};
    use health_runner_core::labels::TaintEffect;
    use health_runner_core::traits::{DynError, NoopCleanup};

    use super::*;

    type LabelStore = Arc<Mutex<HashMap<String, BTreeMap<String, String>>>>;

    fn node_record(id: &str) -> NodeRecord {
        NodeRecord {
            id: id.to_owned(),
            host: format!("{id}.local"),
            labels: BTreeMap::new(),
            taints: HashSet::new(),
            ready: true,
            allocatable_gpus: 8,
        }
    }

    fn test_config(second_pass_enabled: bool) -> Config {
        Config {
            check_kind: "nccl".to_owned(),
            sleep_time: Duration::from_secs(60),
            global_timeout: Duration::from_secs(5),
            per_pass_deadline: Duration::from_secs(5),
            check_interval: Duration::from_millis(1),
            pairing_mode: PairingMode::Random,
            second_pass_enabled,
            filter: None,
            gcs_bucket_name: "test-bucket".to_owned(),
            workflow_id: Some("wf-test".to_owned()),
            retry: RetryPolicy::default(),
            observability: Default::default(),
        }
    }

    /// Writes a node's pre-result label the moment its pair/level is
    /// launched, standing in for a real workload reporting its own
    /// outcome. Outcomes differ between first and second pass so tests can
    /// script a rescue.
    struct ScriptedLauncher {
        store: LabelStore,
        first_pass: BTreeMap<String, &'static str>,
        second_pass: BTreeMap<String, &'static str>,
        fail_on_launch: BTreeSet<String>,
    }

    #[async_trait]
    impl Launcher for ScriptedLauncher {
        async fn launch(&self, spec: &LaunchSpec) -> Result<(JobHandle, Box<dyn CleanupGuard>), DynError> {
            if spec.node_ids.iter().any(|id| self.fail_on_launch.contains(id)) {
                return Err("simulated control-plane failure".into());
            }

            let is_second_pass = spec.env.get("SECOND_PASS").map(String::as_str) == Some("true");
            let table = if is_second_pass { &self.second_pass } else { &self.first_pass };
            let check = CheckName::new("nccl");
            let schema = LabelSchema::new(&check);

            let mut guard = self.store.lock().unwrap();
            for node_id in &spec.node_ids {
                if let Some(outcome) = table.get(node_id.as_str()) {
                    guard.entry(node_id.clone()).or_default().insert(schema.pre_result_label(), (*outcome).to_owned());
                }
            }
            drop(guard);
            Ok((JobHandle::new(spec.name.clone(), None), Box::new(NoopCleanup)))
        }
    }

    struct ImmediateWatcher;

    #[async_trait]
    impl Watcher for ImmediateWatcher {
        async fn status(&self, _job: &JobHandle) -> Result<JobStatus, DynError> {
            Ok(JobStatus::Succeeded)
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(1)
        }
    }

    struct FakeAnnotator {
        store: LabelStore,
    }

    #[async_trait]
    impl Annotator for FakeAnnotator {
        async fn set_labels(&self, node_id: &str, labels: &BTreeMap<String, String>) -> Result<(), DynError> {
            self.store.lock().unwrap().entry(node_id.to_owned()).or_default().extend(labels.clone());
            Ok(())
        }

        async fn clear_labels(&self, node_id: &str, keys: &[String]) -> Result<(), DynError> {
            if let Some(existing) = self.store.lock().unwrap().get_mut(node_id) {
                for key in keys {
                    existing.remove(key);
                }
            }
            Ok(())
        }

        async fn taint(&self, _node_id: &str, _key: &str, _value: &str, _effect: TaintEffect) -> Result<(), DynError> {
            Ok(())
        }

        async fn read_labels(&self, node_id: &str) -> Result<BTreeMap<String, String>, DynError> {
            Ok(self.store.lock().unwrap().get(node_id).cloned().unwrap_or_default())
        }
    }

    type SinkStore = Arc<Mutex<Vec<Report>>>;

    #[derive(Clone, Default)]
    struct FakeSink {
        uploaded: SinkStore,
    }

    #[async_trait]
    impl Sink for FakeSink {
        async fn upload(&self, _object_key: &str, report: &Report) -> Result<(), DynError> {
            self.uploaded.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    fn build_driver(
        first_pass: BTreeMap<String, &'static str>,
        second_pass: BTreeMap<String, &'static str>,
        fail_on_launch: BTreeSet<String>,
        second_pass_enabled: bool,
    ) -> (Driver<ScriptedLauncher, ImmediateWatcher, FakeAnnotator, FakeSink>, LabelStore, SinkStore) {
        let store: LabelStore = Arc::new(Mutex::new(HashMap::new()));
        let sink = FakeSink::default();
        let uploaded = sink.uploaded.clone();
        let launcher = ScriptedLauncher { store: store.clone(), first_pass, second_pass, fail_on_launch };
        let annotator = FakeAnnotator { store: store.clone() };
        let driver =
            Driver::new(launcher, ImmediateWatcher, annotator, sink, test_config(second_pass_enabled), CheckKind::Nccl, NcclSweepConfig::default());
        (driver, store, uploaded)
    }

    #[tokio::test]
    async fn all_pairs_pass_and_report_uploads() {
        let mut outcomes = BTreeMap::new();
        for id in ["node-0", "node-1", "node-2", "node-3"] {
            outcomes.insert(id.to_owned(), "pass");
        }
        let (driver, _store, uploaded) = build_driver(outcomes, BTreeMap::new(), BTreeSet::new(), true);

        let records = vec![node_record("node-0"), node_record("node-1"), node_record("node-2"), node_record("node-3")];
        let summary = driver.run_pair_check(records, PairingMode::Random).await.unwrap();

        assert_eq!(summary.tested, 4);
        assert_eq!(summary.passed, 4);
        assert_eq!(summary.failed, 0);
        assert!(!summary.second_pass_ran);
        assert_eq!(uploaded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_pass_rescues_a_suspect_node() {
        let mut first_pass = BTreeMap::new();
        first_pass.insert("node-0".to_owned(), "fail");
        first_pass.insert("node-1".to_owned(), "pass");
        first_pass.insert("node-2".to_owned(), "pass");
        first_pass.insert("node-3".to_owned(), "pass");

        let mut second_pass = BTreeMap::new();
        second_pass.insert("node-0".to_owned(), "pass");
        second_pass.insert("node-1".to_owned(), "pass");
        second_pass.insert("node-2".to_owned(), "pass");
        second_pass.insert("node-3".to_owned(), "pass");

        let (driver, _store, _sink) = build_driver(first_pass, second_pass, BTreeSet::new(), true);
        let records = vec![node_record("node-0"), node_record("node-1"), node_record("node-2"), node_record("node-3")];
        let summary = driver.run_pair_check(records, PairingMode::Random).await.unwrap();

        assert!(summary.second_pass_ran);
        assert_eq!(summary.passed, 4);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn launch_failure_is_recorded_as_crash_without_watching() {
        let mut outcomes = BTreeMap::new();
        for id in ["node-1", "node-2", "node-3"] {
            outcomes.insert(id.to_owned(), "pass");
        }
        let mut fail_on_launch = BTreeSet::new();
        fail_on_launch.insert("node-0".to_owned());

        let (driver, _store, _sink) = build_driver(outcomes, BTreeMap::new(), fail_on_launch, false);
        let records = vec![node_record("node-0"), node_record("node-1"), node_record("node-2"), node_record("node-3")];
        let summary = driver.run_pair_check(records, PairingMode::Random).await.unwrap();

        assert_eq!(summary.crashed, 2);
        assert_eq!(summary.tested, 4);
    }

    #[tokio::test]
    async fn level_check_skips_singleton_levels() {
        let (driver, _store, uploaded) = build_driver(BTreeMap::new(), BTreeMap::new(), BTreeSet::new(), false);
        let mut only_node = node_record("node-0");
        only_node.labels.insert("topology.kubernetes.io/zone".to_owned(), "cluster-a".to_owned());
        only_node.labels.insert("topology.kubernetes.io/rack".to_owned(), "rack-a".to_owned());

        let sweep = vec![SweepElement { label: "default".to_owned() }];
        let summary = driver.run_level_check(vec![only_node], TopologyLevel::Rack, sweep).await.unwrap();

        assert_eq!(summary.tested, 0);
        assert_eq!(uploaded.lock().unwrap().len(), 1);
    }
}
