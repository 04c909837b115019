//! Health Runner binary entrypoint: wires the real Kubernetes/GCS adapters
//! into the [`driver::Driver`] and runs one pass of the configured
//! health-check family.

mod driver;

use std::process;

use anyhow::{Context as _, Result};
use health_runner_checks::{CheckKind, NcclSweepConfig};
use health_runner_config::Config;
use health_runner_core::performance::{SweepElement, TopologyLevel};
use health_runner_k8s::{JobTemplate, KubeAnnotator, KubeLauncher, KubeWatcher, ObjectStoreSink, list_nodes};
use kube::Client;
use tracing::{info, warn};

use driver::Driver;

const DEFAULT_WORKLOAD_IMAGE: &str = "gcr.io/gpu-fleet-health/nccl-healthcheck:latest";
const DEFAULT_NAMESPACE: &str = "default";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(err) = run().await {
        warn!("health runner failed: {err:#}");
        process::exit(1);
    }
}

fn parse_check_kind(raw: &str) -> Result<CheckKind> {
    match raw {
        "nccl" => Ok(CheckKind::Nccl),
        "dcgm" => Ok(CheckKind::Dcgm),
        "network_throughput" | "neper" => Ok(CheckKind::NetworkThroughput),
        "straggler" => Ok(CheckKind::Straggler),
        "framework_smoke" => Ok(CheckKind::FrameworkSmoke),
        other => anyhow::bail!("unknown CHECK_KIND {other:?}"),
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    let check = parse_check_kind(&config.check_kind)?;
    let namespace = health_runner_env::var("RUNNER_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_owned());
    let workload_image = health_runner_env::var("WORKLOAD_IMAGE").unwrap_or_else(|| DEFAULT_WORKLOAD_IMAGE.to_owned());

    info!(check = check.check_name(), pairing_mode = ?config.pairing_mode, %namespace, "starting health runner");

    let client = Client::try_default().await.context("connecting to the Kubernetes control plane")?;

    let records = list_nodes(client.clone()).await.context("listing nodes")?;
    info!(nodes = records.len(), "fetched node inventory");

    let launcher = KubeLauncher::new(
        client.clone(),
        namespace.clone(),
        Box::new(JobTemplate { image: workload_image }),
        config.retry.attempts,
        config.retry.backoff,
    );
    let watcher = KubeWatcher::new(client.clone(), namespace, config.check_interval);
    let annotator = KubeAnnotator::new(client);
    let sink = ObjectStoreSink::gcs(&config.gcs_bucket_name).context("configuring results sink")?;

    let sweep = NcclSweepConfig::default();
    let driver = Driver::new(launcher, watcher, annotator, sink, config.clone(), check, sweep);

    let summary = if check.is_pair_test() {
        driver.run_pair_check(records, config.pairing_mode).await?
    } else {
        let levels = [TopologyLevel::Rack, TopologyLevel::Block];
        let sweep_elements = vec![SweepElement { label: "default".to_owned() }];
        let mut total = driver::RunSummary::default();
        for level in levels {
            let partial = driver.run_level_check(records.clone(), level, sweep_elements.clone()).await?;
            total.tested += partial.tested;
        }
        total
    };

    info!(
        tested = summary.tested,
        passed = summary.passed,
        failed = summary.failed,
        crashed = summary.crashed,
        timed_out = summary.timed_out,
        second_pass_ran = summary.second_pass_ran,
        "health runner finished"
    );

    if summary.failed > 0 || summary.crashed > 0 {
        anyhow::bail!("{} node(s) failed or crashed health checks", summary.failed + summary.crashed);
    }

    Ok(())
}
