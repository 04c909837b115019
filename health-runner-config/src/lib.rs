//! Typed configuration surface (`spec.md` §6 config table): every value the
//! driver needs is captured here once, at startup, and passed explicitly —
//! never read from the environment at an arbitrary call site (Design Notes'
//! "global mutable state" guidance).

use std::time::Duration;

use health_runner_core::planner::PairingMode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("unknown pairing mode {0:?}; expected one of random, intra_rack, inter_rack, inter_cluster")]
    UnknownPairingMode(String),
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: String, #[source] source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile { path: String, #[source] source: serde_yaml::Error },
}

fn parse_pairing_mode(raw: &str) -> Result<PairingMode, ConfigError> {
    match raw {
        "random" => Ok(PairingMode::Random),
        "intra_rack" => Ok(PairingMode::IntraRack),
        "inter_rack" => Ok(PairingMode::InterRack),
        "inter_cluster" => Ok(PairingMode::InterCluster),
        other => Err(ConfigError::UnknownPairingMode(other.to_owned())),
    }
}

/// A node-label filter restricting the topology snapshot to one family of
/// machines (`FILTER_LABEL_NAME`/`FILTER_LABEL_VALUE`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelFilter {
    pub name: String,
    pub value: String,
}

/// Retry policy for workload materialisation (`spec.md` §4.B).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, backoff: Duration::from_secs(2) }
    }
}

/// Observability inputs accepted for parity with the rest of the ambient
/// stack. Metrics export itself is a Non-goal; only the config surface is
/// carried, per "ambient stack regardless of non-goals".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservabilityInputs {
    pub log_filter: Option<String>,
    pub metrics_endpoint: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Which health-check family this invocation runs, e.g. `"nccl"`.
    /// Kept as a raw string rather than an enum: `health-runner-config`
    /// has no dependency on `health-runner-checks`, which owns `CheckKind`
    /// and interprets this value at the process boundary.
    pub check_kind: String,
    pub sleep_time: Duration,
    /// Deadline for an entire multi-pass run (`spec.md` §4.H/§5: "Global
    /// deadline"). Distinct from `per_pass_deadline`; expiry aborts the run
    /// outright rather than letting the driver proceed to a second pass.
    pub global_timeout: Duration,
    /// Deadline for a single `Watcher.wait` pass (`spec.md` §5: "Per-pass
    /// deadline"). Expiry only ends that pass; still-running jobs are
    /// classified `TIMEOUT` and the driver may still start a second pass.
    pub per_pass_deadline: Duration,
    pub check_interval: Duration,
    pub pairing_mode: PairingMode,
    pub second_pass_enabled: bool,
    pub filter: Option<LabelFilter>,
    pub gcs_bucket_name: String,
    pub workflow_id: Option<String>,
    pub retry: RetryPolicy,
    pub observability: ObservabilityInputs,
}

impl Config {
    /// Builds configuration from the process environment, failing fast on
    /// anything missing or malformed (`spec.md` §7: configuration error is
    /// fatal at startup, before any workload is launched).
    pub fn from_env() -> Result<Self, ConfigError> {
        let check_kind = health_runner_env::var("CHECK_KIND").ok_or(ConfigError::MissingVar("CHECK_KIND"))?;
        let sleep_time_minutes =
            health_runner_env::var_u64("SLEEP_TIME_MINUTES").ok_or(ConfigError::MissingVar("SLEEP_TIME_MINUTES"))?;
        let timeout_minutes =
            health_runner_env::var_u64("TIMEOUT_MINUTES").ok_or(ConfigError::MissingVar("TIMEOUT_MINUTES"))?;
        let per_pass_timeout_minutes = health_runner_env::var_u64("PER_PASS_TIMEOUT_MINUTES")
            .ok_or(ConfigError::MissingVar("PER_PASS_TIMEOUT_MINUTES"))?;
        let check_interval_seconds = health_runner_env::var_u64("CHECK_INTERVAL_SECONDS")
            .ok_or(ConfigError::MissingVar("CHECK_INTERVAL_SECONDS"))?;
        let pairing_mode_raw =
            health_runner_env::var("PAIRING_MODE").ok_or(ConfigError::MissingVar("PAIRING_MODE"))?;
        let pairing_mode = parse_pairing_mode(&pairing_mode_raw)?;
        let second_pass_enabled = health_runner_env::var_bool("SECOND_PASS_ENABLED");
        let gcs_bucket_name =
            health_runner_env::var("GCS_BUCKET_NAME").ok_or(ConfigError::MissingVar("GCS_BUCKET_NAME"))?;
        let workflow_id = health_runner_env::var("WORKFLOW_ID");

        let filter = match (health_runner_env::var("FILTER_LABEL_NAME"), health_runner_env::var("FILTER_LABEL_VALUE"))
        {
            (Some(name), Some(value)) => Some(LabelFilter { name, value }),
            _ => None,
        };

        let retry = RetryPolicy {
            attempts: health_runner_env::var_u64("LAUNCH_RETRY_ATTEMPTS").unwrap_or(3) as u32,
            backoff: Duration::from_secs(health_runner_env::var_u64("LAUNCH_RETRY_BACKOFF_SECONDS").unwrap_or(2)),
        };

        let observability = ObservabilityInputs {
            log_filter: health_runner_env::var("RUST_LOG"),
            metrics_endpoint: health_runner_env::var("METRICS_ENDPOINT"),
        };

        Ok(Self {
            check_kind,
            sleep_time: Duration::from_secs(sleep_time_minutes * 60),
            global_timeout: Duration::from_secs(timeout_minutes * 60),
            per_pass_deadline: Duration::from_secs(per_pass_timeout_minutes * 60),
            check_interval: Duration::from_secs(check_interval_seconds),
            pairing_mode,
            second_pass_enabled,
            filter,
            gcs_bucket_name,
            workflow_id,
            retry,
            observability,
        })
    }

    /// Builds configuration from a YAML file, mirroring the teacher's
    /// YAML-capable config layer; used for local runs and tests where
    /// environment variables are inconvenient to set up.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFile { path: path.display().to_string(), source })?;
        let file: RawFileConfig = serde_yaml::from_str(&raw)
            .map_err(|source| ConfigError::ParseFile { path: path.display().to_string(), source })?;
        file.into_config()
    }
}

#[derive(Debug, Deserialize)]
struct RawFileConfig {
    check_kind: String,
    sleep_time_minutes: u64,
    timeout_minutes: u64,
    per_pass_timeout_minutes: u64,
    check_interval_seconds: u64,
    pairing_mode: String,
    #[serde(default)]
    second_pass_enabled: bool,
    filter_label_name: Option<String>,
    filter_label_value: Option<String>,
    gcs_bucket_name: String,
    workflow_id: Option<String>,
    #[serde(default)]
    launch_retry_attempts: Option<u32>,
    #[serde(default)]
    launch_retry_backoff_seconds: Option<u64>,
    #[serde(default)]
    log_filter: Option<String>,
    #[serde(default)]
    metrics_endpoint: Option<String>,
}

impl RawFileConfig {
    fn into_config(self) -> Result<Config, ConfigError> {
        let pairing_mode = parse_pairing_mode(&self.pairing_mode)?;
        let filter = match (self.filter_label_name, self.filter_label_value) {
            (Some(name), Some(value)) => Some(LabelFilter { name, value }),
            _ => None,
        };
        Ok(Config {
            check_kind: self.check_kind,
            sleep_time: Duration::from_secs(self.sleep_time_minutes * 60),
            global_timeout: Duration::from_secs(self.timeout_minutes * 60),
            per_pass_deadline: Duration::from_secs(self.per_pass_timeout_minutes * 60),
            check_interval: Duration::from_secs(self.check_interval_seconds),
            pairing_mode,
            second_pass_enabled: self.second_pass_enabled,
            filter,
            gcs_bucket_name: self.gcs_bucket_name,
            workflow_id: self.workflow_id,
            retry: RetryPolicy {
                attempts: self.launch_retry_attempts.unwrap_or(3),
                backoff: Duration::from_secs(self.launch_retry_backoff_seconds.unwrap_or(2)),
            },
            observability: ObservabilityInputs { log_filter: self.log_filter, metrics_endpoint: self.metrics_endpoint },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn unknown_pairing_mode_is_rejected() {
        let err = parse_pairing_mode("sideways").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPairingMode(_)));
    }

    #[test]
    fn loads_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "check_kind: nccl\n\
             sleep_time_minutes: 5\n\
             timeout_minutes: 45\n\
             per_pass_timeout_minutes: 20\n\
             check_interval_seconds: 15\n\
             pairing_mode: inter_rack\n\
             second_pass_enabled: true\n\
             gcs_bucket_name: my-bucket\n\
             workflow_id: wf-7\n"
        )
        .expect("write");

        let config = Config::from_file(file.path()).expect("parse");
        assert_eq!(config.pairing_mode, PairingMode::InterRack);
        assert!(config.second_pass_enabled);
        assert_eq!(config.gcs_bucket_name, "my-bucket");
        assert_eq!(config.workflow_id.as_deref(), Some("wf-7"));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn missing_file_surfaces_read_error() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/path.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
