//! Results Model (`spec.md` §4.I): the typed aggregate report uploaded at
//! the end of a run.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng as _;
use serde::{Deserialize, Serialize};

use crate::verdict::{NodeMeasurement, Verdict};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityKind {
    Node,
    Rack,
    Block,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthResultEntry {
    pub id: String,
    pub status: Verdict,
    pub measurements: Vec<NodeMeasurement>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthResult {
    pub name: String,
    pub kind: EntityKind,
    pub entries: Vec<HealthResultEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub created_at: u64,
    pub health_results: Vec<HealthResult>,
}

impl Report {
    #[must_use]
    pub fn new(health_results: Vec<HealthResult>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self { created_at, health_results }
    }
}

/// Deterministic key derived from an externally supplied workflow id, with
/// a random 8-character fallback (`spec.md` §4.I).
#[must_use]
pub fn results_object_key(workflow_id: Option<&str>) -> String {
    let suffix = workflow_id.map(str::to_owned).unwrap_or_else(random_suffix);
    format!("health_results_{suffix}.json")
}

fn random_suffix() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8).map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let report = Report::new(vec![HealthResult {
            name: "nccl".to_owned(),
            kind: EntityKind::Node,
            entries: vec![HealthResultEntry {
                id: "n0".to_owned(),
                status: Verdict::Pass,
                measurements: vec![],
            }],
        }]);

        let json = serde_json::to_string(&report).expect("serialize");
        let back: Report = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(report, back);
    }

    #[test]
    fn uses_workflow_id_when_present() {
        assert_eq!(results_object_key(Some("wf-42")), "health_results_wf-42.json");
    }

    #[test]
    fn falls_back_to_random_suffix() {
        let key = results_object_key(None);
        assert!(key.starts_with("health_results_"));
        assert!(key.ends_with(".json"));
        assert_eq!(key.len(), "health_results_".len() + 8 + ".json".len());
    }
}
