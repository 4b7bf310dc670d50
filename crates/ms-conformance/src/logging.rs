use std::collections::BTreeMap;

use ms_core::ExecutionMode;
use serde::Serialize;
use serde_json::Value;

pub const STRUCTURED_LOG_SCHEMA_VERSION: &str = "ms-conformance-log-v1";

/// One JSON line per executed conformance case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredCaseLog {
    pub schema_version: &'static str,
    pub ts_unix_ms: u128,
    pub suite_id: &'static str,
    pub scenario_id: String,
    pub fixture_id: &'static str,
    pub packet_id: &'static str,
    pub case_name: String,
    pub mode: &'static str,
    pub seed: u64,
    pub artifact_refs: Vec<String>,
    pub replay_command: String,
    pub outcome: &'static str,
    pub reason_code: String,
    #[serde(flatten)]
    pub extra_fields: BTreeMap<String, Value>,
}

impl StructuredCaseLog {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        suite_id: &'static str,
        fixture_id: &'static str,
        packet_id: &'static str,
        case_name: &str,
        mode: ExecutionMode,
        artifact_refs: Vec<String>,
        replay_command: String,
        outcome: &'static str,
        reason_code: impl Into<String>,
    ) -> Self {
        let scenario_id = format!(
            "{suite_id}/{}:{}",
            mode_label(mode),
            canonical_case_name(case_name)
        );
        let seed = deterministic_seed(&scenario_id);
        Self {
            schema_version: STRUCTURED_LOG_SCHEMA_VERSION,
            ts_unix_ms: now_unix_ms(),
            suite_id,
            scenario_id,
            fixture_id,
            packet_id,
            case_name: case_name.to_string(),
            mode: mode_label(mode),
            seed,
            artifact_refs,
            replay_command,
            outcome,
            reason_code: reason_code.into(),
            extra_fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_extra_fields(mut self, extra_fields: BTreeMap<String, Value>) -> Self {
        self.extra_fields.extend(extra_fields);
        self
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == "pass"
    }

    pub fn to_json_line(&self) -> Result<String, String> {
        serde_json::to_string(self)
            .map_err(|error| format!("failed to serialize case log {}: {error}", self.scenario_id))
    }
}

#[must_use]
pub fn mode_label(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Strict => "strict",
        ExecutionMode::Hardened => "hardened",
    }
}

fn canonical_case_name(case_name: &str) -> String {
    case_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// FNV-1a over the scenario id.
fn deterministic_seed(scenario_id: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for byte in scenario_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn now_unix_ms() -> u128 {
    let now = std::time::SystemTime::now();
    now.duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ms_core::ExecutionMode;
    use serde_json::{Value, json};

    use super::{StructuredCaseLog, mode_label};

    fn sample(mode: ExecutionMode) -> StructuredCaseLog {
        StructuredCaseLog::new(
            "algebra",
            "algebra_cases.json",
            "MS-ALG-001",
            "Add Scalar One",
            mode,
            vec!["crates/ms-conformance/fixtures/algebra_cases.json".to_string()],
            "cargo test -p ms-conformance".to_string(),
            "pass",
            "algebra_expectation_match",
        )
    }

    #[test]
    fn scenario_id_is_canonical_and_seed_is_stable() {
        let strict = sample(ExecutionMode::Strict);
        assert_eq!(strict.scenario_id, "algebra/strict:add_scalar_one");
        assert_eq!(strict.seed, sample(ExecutionMode::Strict).seed);
        assert_ne!(strict.seed, sample(ExecutionMode::Hardened).seed);
        assert_eq!(mode_label(ExecutionMode::Hardened), "hardened");
    }

    #[test]
    fn extra_fields_flatten_into_json_line() {
        let log = sample(ExecutionMode::Strict)
            .with_extra_fields(BTreeMap::from([("op".to_string(), json!("add"))]));
        let line = log.to_json_line().expect("log should serialize");
        let value: Value = serde_json::from_str(&line).expect("line should parse");

        assert_eq!(value["op"], json!("add"));
        assert_eq!(value["suite_id"], json!("algebra"));
        assert_eq!(value["mode"], json!("strict"));
        assert!(value.get("extra_fields").is_none());
        assert!(log.passed());
    }
}
