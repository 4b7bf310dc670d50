#![forbid(unsafe_code)]

pub mod logging;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ms_algebra::{
    AlgebraError, NamedTensors, Operand, ParamVector, ParameterContainer, Reconstructible,
    ShapeSchema, load_named_tensors,
};
use ms_api::{AlgebraSession, load_mode_for};
use ms_core::{DType, DenseTensor, ExecutionMode};
use ms_runtime::EvidenceEntry;
use serde::Deserialize;
use serde_json::{Value, json};

use logging::{StructuredCaseLog, mode_label};

const MAX_FIXTURE_BYTES: u64 = 1_048_576;
const DEFAULT_TOLERANCE: f64 = 1e-12;
const ALGEBRA_FIXTURE: &str = "algebra_cases.json";

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    pub strict_mode: bool,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            strict_mode: true,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub fixture_count: usize,
    pub strict_mode: bool,
    pub cases_total: usize,
    pub cases_passed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlgebraCaseReport {
    pub name: String,
    pub mode: ExecutionMode,
    pub expectation_ok: bool,
    pub operands_unchanged_ok: bool,
    pub forensic_log: StructuredCaseLog,
}

impl AlgebraCaseReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.expectation_ok && self.operands_unchanged_ok
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlgebraLogSummary {
    pub output_path: PathBuf,
    pub modes: Vec<ExecutionMode>,
    pub log_entries: usize,
    pub failed_entries: usize,
    pub reports: Vec<HarnessReport>,
    pub failures: Vec<AlgebraCaseFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlgebraCaseFailure {
    pub scenario_id: String,
    pub reason_code: String,
    pub observed: Value,
}

/// Flat named-tensor container used to drive fixture cases.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureModel {
    tensors: NamedTensors,
}

impl FixtureModel {
    #[must_use]
    pub fn new(tensors: NamedTensors) -> Self {
        Self { tensors }
    }
}

impl ParameterContainer for FixtureModel {
    fn named_tensors(&self) -> Vec<(String, &DenseTensor)> {
        self.tensors
            .iter()
            .map(|(key, tensor)| (key.clone(), tensor))
            .collect()
    }

    fn tensor_slot_mut(&mut self, key: &str) -> Option<&mut DenseTensor> {
        self.tensors.get_mut(key)
    }

    fn describe(&self) -> String {
        format!("FixtureModel(keys={})", self.tensors.len())
    }
}

impl Reconstructible for FixtureModel {
    type Architecture = ShapeSchema;

    fn architecture(&self) -> ShapeSchema {
        ShapeSchema::of(&self.tensors)
    }

    fn instantiate(architecture: &ShapeSchema) -> Result<Self, AlgebraError> {
        let mut tensors = NamedTensors::new();
        for key in architecture.keys() {
            let shape = architecture.shape(key).unwrap_or_default().to_vec();
            tensors.insert(key.to_string(), DenseTensor::zeros(shape, DType::F64)?);
        }
        Ok(Self { tensors })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AlgebraFixtureFile {
    cases: Vec<AlgebraCase>,
}

#[derive(Debug, Clone, Deserialize)]
struct AlgebraCase {
    name: String,
    op: AlgebraOp,
    lhs: BTreeMap<String, TensorFixture>,
    rhs: Option<OperandFixture>,
    target: Option<BTreeMap<String, Vec<usize>>>,
    expected: Expectation,
    expected_hardened: Option<Expectation>,
    tolerance: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AlgebraOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Inner,
    Norm,
    Distance,
    Materialize,
    Load,
}

impl AlgebraOp {
    fn label(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Pow => "pow",
            Self::Inner => "inner",
            Self::Norm => "norm",
            Self::Distance => "distance",
            Self::Materialize => "materialize",
            Self::Load => "load",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TensorFixture {
    shape: Vec<usize>,
    values: Vec<FixtureValue>,
    dtype: Option<String>,
}

/// JSON has no literal for non-finite floats; fixtures spell them `"nan"`, `"inf"`, `"-inf"`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
enum FixtureValue {
    Number(f64),
    Special(SpecialValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
enum SpecialValue {
    #[serde(rename = "nan")]
    Nan,
    #[serde(rename = "inf")]
    Inf,
    #[serde(rename = "-inf")]
    NegInf,
}

impl FixtureValue {
    fn to_f64(self) -> f64 {
        match self {
            Self::Number(value) => value,
            Self::Special(SpecialValue::Nan) => f64::NAN,
            Self::Special(SpecialValue::Inf) => f64::INFINITY,
            Self::Special(SpecialValue::NegInf) => f64::NEG_INFINITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum OperandFixture {
    Scalar { value: f64 },
    Tensor(TensorFixture),
    Collection { tensors: BTreeMap<String, TensorFixture> },
    Text { value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Expectation {
    Collection { tensors: BTreeMap<String, TensorFixture> },
    Value { value: f64 },
    Error { error: String },
}

enum OwnedOperand {
    Scalar(f64),
    Tensor(DenseTensor),
    Collection(ParamVector<FixtureModel>),
    Text(String),
}

impl OwnedOperand {
    fn as_operand(&self) -> Operand<'_, FixtureModel> {
        match self {
            Self::Scalar(value) => Operand::Scalar(*value),
            Self::Tensor(tensor) => Operand::from(tensor),
            Self::Collection(collection) => Operand::from(collection),
            Self::Text(text) => Operand::from(text),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Tensor(_) => "tensor",
            Self::Collection(_) => "collection",
            Self::Text(_) => "text",
        }
    }
}

enum Observed {
    Collection(ParamVector<FixtureModel>),
    Value(f64),
}

#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    let fixture_count = fs::read_dir(&config.fixture_root)
        .ok()
        .into_iter()
        .flat_map(|it| it.filter_map(Result::ok))
        .count();

    let mode = if config.strict_mode {
        ExecutionMode::Strict
    } else {
        ExecutionMode::Hardened
    };

    let (cases_total, cases_passed) = run_algebra_conformance(config, mode)
        .map_or((0, 0), |(_, cases)| {
            summarize_passes(cases.iter().map(AlgebraCaseReport::passed))
        });

    HarnessReport {
        suite: "smoke",
        fixture_count,
        strict_mode: config.strict_mode,
        cases_total,
        cases_passed,
    }
}

pub fn run_algebra_conformance(
    config: &HarnessConfig,
    mode: ExecutionMode,
) -> Result<(HarnessReport, Vec<AlgebraCaseReport>), String> {
    let fixture_path = config.fixture_root.join(ALGEBRA_FIXTURE);
    let fixture: AlgebraFixtureFile = load_fixture(&fixture_path)?;

    let mut case_reports = Vec::with_capacity(fixture.cases.len());
    for case in &fixture.cases {
        case_reports.push(run_algebra_case(case, mode)?);
    }

    let (cases_total, cases_passed) =
        summarize_passes(case_reports.iter().map(AlgebraCaseReport::passed));

    let report = HarnessReport {
        suite: "algebra",
        fixture_count: 1,
        strict_mode: mode == ExecutionMode::Strict,
        cases_total,
        cases_passed,
    };
    Ok((report, case_reports))
}

/// Case names in fixture order.
pub fn algebra_case_names(config: &HarnessConfig) -> Result<Vec<String>, String> {
    let fixture: AlgebraFixtureFile = load_fixture(&config.fixture_root.join(ALGEBRA_FIXTURE))?;
    Ok(fixture.cases.into_iter().map(|case| case.name).collect())
}

/// Runs the algebra suite for every requested mode and writes one JSON line
/// per case to `output_path`.
pub fn emit_algebra_conformance_log(
    config: &HarnessConfig,
    output_path: &Path,
    modes: &[ExecutionMode],
) -> Result<AlgebraLogSummary, String> {
    let mut lines = Vec::new();
    let mut reports = Vec::with_capacity(modes.len());
    let mut failures = Vec::new();
    for mode in modes {
        let (report, cases) = run_algebra_conformance(config, *mode)?;
        for case in cases {
            let log = &case.forensic_log;
            if !case.passed() {
                failures.push(AlgebraCaseFailure {
                    scenario_id: log.scenario_id.clone(),
                    reason_code: log.reason_code.clone(),
                    observed: log.extra_fields.get("observed").cloned().unwrap_or(Value::Null),
                });
            }
            lines.push(log.to_json_line()?);
        }
        reports.push(report);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|error| {
            format!(
                "failed to create log directory {}: {error}",
                parent.display()
            )
        })?;
    }
    let mut file = fs::File::create(output_path)
        .map_err(|error| format!("failed to create {}: {error}", output_path.display()))?;
    for line in &lines {
        writeln!(file, "{line}")
            .map_err(|error| format!("failed to write {}: {error}", output_path.display()))?;
    }

    Ok(AlgebraLogSummary {
        output_path: output_path.to_path_buf(),
        modes: modes.to_vec(),
        log_entries: lines.len(),
        failed_entries: failures.len(),
        reports,
        failures,
    })
}

fn run_algebra_case(case: &AlgebraCase, mode: ExecutionMode) -> Result<AlgebraCaseReport, String> {
    let lhs_model = FixtureModel::new(named_tensors_from_fixture(&case.lhs)?);
    let mut session = AlgebraSession::new(mode);
    let lhs = session.wrap(&lhs_model);

    let rhs = case.rhs.as_ref().map(owned_operand).transpose()?;
    let observed = execute(case, &mut session, &lhs, rhs.as_ref(), mode)?;

    let expected = match (mode, &case.expected_hardened) {
        (ExecutionMode::Hardened, Some(override_expectation)) => override_expectation,
        _ => &case.expected,
    };
    let tolerance = case.tolerance.unwrap_or(DEFAULT_TOLERANCE);
    let expectation_ok = matches_expectation(&observed, expected, tolerance)?;
    let operands_unchanged_ok = operands_unchanged(case, &lhs_model, &lhs, rhs.as_ref())?;

    let passed = expectation_ok && operands_unchanged_ok;
    let (outcome, reason_code) = if passed {
        ("pass", "algebra_expectation_match")
    } else if !operands_unchanged_ok {
        ("fail", "algebra_operand_mutated")
    } else {
        ("fail", "algebra_expectation_mismatch")
    };

    let mut extra_fields = BTreeMap::new();
    extra_fields.insert("op".to_string(), json!(case.op.label()));
    extra_fields.insert(
        "operand_kind".to_string(),
        json!(rhs.as_ref().map_or("none", OwnedOperand::kind)),
    );
    extra_fields.insert("observed".to_string(), observed_field(&observed));
    extra_fields.insert(
        "runtime_evidence".to_string(),
        runtime_evidence_field(session.evidence()),
    );

    Ok(AlgebraCaseReport {
        name: case.name.clone(),
        mode,
        expectation_ok,
        operands_unchanged_ok,
        forensic_log: StructuredCaseLog::new(
            "algebra",
            ALGEBRA_FIXTURE,
            "MS-ALG-001",
            case.name.as_str(),
            mode,
            vec![format!("crates/ms-conformance/fixtures/{ALGEBRA_FIXTURE}")],
            format!(
                "cargo run -p ms-conformance --bin run_algebra_conformance -- --mode {}",
                mode_label(mode)
            ),
            outcome,
            reason_code,
        )
        .with_extra_fields(extra_fields),
    })
}

fn execute(
    case: &AlgebraCase,
    session: &mut AlgebraSession,
    lhs: &ParamVector<FixtureModel>,
    rhs: Option<&OwnedOperand>,
    mode: ExecutionMode,
) -> Result<Result<Observed, AlgebraError>, String> {
    let require_rhs = || {
        rhs.map(OwnedOperand::as_operand)
            .ok_or_else(|| format!("case '{}' requires an rhs operand", case.name))
    };

    let observed = match case.op {
        AlgebraOp::Add => session.add(lhs, require_rhs()?).map(Observed::Collection),
        AlgebraOp::Sub => session.sub(lhs, require_rhs()?).map(Observed::Collection),
        AlgebraOp::Mul => session.mul(lhs, require_rhs()?).map(Observed::Collection),
        AlgebraOp::Div => session.div(lhs, require_rhs()?).map(Observed::Collection),
        AlgebraOp::Pow => session.pow(lhs, require_rhs()?).map(Observed::Collection),
        AlgebraOp::Inner => session.inner(lhs, require_rhs()?).map(Observed::Value),
        AlgebraOp::Norm => Ok(Observed::Value(session.norm(lhs))),
        AlgebraOp::Distance => {
            let Some(OwnedOperand::Collection(other)) = rhs else {
                return Err(format!("case '{}' requires a collection rhs", case.name));
            };
            session.distance(lhs, other).map(Observed::Value)
        }
        AlgebraOp::Materialize => session
            .materialize(lhs)
            .map(|(model, _)| Observed::Collection(ParamVector::wrap(&model))),
        AlgebraOp::Load => {
            let target = case
                .target
                .as_ref()
                .ok_or_else(|| format!("case '{}' requires a target schema", case.name))?;
            let schema = ShapeSchema::from_entries(target.clone());
            FixtureModel::instantiate(&schema).and_then(|mut model| {
                load_named_tensors(&mut model, lhs.tensors(), load_mode_for(mode))
                    .map(|_| Observed::Collection(ParamVector::wrap(&model)))
            })
        }
    };
    Ok(observed)
}

fn matches_expectation(
    observed: &Result<Observed, AlgebraError>,
    expected: &Expectation,
    tolerance: f64,
) -> Result<bool, String> {
    Ok(match (observed, expected) {
        (Ok(Observed::Value(actual)), Expectation::Value { value }) => {
            within(*actual, *value, tolerance)
        }
        (Ok(Observed::Collection(actual)), Expectation::Collection { tensors }) => {
            let expected = named_tensors_from_fixture(tensors)?;
            collections_within(actual.tensors(), &expected, tolerance)
        }
        (Err(error), Expectation::Error { error: code }) => error_code(error) == code.as_str(),
        _ => false,
    })
}

fn collections_within(actual: &NamedTensors, expected: &NamedTensors, tolerance: f64) -> bool {
    actual.len() == expected.len()
        && actual.iter().all(|(key, tensor)| {
            expected.get(key).is_some_and(|want| {
                tensor.shape() == want.shape()
                    && tensor.dtype() == want.dtype()
                    && vec_within(tensor.values(), want.values(), tolerance)
            })
        })
}

fn error_code(error: &AlgebraError) -> &'static str {
    match error {
        AlgebraError::SchemaMismatch { .. } => "schema_mismatch",
        AlgebraError::ShapeMismatch { .. } => "shape_mismatch",
        AlgebraError::UnsupportedOperand { .. } => "unsupported_operand",
        AlgebraError::NotReconstructible { .. } => "not_reconstructible",
        AlgebraError::Kernel(_) => "kernel",
        AlgebraError::Tensor(_) => "tensor",
    }
}

fn observed_field(observed: &Result<Observed, AlgebraError>) -> Value {
    match observed {
        Ok(Observed::Value(value)) => json!({ "value": value }),
        Ok(Observed::Collection(collection)) => json!({
            "keys": collection.len(),
            "numel": collection.numel(),
            "norm": collection.norm(),
        }),
        Err(error) => json!({
            "error": error_code(error),
            "message": error.to_string(),
        }),
    }
}

fn runtime_evidence_field(entries: &[EvidenceEntry]) -> Value {
    let mut kind_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for entry in entries {
        *kind_counts.entry(entry.kind.label()).or_insert(0) += 1;
    }

    json!({
        "total_entries": entries.len(),
        "kind_counts": kind_counts,
        "entries": entries
            .iter()
            .map(|entry| {
                json!({
                    "ts_unix_ms": entry.ts_unix_ms,
                    "kind": entry.kind.label(),
                    "summary": entry.summary,
                })
            })
            .collect::<Vec<_>>(),
    })
}

/// Bitwise check of the source model, its collection and the right operand
/// against freshly decoded fixture data.
fn operands_unchanged(
    case: &AlgebraCase,
    lhs_model: &FixtureModel,
    lhs: &ParamVector<FixtureModel>,
    rhs: Option<&OwnedOperand>,
) -> Result<bool, String> {
    let snapshot = fingerprints(&named_tensors_from_fixture(&case.lhs)?);
    let model_now: BTreeMap<String, u64> = lhs_model
        .named_tensors()
        .into_iter()
        .map(|(key, tensor)| (key, tensor.fingerprint64()))
        .collect();
    let rhs_ok = match (rhs, &case.rhs) {
        (Some(OwnedOperand::Tensor(tensor)), Some(OperandFixture::Tensor(fixture))) => {
            tensor.fingerprint64() == tensor_from_fixture(fixture)?.fingerprint64()
        }
        (Some(OwnedOperand::Collection(collection)), Some(OperandFixture::Collection { tensors })) => {
            fingerprints(collection.tensors()) == fingerprints(&named_tensors_from_fixture(tensors)?)
        }
        _ => true,
    };
    Ok(model_now == snapshot && fingerprints(lhs.tensors()) == snapshot && rhs_ok)
}

fn fingerprints(tensors: &NamedTensors) -> BTreeMap<String, u64> {
    tensors
        .iter()
        .map(|(key, tensor)| (key.clone(), tensor.fingerprint64()))
        .collect()
}

fn owned_operand(fixture: &OperandFixture) -> Result<OwnedOperand, String> {
    Ok(match fixture {
        OperandFixture::Scalar { value } => OwnedOperand::Scalar(*value),
        OperandFixture::Tensor(tensor) => OwnedOperand::Tensor(tensor_from_fixture(tensor)?),
        OperandFixture::Collection { tensors } => OwnedOperand::Collection(ParamVector::wrap(
            &FixtureModel::new(named_tensors_from_fixture(tensors)?),
        )),
        OperandFixture::Text { value } => OwnedOperand::Text(value.clone()),
    })
}

fn named_tensors_from_fixture(
    fixtures: &BTreeMap<String, TensorFixture>,
) -> Result<NamedTensors, String> {
    fixtures
        .iter()
        .map(|(key, fixture)| Ok((key.clone(), tensor_from_fixture(fixture)?)))
        .collect()
}

fn tensor_from_fixture(fixture: &TensorFixture) -> Result<DenseTensor, String> {
    let dtype = parse_dtype(fixture.dtype.as_deref())?;
    let values = fixture.values.iter().map(|value| value.to_f64()).collect();
    DenseTensor::new(values, fixture.shape.clone(), dtype)
        .map_err(|error| format!("invalid fixture tensor: {error}"))
}

fn parse_dtype(raw: Option<&str>) -> Result<DType, String> {
    let Some(raw) = raw else {
        return Ok(DType::F64);
    };
    [DType::F64, DType::F32]
        .into_iter()
        .find(|dtype| dtype.label() == raw)
        .ok_or_else(|| format!("unsupported fixture dtype '{raw}'"))
}

fn load_fixture<T>(path: &Path) -> Result<T, String>
where
    T: for<'de> Deserialize<'de>,
{
    let metadata = fs::metadata(path).map_err(|error| {
        format!(
            "failed reading fixture metadata {}: {error}",
            path.display()
        )
    })?;
    let size = metadata.len();
    if size > MAX_FIXTURE_BYTES {
        return Err(format!(
            "fixture {} exceeds max bytes: actual={size} max={MAX_FIXTURE_BYTES}",
            path.display()
        ));
    }

    let raw = fs::read_to_string(path)
        .map_err(|error| format!("failed reading fixture {}: {error}", path.display()))?;
    serde_json::from_str::<T>(&raw)
        .map_err(|error| format!("failed parsing fixture {}: {error}", path.display()))
}

fn summarize_passes<I>(iter: I) -> (usize, usize)
where
    I: Iterator<Item = bool>,
{
    iter.fold((0, 0), |(total, passed), ok| {
        (total + 1, passed + usize::from(ok))
    })
}

fn within(actual: f64, expected: f64, tolerance: f64) -> bool {
    if expected.is_nan() {
        return actual.is_nan();
    }
    if expected.is_infinite() {
        return actual == expected;
    }
    (actual - expected).abs() <= tolerance
}

fn vec_within(actual: &[f64], expected: &[f64], tolerance: f64) -> bool {
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected.iter())
            .all(|(actual, expected)| within(*actual, *expected, tolerance))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ms_algebra::{LoadMode, NamedTensors, ParamVector, ParameterContainer, Reconstructible};
    use ms_core::{DType, DenseTensor, ExecutionMode};

    use super::{
        AlgebraCase, AlgebraFixtureFile, Expectation, FixtureModel, HarnessConfig, OwnedOperand,
        TensorFixture, operands_unchanged, parse_dtype, run_algebra_conformance,
        summarize_passes, tensor_from_fixture, vec_within,
    };

    #[test]
    fn fixture_model_round_trips_through_materialize() {
        let mut tensors = NamedTensors::new();
        tensors.insert(
            "w".to_string(),
            DenseTensor::new(vec![1.0, 2.0], vec![2], DType::F64).expect("tensor"),
        );
        let model = FixtureModel::new(tensors);
        let vector = ParamVector::wrap(&model);

        let (rebuilt, report) = vector
            .materialize(LoadMode::Strict)
            .expect("materialize should succeed");
        assert_eq!(rebuilt, model);
        assert_eq!(report.loaded_keys, 1);
        assert_eq!(model.describe(), "FixtureModel(keys=1)");
    }

    #[test]
    fn instantiate_builds_zero_tensors_for_schema() {
        let schema = ms_algebra::ShapeSchema::from_entries(BTreeMap::from([(
            "b".to_string(),
            vec![3],
        )]));
        let model = FixtureModel::instantiate(&schema).expect("instantiate");
        let tensors = model.named_tensors();
        assert_eq!(tensors.len(), 1);
        assert_eq!(tensors[0].1.values(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn fixture_parses_tagged_expectations() {
        let raw = r#"{
            "cases": [{
                "name": "norm",
                "op": "norm",
                "lhs": {"w": {"shape": [2], "values": [3.0, 4.0]}},
                "expected": {"kind": "value", "value": 5.0}
            }]
        }"#;
        let fixture: AlgebraFixtureFile = serde_json::from_str(raw).expect("fixture parses");
        assert_eq!(fixture.cases.len(), 1);
        assert!(matches!(
            fixture.cases[0].expected,
            Expectation::Value { value } if value == 5.0
        ));
    }

    #[test]
    fn unknown_dtype_is_rejected() {
        assert_eq!(parse_dtype(Some("f32")), Ok(DType::F32));
        assert!(parse_dtype(Some("bf16")).is_err());
    }

    #[test]
    fn pass_summary_and_tolerance_helpers() {
        assert_eq!(summarize_passes([true, false, true].into_iter()), (3, 2));
        assert!(vec_within(&[1.0, 2.0], &[1.0, 2.0 + 1e-13], 1e-12));
        assert!(!vec_within(&[1.0], &[1.0, 2.0], 1e-12));
        assert!(vec_within(&[f64::NAN, f64::INFINITY], &[f64::NAN, f64::INFINITY], 1e-12));
        assert!(!vec_within(&[1.0], &[f64::NAN], 1e-12));
        assert!(!vec_within(&[f64::NEG_INFINITY], &[f64::INFINITY], 1e-12));
    }

    #[test]
    fn fixture_values_spell_non_finite_floats() {
        let fixture: TensorFixture = serde_json::from_str(
            r#"{"shape": [4], "values": [1.5, "nan", "inf", "-inf"]}"#,
        )
        .expect("tensor fixture parses");
        let tensor = tensor_from_fixture(&fixture).expect("tensor builds");
        let values = tensor.values();
        assert_eq!(values[0], 1.5);
        assert!(values[1].is_nan());
        assert_eq!(values[2], f64::INFINITY);
        assert_eq!(values[3], f64::NEG_INFINITY);

        assert!(serde_json::from_str::<TensorFixture>(r#"{"shape": [1], "values": ["NaN"]}"#).is_err());
    }

    fn single_tensor_model(values: Vec<f64>) -> FixtureModel {
        FixtureModel::new(NamedTensors::from([(
            "w".to_string(),
            DenseTensor::new(values, vec![2], DType::F64).expect("tensor"),
        )]))
    }

    #[test]
    fn operand_check_detects_drift_from_fixture() {
        let case: AlgebraCase = serde_json::from_str(
            r#"{
                "name": "add_nan_pair",
                "op": "add",
                "lhs": {"w": {"shape": [2], "values": ["nan", 1.0]}},
                "rhs": {"kind": "collection", "tensors": {"w": {"shape": [2], "values": [2.0, 3.0]}}},
                "expected": {"kind": "error", "error": "schema_mismatch"}
            }"#,
        )
        .expect("case parses");

        let model = single_tensor_model(vec![f64::NAN, 1.0]);
        let lhs = ParamVector::wrap(&model);
        let rhs = OwnedOperand::Collection(ParamVector::wrap(&single_tensor_model(vec![2.0, 3.0])));
        assert_eq!(operands_unchanged(&case, &model, &lhs, Some(&rhs)), Ok(true));

        let drifted_rhs =
            OwnedOperand::Collection(ParamVector::wrap(&single_tensor_model(vec![2.0, 4.0])));
        assert_eq!(operands_unchanged(&case, &model, &lhs, Some(&drifted_rhs)), Ok(false));

        let drifted_model = single_tensor_model(vec![f64::NAN, 1.5]);
        assert_eq!(operands_unchanged(&case, &drifted_model, &lhs, Some(&rhs)), Ok(false));
        let drifted_lhs = ParamVector::wrap(&drifted_model);
        assert_eq!(operands_unchanged(&case, &model, &drifted_lhs, Some(&rhs)), Ok(false));
    }

    #[test]
    fn hardened_suite_is_green() {
        let cfg = HarnessConfig::default_paths();
        let (report, cases) = run_algebra_conformance(&cfg, ExecutionMode::Hardened)
            .expect("hardened algebra conformance should run");
        let failing: Vec<&str> = cases
            .iter()
            .filter(|case| !case.passed())
            .map(|case| case.name.as_str())
            .collect();
        assert!(failing.is_empty(), "failing cases: {failing:?}");
        assert_eq!(report.cases_total, report.cases_passed);
    }
}
