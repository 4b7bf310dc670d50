use std::path::Path;

use ms_api::AlgebraSession;
use ms_conformance::{
    HarnessConfig, algebra_case_names, emit_algebra_conformance_log, run_algebra_conformance,
    run_smoke,
};
use ms_core::ExecutionMode;
use ms_nn::{Linear, LinearConfig};
use ms_runtime::EvidenceKind;
use serde_json::Value;

#[test]
fn smoke_report_is_stable() {
    let cfg = HarnessConfig::default_paths();
    let report = run_smoke(&cfg);
    assert_eq!(report.suite, "smoke");
    assert!(report.fixture_count >= 1);
    assert!(report.cases_total > 0);
    assert_eq!(report.cases_total, report.cases_passed);

    let fixture_path = cfg.fixture_root.join("algebra_cases.json");
    assert!(Path::new(&fixture_path).exists());
}

#[test]
fn algebra_fixture_executes_in_both_modes() {
    let cfg = HarnessConfig::default_paths();
    let (strict_report, strict_cases) =
        run_algebra_conformance(&cfg, ExecutionMode::Strict).expect("strict algebra should run");
    let (hardened_report, _) = run_algebra_conformance(&cfg, ExecutionMode::Hardened)
        .expect("hardened algebra should run");

    assert_eq!(strict_report.cases_total, strict_cases.len());
    assert_eq!(strict_report.cases_total, strict_report.cases_passed);
    assert_eq!(hardened_report.cases_total, hardened_report.cases_passed);
    assert!(strict_cases.iter().all(|case| case.operands_unchanged_ok));
}

#[test]
fn case_logs_carry_mode_and_evidence() {
    let cfg = HarnessConfig::default_paths();
    let (_, cases) =
        run_algebra_conformance(&cfg, ExecutionMode::Hardened).expect("algebra should run");
    let case = cases
        .iter()
        .find(|case| case.name == "add_scalar_one")
        .expect("add_scalar_one fixture case");

    let line = case
        .forensic_log
        .to_json_line()
        .expect("log should serialize");
    let value: Value = serde_json::from_str(&line).expect("log line should parse");
    assert_eq!(value["scenario_id"], "algebra/hardened:add_scalar_one");
    assert_eq!(value["outcome"], "pass");
    assert_eq!(value["op"], "add");
    assert_eq!(value["operand_kind"], "scalar");
    assert_eq!(value["runtime_evidence"]["kind_counts"]["algebra"], 2);
}

#[test]
fn emitted_log_has_one_line_per_case_and_mode() {
    let cfg = HarnessConfig::default_paths();
    let output = std::env::temp_dir().join(format!(
        "ms-conformance-smoke-{}.jsonl",
        std::process::id()
    ));
    let summary = emit_algebra_conformance_log(
        &cfg,
        output.as_path(),
        &[ExecutionMode::Strict, ExecutionMode::Hardened],
    )
    .expect("log emission should succeed");

    let raw = std::fs::read_to_string(&output).expect("log should be readable");
    assert_eq!(raw.lines().count(), summary.log_entries);
    assert_eq!(summary.failed_entries, 0);
    assert!(summary.failures.is_empty());
    assert_eq!(summary.reports.len(), 2);
    let names = algebra_case_names(&cfg).expect("case names should load");
    assert_eq!(summary.log_entries, names.len() * 2);
    assert!(names.iter().any(|name| name == "pow_half_of_negative_is_nan"));
    for line in raw.lines() {
        let parsed: Value = serde_json::from_str(line).expect("each line is json");
        assert!(parsed.get("reason_code").is_some());
    }
    let _ = std::fs::remove_file(&output);
}

#[test]
fn session_over_linear_layers_records_every_step() {
    let mut session = AlgebraSession::new(ExecutionMode::Strict);
    let a = session.wrap(&Linear::new(LinearConfig::new(2, 3, true), 1).expect("layer"));
    let b = session.wrap(&Linear::new(LinearConfig::new(2, 3, true), 2).expect("layer"));

    let delta = session.sub(&b, &a).expect("sub");
    let step = session.mul(&delta, 0.1).expect("mul");
    let updated = session.add(&a, &step).expect("add");
    let (model, _) = session.materialize(&updated).expect("materialize");

    assert_eq!(model.in_features(), 2);
    assert_eq!(model.out_features(), 3);
    let kinds: Vec<EvidenceKind> = session.evidence().iter().map(|entry| entry.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EvidenceKind::Policy,
            EvidenceKind::Algebra,
            EvidenceKind::Algebra,
            EvidenceKind::Algebra,
            EvidenceKind::Algebra,
            EvidenceKind::Algebra,
            EvidenceKind::Materialize,
        ]
    );
}
