#![forbid(unsafe_code)]

use std::path::PathBuf;

use ms_conformance::logging::mode_label;
use ms_conformance::{HarnessConfig, algebra_case_names, emit_algebra_conformance_log};
use ms_core::ExecutionMode;
use serde_json::json;

const USAGE: &str =
    "usage: run_algebra_conformance [--mode strict|hardened|both] [--output path] [--list]";

fn main() -> Result<(), String> {
    let mut mode = String::from("both");
    let mut output: Option<PathBuf> = None;
    let mut list_only = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mode" => {
                mode = args
                    .next()
                    .ok_or_else(|| "--mode requires one of: strict|hardened|both".to_string())?;
            }
            "--output" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--output requires a file path".to_string())?;
                output = Some(PathBuf::from(value));
            }
            "--list" => list_only = true,
            other => return Err(format!("unknown arg '{other}'. {USAGE}")),
        }
    }

    let config = HarnessConfig::default_paths();
    if list_only {
        for name in algebra_case_names(&config)? {
            println!("{name}");
        }
        return Ok(());
    }

    let modes = parse_modes(mode.as_str())?;
    let output_path = output.unwrap_or_else(|| {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../artifacts/conformance/algebra_cases.jsonl")
    });
    let summary = emit_algebra_conformance_log(&config, output_path.as_path(), &modes)?;

    let per_mode: Vec<_> = summary
        .modes
        .iter()
        .zip(&summary.reports)
        .map(|(mode, report)| {
            json!({
                "mode": mode_label(*mode),
                "cases_total": report.cases_total,
                "cases_passed": report.cases_passed,
            })
        })
        .collect();
    let failures: Vec<_> = summary
        .failures
        .iter()
        .map(|failure| {
            json!({
                "scenario_id": failure.scenario_id,
                "reason_code": failure.reason_code,
                "observed": failure.observed,
            })
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "status": if summary.failures.is_empty() { "ok" } else { "failed" },
            "output_path": summary.output_path.display().to_string(),
            "log_entries": summary.log_entries,
            "modes": per_mode,
            "failures": failures,
        }))
        .map_err(|error| format!("failed to serialize summary: {error}"))?
    );

    if summary.failed_entries > 0 {
        return Err(format!(
            "{} conformance case(s) failed; see {}",
            summary.failed_entries,
            summary.output_path.display()
        ));
    }
    Ok(())
}

fn parse_modes(raw: &str) -> Result<Vec<ExecutionMode>, String> {
    match raw {
        "strict" => Ok(vec![ExecutionMode::Strict]),
        "hardened" => Ok(vec![ExecutionMode::Hardened]),
        "both" => Ok(vec![ExecutionMode::Strict, ExecutionMode::Hardened]),
        _ => Err(format!("unsupported mode '{raw}'; expected strict|hardened|both")),
    }
}
