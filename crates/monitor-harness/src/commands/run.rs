//! Run command implementation

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Args;
use monitor_harness_core::scenarios::{BUILTIN_NAMES, builtin};
use monitor_harness_core::{Harness, KafkaBus, Scenario, SettingsOverrides, SuiteReport};
use serde_json::json;

use super::GlobalArgs;

/// Run scenarios against an agent binary
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Agent program; it is started as `<child> <args...> -c <config>`
    #[arg(long, value_name = "PROGRAM")]
    child: String,

    /// Extra agent arguments, given after `--`
    #[arg(last = true, value_name = "ARGS")]
    child_args: Vec<String>,

    /// Scenario file (JSON); repeatable
    #[arg(long = "scenario", value_name = "FILE")]
    scenarios: Vec<PathBuf>,

    /// Built-in scenario name; repeatable
    #[arg(long = "builtin", value_name = "NAME")]
    builtins: Vec<String>,

    /// Directory for generated config files
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Path to the mock-snmp-responder binary
    #[arg(long, value_name = "PATH")]
    responder_bin: Option<PathBuf>,

    /// Keep generated config files after each run
    #[arg(long)]
    keep_config: bool,

    /// Output the suite report as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the run command
pub fn execute(global: &GlobalArgs, args: RunArgs) -> Result<()> {
    let settings = super::resolve(SettingsOverrides {
        work_dir: args.work_dir.clone(),
        responder_bin: args.responder_bin.clone(),
        keep_config_files: args.keep_config.then_some(true),
        ..global.overrides()
    })?;
    let scenarios = collect_scenarios(&args)?;

    let mut argv = vec![args.child.clone()];
    argv.extend(args.child_args.iter().cloned());

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let bus = Arc::new(KafkaBus::new(settings.brokers.clone()));
    let harness = Harness::new(settings, bus);
    let report = runtime.block_on(harness.run_suite(&argv, &scenarios));

    if args.json {
        print_json(&report)?;
    } else {
        print_human(&report);
    }

    if !report.is_success() {
        bail!(
            "{} of {} scenario(s) failed{}",
            report.failed(),
            report.outcomes.len(),
            if report.residual.is_some() {
                " and residual messages were found"
            } else {
                ""
            }
        );
    }
    Ok(())
}

fn collect_scenarios(args: &RunArgs) -> Result<Vec<Scenario>> {
    if args.scenarios.is_empty() && args.builtins.is_empty() {
        bail!("nothing to run: pass --scenario <FILE> or --builtin <NAME>");
    }

    let mut scenarios = Vec::new();
    for name in &args.builtins {
        let Some(found) = builtin(name) else {
            bail!(
                "unknown built-in scenario '{name}' (available: {})",
                BUILTIN_NAMES.join(", ")
            );
        };
        scenarios.extend(found);
    }
    for path in &args.scenarios {
        scenarios.push(Scenario::load(path)?);
    }
    Ok(scenarios)
}

fn print_human(report: &SuiteReport) {
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(test) => println!("PASS {} ({:.1}s)", outcome.name, test.elapsed.as_secs_f64()),
            Err(e) => println!("FAIL {} [{}]: {e}", outcome.name, e.kind()),
        }
    }
    if let Some(e) = &report.residual {
        println!("FAIL end-of-suite [{}]: {e}", e.kind());
    }
    println!();
    println!("{} passed, {} failed", report.passed(), report.failed());
}

fn print_json(report: &SuiteReport) -> Result<()> {
    let scenarios: Vec<_> = report
        .outcomes
        .iter()
        .map(|outcome| match &outcome.result {
            Ok(test) => json!({
                "name": outcome.name,
                "passed": true,
                "topic": test.topic,
                "steps": test.steps,
                "elapsed_ms": test.elapsed.as_millis() as u64,
                "config_path": test.config_path.as_ref().map(|p| p.display().to_string()),
            }),
            Err(e) => json!({
                "name": outcome.name,
                "passed": false,
                "kind": e.kind(),
                "error": e.to_string(),
            }),
        })
        .collect();
    let output = json!({
        "finished_at": Utc::now().to_rfc3339(),
        "passed": report.passed(),
        "failed": report.failed(),
        "scenarios": scenarios,
        "residual": report.residual.as_ref().map(|e| json!({
            "kind": e.kind(),
            "error": e.to_string(),
        })),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
