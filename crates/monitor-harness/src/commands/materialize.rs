//! Materialize command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use monitor_harness_core::agent_config::ConfigMaterializer;
use serde_json::{Value, json};

use super::GlobalArgs;

/// Print the final agent config built from a fragment
#[derive(Args, Debug)]
pub struct MaterializeArgs {
    /// Config fragment (JSON file)
    #[arg(long, value_name = "FILE")]
    config: PathBuf,

    /// Also write the config file and print its path
    #[arg(long)]
    write: bool,
}

/// Execute the materialize command
pub fn execute(global: &GlobalArgs, args: MaterializeArgs) -> Result<()> {
    let settings = super::resolve(global.overrides())?;
    let contents = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let fragment: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", args.config.display()))?;

    let materializer = ConfigMaterializer::from_settings(&settings);
    let config = if args.write {
        materializer.materialize(&fragment)?
    } else {
        materializer.build(&fragment)?
    };

    let output = json!({
        "path": config.path().map(|p| p.display().to_string()),
        "topic": config.topic(),
        "sensor_ports": config.sensor_ports(),
        "trap_port": config.trap_port(),
        "document": config.document(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
