//! CLI command dispatch and execution

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use monitor_harness_core::settings::{
    HarnessSettings, SettingsOverrides, parse_broker_list, resolve_settings,
};

mod materialize;
mod run;
mod settings_cmd;

/// monitor-harness - black-box tests for the SNMP monitoring agent
#[derive(Parser, Debug)]
#[command(
    name = "monitor-harness",
    version,
    about = "Black-box test runner for the SNMP monitoring agent",
    long_about = "Materializes agent configs, serves mocked SNMP values, injects traps and verifies the records the agent publishes"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct GlobalArgs {
    /// Harness settings file (TOML); defaults to ./monitor-harness.toml if present
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Comma-separated Kafka bootstrap hosts
    #[arg(long, global = true, value_name = "HOSTS")]
    broker: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run scenarios against an agent binary
    Run(run::RunArgs),

    /// Print the final agent config built from a fragment
    Materialize(materialize::MaterializeArgs),

    /// Show the resolved harness settings
    Settings(settings_cmd::SettingsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => run::execute(&self.global, args),
            Commands::Materialize(args) => materialize::execute(&self.global, args),
            Commands::Settings(args) => settings_cmd::execute(&self.global, args),
        }
    }
}

impl GlobalArgs {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            settings_path: self.settings.clone(),
            brokers: self.broker.as_deref().map(parse_broker_list),
            ..Default::default()
        }
    }
}

/// Resolve settings with the global flags plus command-specific overrides.
fn resolve(overrides: SettingsOverrides) -> Result<HarnessSettings> {
    let current_dir = std::env::current_dir().context("reading current directory")?;
    Ok(resolve_settings(&overrides, &current_dir)?)
}
