//! Settings command implementation

use anyhow::Result;
use clap::Args;

use super::GlobalArgs;

/// Show the resolved harness settings
#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the settings command
pub fn execute(global: &GlobalArgs, args: SettingsArgs) -> Result<()> {
    let settings = super::resolve(global.overrides())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let timeouts = &settings.timeouts;
    println!("Settings:");
    println!("  brokers: {}", settings.brokers.join(","));
    println!("  config_dir: {}", settings.config_dir().display());
    println!("  responder: {}", settings.responder_program().display());
    println!("  keep_config_files: {}", settings.keep_config_files);
    println!();
    println!("Timeouts (seconds):");
    println!("  readiness: {}", timeouts.readiness_secs);
    println!("  shutdown: {}", timeouts.shutdown_secs);
    println!("  rendezvous: {}", timeouts.rendezvous_secs);
    println!("  message_idle: {}", timeouts.message_idle_secs);
    println!("  silence_window: {}", timeouts.silence_window_secs);
    println!("  residual_window: {}", timeouts.residual_window_secs);
    println!();
    println!("Agent log format:");
    println!("  separator: {:?}", settings.log_format.separator);
    println!("  message_field: {}", settings.log_format.message_field);
    println!("  readiness_marker: {:?}", settings.log_format.readiness_marker);

    Ok(())
}
