//! monitor-harness - black-box test runner for the SNMP monitoring agent
//!
//! Runs scenario files or built-in scenarios against an agent binary and
//! reports one pass/fail line per scenario.

use clap::Parser;

mod commands;

use commands::Cli;

fn main() {
    monitor_harness_core::logging::init();
    let cli = Cli::parse();

    if let Err(e) = cli.execute() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
