//! mock-snmp-responder - serves a fixed OID map on one UDP port
//!
//! Started by the harness. Binds `127.0.0.1:<port>`, completes the
//! rendezvous over stdio, then answers GetRequests until an unmapped or
//! out-of-namespace OID is requested, which ends the process with a
//! non-zero status.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use monitor_harness_core::responder::{Responder, ResponderMap, barrier, serve};
use tokio::io::BufReader;
use tokio::net::UdpSocket;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mock-snmp-responder", version, about = "Mock SNMP agent for harness runs")]
struct Args {
    /// UDP port to bind on 127.0.0.1
    #[arg(long)]
    port: u16,

    /// JSON file with the OID to value map
    #[arg(long, value_name = "FILE")]
    responses: PathBuf,

    /// Seconds to wait for the harness during startup
    #[arg(long, default_value_t = 5)]
    rendezvous_timeout_secs: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    monitor_harness_core::logging::init();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("mock-snmp-responder: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let contents = std::fs::read_to_string(&args.responses)
        .with_context(|| format!("reading {}", args.responses.display()))?;
    let map: ResponderMap = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", args.responses.display()))?;

    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, args.port))
        .await
        .with_context(|| format!("binding UDP port {}", args.port))?;
    let port = socket.local_addr()?.port();

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    barrier::arrive_worker(
        &mut stdin,
        &mut stdout,
        port,
        Duration::from_secs(args.rendezvous_timeout_secs),
    )
    .await
    .context("startup rendezvous")?;

    info!(port, entries = map.len(), "serving");
    serve(socket, Responder::new(map)).await?;
    Ok(())
}
