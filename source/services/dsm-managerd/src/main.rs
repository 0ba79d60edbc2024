// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: DSM central manager daemon
//! READINESS: prints "dsm-managerd: ready on <addr>" once listening
//!
//! Usage: `dsm-managerd --config recipes/dsm/cluster.toml`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dsm::config::ClusterConfig;
use dsm::{CentralManager, TcpServer, TcpTransport};
use log::info;

#[derive(Debug, Parser)]
#[command(name = "dsm-managerd", about = "Central manager of the DSM cluster")]
struct Args {
    /// Cluster description (TOML).
    #[arg(long)]
    config: PathBuf,
    /// Override the listen address from the config.
    #[arg(long)]
    listen: Option<String>,
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = ClusterConfig::load(&args.config)?;
    let transport = Arc::new(TcpTransport::new(config.timeout()));
    let manager = Arc::new(CentralManager::new(
        config.node_table(),
        config.seed_records(),
        config.manager.gate,
        transport,
    ));
    let listen = args.listen.unwrap_or_else(|| config.manager.address.to_string());
    let server = TcpServer::bind(&listen, manager)
        .with_context(|| format!("listen on {listen}"))?;
    info!(
        "dsm-managerd: {} pages, {} nodes, {:?} gate",
        config.pages.len(),
        config.nodes.len(),
        config.manager.gate
    );
    println!("dsm-managerd: ready on {}", server.local_addr());
    server.wait();
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(err) = run(Args::parse()) {
        eprintln!("dsm-managerd: exited with error: {err:#}");
        std::process::exit(1);
    }
}
