// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: DSM node daemon with an interactive console on stdin
//! READINESS: prints "dsm-noded <id>: ready on <addr>" once listening
//!
//! Usage: `dsm-noded --config recipes/dsm/cluster.toml --id 1`

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dsm::config::ClusterConfig;
use dsm::{console, AccessRight, Node, NodeId, Service, TcpServer, TcpTransport};
use log::info;

#[derive(Debug, Parser)]
#[command(name = "dsm-noded", about = "DSM node serving a shared page cache")]
struct Args {
    /// Cluster description (TOML).
    #[arg(long)]
    config: PathBuf,
    /// Identifier of this node in the cluster description.
    #[arg(long)]
    id: u32,
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = ClusterConfig::load(&args.config)?;
    let id = NodeId(args.id);
    let node_config = config.node_config(id)?;
    let listen = node_config.peers.resolve(id)?.to_string();

    let transport = Arc::new(TcpTransport::new(config.timeout()));
    let node = Arc::new(Node::new(node_config, transport));
    for (page, content) in config.initial_pages(id) {
        node.seed(page, content, AccessRight::Write);
    }
    info!("dsm-noded {id}: owns {} pages", node.pages().len());

    let _server = TcpServer::bind(&listen, Arc::clone(&node) as Arc<dyn Service>)
        .with_context(|| format!("listen on {listen}"))?;
    println!("dsm-noded {id}: ready on {listen}");
    println!("{}", console::help());

    let stdin = io::stdin();
    console::run(&node, stdin.lock(), io::stdout())?;
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(err) = run(Args::parse()) {
        eprintln!("dsm-noded: exited with error: {err:#}");
        std::process::exit(1);
    }
}
