//! socket-balancer
//!
//! A least-connections load balancer for HTTP and long-lived WebSocket
//! traffic.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                  BALANCER                    │
//!   Client request   │  ┌──────────┐   ┌──────────┐   ┌──────────┐  │
//!   ─────────────────┼─▶│  http    │──▶│ registry │──▶│  least   │  │
//!                    │  │  proxy   │   │ acquire  │   │  conn    │  │
//!                    │  └────┬─────┘   └──────────┘   └──────────┘  │
//!                    │       │ NodeBinding (released at end)        │
//!                    │       ▼                                      │
//!   Client response  │  ┌──────────┐                                │      Node
//!   ◀────────────────┼──│ body /   │◀───────────────────────────────┼───── (HTTP/WS)
//!                    │  │ tunnel   │                                │
//!                    │  └──────────┘                                │
//!                    │  ┌──────────────────┐  ┌──────────────────┐  │
//!                    │  │ health monitor   │  │ admin / metrics  │  │
//!                    │  └──────────────────┘  └──────────────────┘  │
//!                    └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use socket_balancer::config::load_config;
use socket_balancer::lifecycle;
use socket_balancer::observability::logging;

#[derive(Parser)]
#[command(name = "socket-balancer", version)]
#[command(about = "Least-connections HTTP/WebSocket load balancer", long_about = None)]
struct Cli {
    /// Path to a TOML config file. `SERVERS`, `PORT` and `NAME` override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    logging::init_logging(&config.observability);

    tracing::info!(
        name = %config.name,
        bind_address = %config.listener.bind_address,
        nodes = config.nodes.len(),
        health_interval_secs = config.health_check.interval_secs,
        "socket-balancer v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    lifecycle::run(config).await?;
    Ok(())
}
