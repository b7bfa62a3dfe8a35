// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all)]

mod error;
mod options;
mod podrules;
mod runner;
mod server;
mod sriov;
mod utils;
mod watch;

use crate::options::Options;
use crate::server::Server;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|err| {
        eprintln!("invalid log filter {filter:?} ({err}), falling back to info");
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Cancels the root token on SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() {
    let options = Options::parse();
    init_logging(&options.log_level);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let server = match Server::new(options).await {
        Ok(server) => Arc::new(server),
        Err(err) => {
            error!(%err, "startup failed");
            std::process::exit(1);
        }
    };
    info!(hostname = server.hostname(), "multinet-tc starting");

    server.run(cancel).await;
    info!("multinet-tc stopped");
}
