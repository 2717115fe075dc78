// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

mod args;
mod config;
mod greeter;
mod signal;

use busrpc_bus::LocalBus;
use clap::Parser;
use tracing::info;

use crate::config::ConfigLoader;
use crate::greeter::DemoError;

#[tokio::main]
async fn main() -> Result<(), DemoError> {
    let args = args::Args::parse();

    let mut loader = match args.config() {
        Some(path) => ConfigLoader::new(path)?,
        None => ConfigLoader::from_yaml("")?,
    };

    loader.tracing().setup_tracing_subscriber()?;
    info!(config = ?args.config(), "starting busrpc demo");

    let rpc = loader.rpc().clone();
    let demo = loader.demo().clone();

    let bus = LocalBus::new();
    let (server, summary) = greeter::run(&bus, &rpc, &demo).await?;
    info!(?summary, "walkthrough complete");

    if args.serve() {
        info!(subjects = ?server.subjects(), "serving until a shutdown signal arrives");
        signal::shutdown().await;
    }

    server.shutdown().await;
    bus.close();
    info!("shutdown complete");

    Ok(())
}
