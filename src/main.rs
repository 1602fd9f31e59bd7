mod options;
mod protocol;
mod rdb;
mod server;
mod store;

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    let options = options::parse_args(std::env::args().skip(1));
    info!(
        "starting {} on {}:{}",
        if options.is_replica() { "replica" } else { "master" },
        options.host,
        options.port
    );

    let server = Arc::new(server::Server::new(options)?);

    if server.options().is_replica() {
        server::replica::start(server.clone());
    }

    server::listener::start(server)
        .await
        .context("listener task failed")??;

    Ok(())
}
