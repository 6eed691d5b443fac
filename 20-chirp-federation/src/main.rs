use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use chirp_federation::{cli::Cli, server::Server};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Cli::parse().into_config()?;
    let server = Server::bind(config).await?;
    let addr = server.local_addr()?;
    info!("chirp server listening on {}", addr);

    server.restore_snapshot().await;
    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
