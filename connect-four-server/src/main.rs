use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use connect_four_server::{cli::Cli, server::Server};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.server_config();
    let server = Server::bind(&config)?;
    let addr = server.local_addr()?;
    info!("server listening on {}", addr);
    info!(
        rows = config.game.rows,
        cols = config.game.cols,
        backlog = config.backlog,
        "board configured"
    );
    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
