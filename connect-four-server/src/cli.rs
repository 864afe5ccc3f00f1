use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use clap::Parser;

use crate::{
    board::{DEFAULT_COLS, DEFAULT_ROWS, RUN_LENGTH},
    game::GameConfig,
    server::{DEFAULT_BACKLOG, ServerConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Two-player four-in-a-row server", long_about = None)]
pub struct Cli {
    /// TCP port to listen on. Use 0 for an ephemeral port.
    pub port: u16,

    /// Address to bind to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Maximum number of pending connections.
    #[arg(long, default_value_t = DEFAULT_BACKLOG)]
    pub backlog: u32,

    /// Board height.
    #[arg(long, default_value_t = DEFAULT_ROWS, value_parser = parse_dimension)]
    pub rows: usize,

    /// Board width.
    #[arg(long, default_value_t = DEFAULT_COLS, value_parser = parse_dimension)]
    pub cols: usize,

    /// Milliseconds to wait on a client write before dropping that client.
    #[arg(long, default_value_t = 5000)]
    pub write_timeout_ms: u64,
}

impl Cli {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: SocketAddr::new(self.host, self.port),
            backlog: self.backlog,
            game: GameConfig {
                rows: self.rows,
                cols: self.cols,
            },
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

/// Largest accepted board height or width.
pub const MAX_DIMENSION: usize = 64;

fn parse_dimension(value: &str) -> Result<usize, String> {
    let parsed: usize = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if parsed < RUN_LENGTH {
        return Err(format!("must be at least {RUN_LENGTH}"));
    }
    if parsed > MAX_DIMENSION {
        return Err(format!("must be at most {MAX_DIMENSION}"));
    }
    Ok(parsed)
}
