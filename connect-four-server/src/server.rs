use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    select,
    sync::Mutex,
};
use tracing::{info, warn};

use crate::{
    dispatch::{DEFAULT_WRITE_TIMEOUT, Lobby},
    game::{GameConfig, GameState},
    handler::handle_connection,
    registry::SessionId,
};

/// Listen backlog used when none is configured.
pub const DEFAULT_BACKLOG: u32 = 5;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub backlog: u32,
    pub game: GameConfig,
    pub write_timeout: Duration,
}

impl ServerConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            backlog: DEFAULT_BACKLOG,
            game: GameConfig::default(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Binds a listener with the configured backlog.
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        let socket = if config.bind.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket
            .bind(config.bind)
            .with_context(|| format!("failed to bind {}", config.bind))?;
        let listener = socket.listen(config.backlog)?;
        Ok(Self::new(listener, config))
    }

    pub fn new(listener: TcpListener, config: &ServerConfig) -> Self {
        Self {
            listener,
            state: Arc::new(ServerState::new(config)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let id = state.next_id();
    let lobby = Arc::clone(&state.lobby);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, id, lobby).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

struct ServerState {
    lobby: Arc<Mutex<Lobby>>,
    next_id: AtomicU64,
}

impl ServerState {
    fn new(config: &ServerConfig) -> Self {
        let game = GameState::new(config.game);
        Self {
            lobby: Arc::new(Mutex::new(Lobby::new(game, config.write_timeout))),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}
