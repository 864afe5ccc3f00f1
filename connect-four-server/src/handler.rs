//! Per-connection read loop and message dispatch.
//!
//! Each connection moves through `Connecting -> Joined -> Disconnected`.
//! While connecting, the handler owns both halves of the socket. On join the
//! write half moves into the session registry so broadcasts can reach it; the
//! read half and its buffer stay here until the connection ends.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::Mutex,
};
use tracing::{debug, info, warn};

use crate::{
    board::{Outcome, PlayerId},
    dispatch::Lobby,
    error::ProtocolError,
    message::{ClientToServer, ServerToClient, decode, read_frame, write_message},
    registry::{Outbound, Session, SessionId},
};

enum Phase {
    Connecting { writer: Outbound },
    Joined { player: PlayerId },
    Disconnected,
}

struct Connection {
    id: SessionId,
    peer: SocketAddr,
    lobby: Arc<Mutex<Lobby>>,
}

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: SessionId,
    lobby: Arc<Mutex<Lobby>>,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    run_connection(BufReader::new(reader), writer, peer, id, lobby).await
}

/// Drives one client until it quits, disconnects, or is turned away.
///
/// Generic over the stream halves so it can run over in-memory pipes.
pub async fn run_connection<R, W>(
    mut reader: R,
    writer: W,
    peer: SocketAddr,
    id: SessionId,
    lobby: Arc<Mutex<Lobby>>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Send + Sync + Unpin + 'static,
{
    let connection = Connection { id, peer, lobby };
    let mut phase = Phase::Connecting {
        writer: Box::new(writer),
    };
    info!(%peer, session = id, "client connected");

    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(%peer, "peer closed the connection");
                break;
            }
            Err(err) => {
                debug!(%peer, error = ?err, "failed to read from client");
                break;
            }
        };

        let message = decode::<ClientToServer>(&frame);
        phase = match phase {
            Phase::Connecting { writer } => connection.on_connecting(writer, message).await?,
            Phase::Joined { player } => connection.on_joined(player, message).await,
            Phase::Disconnected => Phase::Disconnected,
        };

        if matches!(phase, Phase::Disconnected) {
            break;
        }
    }

    connection.finish(phase).await;
    info!(%peer, session = id, "client disconnected");
    Ok(())
}

impl Connection {
    async fn on_connecting(
        &self,
        mut writer: Outbound,
        message: Result<ClientToServer, ProtocolError>,
    ) -> Result<Phase> {
        let username = match message {
            Ok(ClientToServer::Join { username }) => username.trim().to_string(),
            Ok(ClientToServer::Unknown) => {
                write_message(&mut writer, &ServerToClient::error("unknown message type")).await?;
                return Ok(Phase::Connecting { writer });
            }
            Ok(other) => {
                debug!(peer = %self.peer, message = ?other, "ignoring message before join");
                return Ok(Phase::Connecting { writer });
            }
            Err(err) => {
                debug!(peer = %self.peer, error = %err, "rejected malformed message");
                write_message(&mut writer, &ServerToClient::error(err)).await?;
                return Ok(Phase::Connecting { writer });
            }
        };

        if username.is_empty() {
            write_message(&mut writer, &ServerToClient::error("username cannot be empty")).await?;
            return Ok(Phase::Connecting { writer });
        }

        let mut lobby = self.lobby.lock().await;
        let player = match lobby.game.join(username.clone()) {
            Ok(player) => player,
            Err(err) => {
                drop(lobby);
                info!(peer = %self.peer, %username, "turned away: {err}");
                write_message(&mut writer, &ServerToClient::error(&err)).await?;
                writer.shutdown().await?;
                return Ok(Phase::Disconnected);
            }
        };

        lobby.registry.insert(
            self.id,
            Session::new(self.peer, username.clone(), player.clone(), writer),
        );
        info!(peer = %self.peer, session = self.id, %player, %username, "player joined");

        let welcome = ServerToClient::Welcome {
            player_id: player.clone(),
            username: username.clone(),
        };
        lobby.send_to(self.id, &welcome).await;
        lobby
            .broadcast(
                &ServerToClient::Join {
                    message: format!("{username} joined the game"),
                },
                None,
            )
            .await;
        lobby.broadcast_state().await;

        Ok(self.still_registered(&lobby, player))
    }

    async fn on_joined(
        &self,
        player: PlayerId,
        message: Result<ClientToServer, ProtocolError>,
    ) -> Phase {
        let mut lobby = self.lobby.lock().await;
        let Some(username) = lobby.registry.get(self.id).map(|s| s.username.clone()) else {
            debug!(peer = %self.peer, "session was purged; stopping");
            return Phase::Disconnected;
        };

        match message {
            Err(err) => {
                debug!(peer = %self.peer, error = %err, "rejected malformed message");
                lobby.send_to(self.id, &ServerToClient::error(err)).await;
            }
            Ok(ClientToServer::Unknown) => {
                lobby
                    .send_to(self.id, &ServerToClient::error("unknown message type"))
                    .await;
            }
            Ok(ClientToServer::Join { .. }) => {
                lobby
                    .send_to(self.id, &ServerToClient::error("already joined"))
                    .await;
            }
            Ok(ClientToServer::Move { column }) => {
                self.play(&mut lobby, &player, &username, column).await;
            }
            Ok(ClientToServer::Chat { message }) => {
                if !message.trim().is_empty() {
                    let chat = ServerToClient::Chat {
                        message: format!("{username}: {message}"),
                    };
                    lobby.broadcast(&chat, Some(self.id)).await;
                }
            }
            Ok(ClientToServer::Quit) => {
                info!(peer = %self.peer, %player, %username, "player quit");
                self.leave(&mut lobby, format!("{username} left the game"))
                    .await;
                return Phase::Disconnected;
            }
            Ok(ClientToServer::NewGame) => {
                info!(%player, %username, "new game requested");
                lobby.game.reset();
                lobby
                    .broadcast(
                        &ServerToClient::NewGame {
                            message: format!("{username} started a new game"),
                        },
                        None,
                    )
                    .await;
                lobby.broadcast_state().await;
            }
        }

        self.still_registered(&lobby, player)
    }

    async fn play(&self, lobby: &mut Lobby, player: &PlayerId, username: &str, column: i64) {
        let placement = match lobby.game.try_move(player, column) {
            Ok(placement) => placement,
            Err(err) => {
                debug!(%player, column, error = %err, "move rejected");
                lobby.send_to(self.id, &ServerToClient::error(&err)).await;
                return;
            }
        };

        info!(%player, column, row = placement.row, "move accepted");
        lobby
            .broadcast(
                &ServerToClient::Move {
                    message: format!("{username} dropped a token in column {}", placement.column),
                },
                None,
            )
            .await;

        match placement.outcome {
            Outcome::Winner(winner) => {
                let name = lobby
                    .game
                    .player(&winner)
                    .map(|p| p.username.clone())
                    .unwrap_or_else(|| winner.to_string());
                info!(winner = %winner, username = %name, "game over");
                lobby
                    .broadcast(
                        &ServerToClient::GameOver {
                            message: format!("{name} wins!"),
                        },
                        None,
                    )
                    .await;
            }
            Outcome::Tie => {
                info!("game tied");
                lobby
                    .broadcast(
                        &ServerToClient::GameTie {
                            message: "The game ended in a tie".to_string(),
                        },
                        None,
                    )
                    .await;
            }
            Outcome::Ongoing => {}
        }

        lobby.broadcast_state().await;
    }

    /// Removes this session, tells the remaining players, and closes the socket.
    async fn leave(&self, lobby: &mut Lobby, notice: String) {
        let Some(session) = lobby.depart(self.id) else {
            return;
        };

        lobby
            .broadcast(&ServerToClient::Quit { message: notice }, None)
            .await;
        lobby.broadcast_state().await;

        if let Err(err) = session.close().await {
            debug!(peer = %self.peer, error = ?err, "failed to close client socket");
        }
    }

    async fn finish(&self, phase: Phase) {
        match phase {
            Phase::Connecting { mut writer } => {
                let _ = writer.shutdown().await;
            }
            Phase::Joined { player } => {
                let mut lobby = self.lobby.lock().await;
                let Some(username) = lobby.registry.get(self.id).map(|s| s.username.clone())
                else {
                    return;
                };
                info!(peer = %self.peer, %player, %username, "player disconnected");
                self.leave(&mut lobby, format!("{username} disconnected"))
                    .await;
            }
            Phase::Disconnected => {}
        }
    }

    fn still_registered(&self, lobby: &Lobby, player: PlayerId) -> Phase {
        if lobby.registry.contains(self.id) {
            Phase::Joined { player }
        } else {
            warn!(peer = %self.peer, session = self.id, "connection dropped from registry");
            Phase::Disconnected
        }
    }
}
