//! Fan-out of server envelopes to joined sessions.
//!
//! [`Lobby`] bundles the session registry and the game state behind the one
//! lock the server shares between connection tasks. Every send serializes the
//! envelope once, writes to all recipients concurrently, and only after the
//! whole pass drops sessions whose write failed or timed out.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    game::GameState,
    message::{ServerToClient, encode},
    registry::{Session, SessionId, SessionRegistry},
};

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Lobby {
    pub registry: SessionRegistry,
    pub game: GameState,
    write_timeout: Duration,
}

impl Lobby {
    pub fn new(game: GameState, write_timeout: Duration) -> Self {
        Self {
            registry: SessionRegistry::new(),
            game,
            write_timeout,
        }
    }

    /// Sends `message` to every joined session except `excluding`.
    ///
    /// Returns the ids that were purged because delivery failed.
    pub async fn broadcast(
        &mut self,
        message: &ServerToClient,
        excluding: Option<SessionId>,
    ) -> Vec<SessionId> {
        let Some(frame) = encode_or_log(message) else {
            return Vec::new();
        };

        let frame = frame.as_slice();
        let write_timeout = self.write_timeout;
        let deliveries = self
            .registry
            .iter_mut()
            .filter(|(id, _)| Some(*id) != excluding)
            .map(move |(id, session)| async move {
                let delivered = deliver_within(session, frame, write_timeout).await;
                (id, delivered)
            });

        let failed: Vec<SessionId> = join_all(deliveries)
            .await
            .into_iter()
            .filter_map(|(id, delivered)| (!delivered).then_some(id))
            .collect();

        self.purge(&failed);
        failed
    }

    /// Sends `message` to a single session; returns false if it was purged.
    pub async fn send_to(&mut self, id: SessionId, message: &ServerToClient) -> bool {
        let Some(frame) = encode_or_log(message) else {
            return true;
        };
        let Some(session) = self.registry.get_mut(id) else {
            return false;
        };

        if deliver_within(session, &frame, self.write_timeout).await {
            true
        } else {
            self.purge(&[id]);
            false
        }
    }

    /// Broadcasts the current board, turn, and seat list.
    pub async fn broadcast_state(&mut self) -> Vec<SessionId> {
        let update = ServerToClient::Update(self.game.snapshot());
        self.broadcast(&update, None).await
    }

    /// Removes a session from the registry and its player from the game.
    pub fn depart(&mut self, id: SessionId) -> Option<Session> {
        let session = self.registry.remove(id)?;
        self.game.leave(&session.player_id);
        Some(session)
    }

    // Silent cleanup: dropping the session closes its write half and no quit
    // notice is generated.
    fn purge(&mut self, failed: &[SessionId]) {
        for id in failed {
            if let Some(session) = self.depart(*id) {
                warn!(
                    session = id,
                    peer = %session.peer,
                    username = %session.username,
                    "purged unreachable client"
                );
            }
        }
    }
}

fn encode_or_log(message: &ServerToClient) -> Option<Vec<u8>> {
    match encode(message) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(error = ?err, "failed to encode server message");
            None
        }
    }
}

async fn deliver_within(session: &mut Session, frame: &[u8], limit: Duration) -> bool {
    match timeout(limit, session.deliver(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(peer = %session.peer, error = ?err, "failed to deliver message to client");
            false
        }
        Err(_) => {
            debug!(peer = %session.peer, "timed out delivering message to client");
            false
        }
    }
}
