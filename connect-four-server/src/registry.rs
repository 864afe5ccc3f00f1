use std::{collections::HashMap, io, net::SocketAddr};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{board::PlayerId, message::write_frame};

pub type SessionId = u64;

/// Write half of a client connection once it has been handed to the registry.
pub type Outbound = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// A joined client: who it is and where its outbound bytes go.
pub struct Session {
    pub peer: SocketAddr,
    pub username: String,
    pub player_id: PlayerId,
    writer: Outbound,
}

impl Session {
    pub fn new(peer: SocketAddr, username: String, player_id: PlayerId, writer: Outbound) -> Self {
        Self {
            peer,
            username,
            player_id,
            writer,
        }
    }

    pub async fn deliver(&mut self, frame: &[u8]) -> io::Result<()> {
        write_frame(&mut self.writer, frame).await
    }

    /// Shuts down the write side, consuming the session so it closes only once.
    pub async fn close(mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Joined sessions keyed by connection id.
///
/// Lives inside the lobby lock; holding `&mut SessionRegistry` means holding
/// that lock.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: SessionId, session: Session) {
        self.sessions.insert(id, session);
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SessionId, &mut Session)> {
        self.sessions.iter_mut().map(|(id, session)| (*id, session))
    }
}
