//! Rule and protocol errors reported back to clients.
//!
//! Both enums are recoverable: the handler turns them into an `error`
//! envelope for the sender and keeps the connection open (except for
//! [`GameError::GameFull`], which closes the unregistered connection).

/// A move, join, or turn check that the game rules reject.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("column {column} is out of range")]
    ColumnOutOfRange { column: i64 },

    #[error("column {column} is full")]
    ColumnFull { column: usize },

    #[error("it is not your turn")]
    NotYourTurn,

    #[error("the game is over; start a new game")]
    GameFinished,

    #[error("waiting for an opponent to join")]
    WaitingForOpponent,

    #[error("the game already has two players")]
    GameFull,

    #[error("player is not part of this game")]
    UnknownPlayer,
}

/// An inbound line that could not be decoded into an envelope.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}
