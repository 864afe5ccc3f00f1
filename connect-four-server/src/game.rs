//! Shared game state and turn authority.
//!
//! [`GameState`] owns the board, the ordered seat list, and whose turn it is.
//! It upholds two invariants on every mutation: `turn` is either `None` or one
//! of the seated players, and at most [`MAX_PLAYERS`] are seated.

use tracing::debug;

use crate::{
    board::{Board, DEFAULT_COLS, DEFAULT_ROWS, Outcome, PlayerId},
    error::GameError,
    message::{GameSnapshot, PlayerInfo},
};

pub const MAX_PLAYERS: usize = 2;

/// Board dimensions for one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameConfig {
    pub rows: usize,
    pub cols: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
}

/// Result of an accepted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub row: usize,
    pub column: usize,
    pub outcome: Outcome,
}

#[derive(Debug)]
pub struct GameState {
    board: Board,
    turn: Option<PlayerId>,
    players: Vec<Player>,
}

impl GameState {
    pub fn new(config: GameConfig) -> Self {
        Self {
            board: Board::new(config.rows, config.cols),
            turn: None,
            players: Vec::with_capacity(MAX_PLAYERS),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn(&self) -> Option<&PlayerId> {
        self.turn.as_ref()
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|player| &player.id == id)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    /// Seats a new player and returns the id assigned to them.
    ///
    /// The turn goes to the first seated player whenever nobody holds it and
    /// the board is still undecided, which covers both the first join and a
    /// replacement opponent arriving after the turn holder left.
    pub fn join(&mut self, username: impl Into<String>) -> Result<PlayerId, GameError> {
        if self.is_full() {
            return Err(GameError::GameFull);
        }

        let id = PlayerId::generate();
        self.players.push(Player {
            id: id.clone(),
            username: username.into(),
        });

        if self.turn.is_none() && self.board.evaluate_outcome() == Outcome::Ongoing {
            self.turn = self.players.first().map(|player| player.id.clone());
        }

        Ok(id)
    }

    /// Removes a player from the seat list.
    ///
    /// A departing turn holder leaves the turn empty; no successor is chosen.
    pub fn leave(&mut self, id: &PlayerId) -> Option<Player> {
        let index = self.players.iter().position(|player| &player.id == id)?;
        let player = self.players.remove(index);

        if self.turn.as_ref() == Some(id) {
            debug!(player = %id, "turn holder left; clearing turn");
            self.turn = None;
        }
        if self.players.is_empty() {
            self.board.clear();
        }

        Some(player)
    }

    /// Hands the turn to the player after `current`, wrapping around.
    pub fn advance_turn(&mut self, current: &PlayerId) {
        if let Some(index) = self.players.iter().position(|player| &player.id == current) {
            let next = &self.players[(index + 1) % self.players.len()];
            self.turn = Some(next.id.clone());
        }
    }

    /// Clears the board and gives the first move to the first seated player.
    pub fn reset(&mut self) {
        self.board.clear();
        self.turn = self.players.first().map(|player| player.id.clone());
    }

    /// Validates and applies a move by `player`.
    ///
    /// On success the turn has already been updated: cleared when the move
    /// decided the game, advanced otherwise. A rejected move changes nothing.
    pub fn try_move(&mut self, player: &PlayerId, column: i64) -> Result<Placement, GameError> {
        if self.player(player).is_none() {
            return Err(GameError::UnknownPlayer);
        }
        if self.players.len() < MAX_PLAYERS {
            return Err(GameError::WaitingForOpponent);
        }
        match &self.turn {
            None => return Err(GameError::GameFinished),
            Some(turn) if turn != player => return Err(GameError::NotYourTurn),
            Some(_) => {}
        }

        let row = self.board.attempt_placement(column, player)?;
        let outcome = self.board.evaluate_outcome();
        match outcome {
            Outcome::Winner(_) | Outcome::Tie => self.turn = None,
            Outcome::Ongoing => self.advance_turn(player),
        }

        Ok(Placement {
            row,
            // attempt_placement only succeeds for in-range, non-negative columns.
            column: column as usize,
            outcome,
        })
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            board: self.board.cells().to_vec(),
            turn: self.turn.clone(),
            players: self
                .players
                .iter()
                .map(|player| PlayerInfo {
                    id: player.id.clone(),
                    username: player.username.clone(),
                })
                .collect(),
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(GameConfig::default())
    }
}
