//! Grid, gravity placement, and outcome evaluation.
//!
//! The board knows nothing about turns or connections; it only stores which
//! player's token sits in each cell. Row 0 is the top row, so a token dropped
//! into an empty column lands in row `rows - 1`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GameError;

/// Canonical board height.
pub const DEFAULT_ROWS: usize = 6;
/// Canonical board width.
pub const DEFAULT_COLS: usize = 7;
/// Tokens in a line needed to win.
pub const RUN_LENGTH: usize = 4;

// (row step, column step): horizontal, vertical, down-right, down-left.
const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

/// Opaque per-player token assigned at join and stored in board cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn generate() -> Self {
        PlayerId(nanoid::nanoid!(10))
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        PlayerId(value.to_string())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Winner(PlayerId),
    Tie,
    Ongoing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    rows: usize,
    cols: usize,
    cells: Vec<Vec<Option<PlayerId>>>,
}

impl Board {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![vec![None; cols]; rows],
        }
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&PlayerId> {
        self.cells.get(row)?.get(column)?.as_ref()
    }

    pub fn cells(&self) -> &[Vec<Option<PlayerId>>] {
        &self.cells
    }

    /// Drops `token` into `column` and returns the row it landed in.
    pub fn attempt_placement(
        &mut self,
        column: i64,
        token: &PlayerId,
    ) -> Result<usize, GameError> {
        let col = usize::try_from(column)
            .ok()
            .filter(|col| *col < self.cols)
            .ok_or(GameError::ColumnOutOfRange { column })?;

        let row = (0..self.rows)
            .rev()
            .find(|row| self.cells[*row][col].is_none())
            .ok_or(GameError::ColumnFull { column: col })?;

        self.cells[row][col] = Some(token.clone());
        Ok(row)
    }

    pub fn evaluate_outcome(&self) -> Outcome {
        for row in 0..self.rows {
            for col in 0..self.cols {
                let Some(token) = &self.cells[row][col] else {
                    continue;
                };
                if DIRECTIONS
                    .iter()
                    .any(|step| self.run_matches(row, col, *step, token))
                {
                    return Outcome::Winner(token.clone());
                }
            }
        }

        if self.is_full() {
            Outcome::Tie
        } else {
            Outcome::Ongoing
        }
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().flatten().all(Option::is_some)
    }

    pub fn clear(&mut self) {
        self.cells.iter_mut().flatten().for_each(|cell| *cell = None);
    }

    fn run_matches(
        &self,
        row: usize,
        col: usize,
        (dr, dc): (isize, isize),
        token: &PlayerId,
    ) -> bool {
        (1..RUN_LENGTH as isize).all(|step| {
            let r = row as isize + dr * step;
            let c = col as isize + dc * step;
            if r < 0 || c < 0 {
                return false;
            }
            self.cell(r as usize, c as usize) == Some(token)
        })
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new(DEFAULT_ROWS, DEFAULT_COLS)
    }
}
