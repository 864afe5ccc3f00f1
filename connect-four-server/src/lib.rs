//! Two-player four-in-a-row server over line-delimited JSON.
//!
//! Clients connect over TCP, join with a username, and take turns dropping
//! tokens into a shared board. Every state change is broadcast to all joined
//! clients. Modules, leaves first:
//!
//! - [`message`] defines the JSON envelopes and the line framing helpers.
//! - [`board`] is the grid with gravity placement and win/tie detection.
//! - [`game`] adds seats and turn authority on top of the board.
//! - [`registry`] maps connection ids to joined sessions and their sockets.
//! - [`dispatch`] holds the shared lobby and fans messages out to sessions.
//! - [`handler`] runs the per-connection state machine.
//! - [`server`] binds the listener and spawns a handler per client.
//! - [`cli`] parses the command line into a [`server::ServerConfig`].
//!
//! Unit tests live next to each module; `tests/` drives a real server over TCP.

pub mod board;
pub mod cli;
pub mod dispatch;
pub mod error;
pub mod game;
pub mod handler;
pub mod message;
pub mod registry;
pub mod server;
