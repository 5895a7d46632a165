//! Token-admitted websocket chat room.
//!
//! Users create an account over HTTP, receive an opaque websocket token, and
//! join the room at `/ws/{client_id}?token=...`. Every text frame a member
//! sends is relayed to all members as `Client #<id> wrote: <text>`.
//!
//! - [`registry`] tracks admitted connections and fans out chat lines.
//! - [`session`] runs the reader and writer tasks of one websocket.
//! - [`routes`] wires the HTTP endpoints and websocket admission into axum.
//! - [`server`] owns the listener and the shared state.
//! - [`accounts`], [`store`] and [`sqlite`] hold credentials.
//! - [`cli`] and [`client`] provide the terminal front end.
//!
//! Integration tests drive a real [`server::ChatServer`] over loopback.

pub mod accounts;
pub mod cli;
pub mod client;
pub mod error;
pub mod message;
pub mod registry;
pub mod routes;
pub mod server;
pub mod session;
pub mod sqlite;
pub mod store;
