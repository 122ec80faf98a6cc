//! `tftp-server` — a read-only TFTP server that hands one in-memory payload
//! to any UDP client that asks for it.
//!
//! # Architecture
//!
//! ```text
//!   client ──RRQ──▶ ┌──────────────────────┐
//!                   │  Server (listener)   │  one shared Socket
//!                   └──────────┬───────────┘
//!                              │ tokio::spawn per accepted RRQ
//!                              ▼
//!                   ┌──────────────────────┐
//!   client ◀─DATA── │  Session             │  stop-and-wait FSM
//!   client ──ACK──▶ │  (owns a PeerConn)   │  retries on timeout
//!                   └──────────────────────┘
//! ```
//!
//! Sessions share nothing but the read-only payload.
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (serialise / deserialise)
//! - [`socket`]     — async UDP sockets and the [`socket::Transport`] seam
//! - [`state`]      — session finite-state-machine types
//! - [`session`]    — per-client stop-and-wait transfer
//! - [`server`]     — listener, dispatcher, and configuration
//! - [`client`]     — read-only fetch client
//! - [`simulator`]  — lossy/duplicating transport for testing

pub mod client;
pub mod packet;
pub mod server;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;

pub use server::{Server, ServerConfig, ServerError};
pub use session::{Session, SessionError, TransferSummary};
