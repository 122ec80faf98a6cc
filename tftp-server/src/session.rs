//! Per-client stop-and-wait transfer.
//!
//! A [`Session`] owns everything needed to push one copy of the payload to
//! one client: a private [`Transport`], a cursor over the shared read-only
//! payload, the current block number, and the retry budget.
//!
//! # Stop-and-wait contract
//! - Exactly **one** DATA packet is in flight at any moment.
//! - The next block is sent only after an ACK carrying the in-flight block
//!   number arrives.
//! - On timeout the *same* datagram is resent, up to `retries` transmissions
//!   per block in total; then the session aborts silently.
//! - ACKs for other blocks and undecodable datagrams are ignored without
//!   touching the retry budget or the deadline.
//! - An ERROR packet from the client aborts immediately.

use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;

use crate::packet::{self, ErrorCode, Packet, BLOCK_SIZE, DATAGRAM_SIZE};
use crate::server::ServerConfig;
use crate::socket::Transport;
use crate::state::SessionState;

/// Why a session ended in [`SessionState::Aborted`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// No ACK arrived for `block` after the configured number of transmissions.
    #[error("retries exhausted waiting for ACK of block {block}")]
    RetriesExhausted { block: u16 },
    /// The client sent an ERROR packet.
    #[error("client reported {code:?}: {message}")]
    Remote { code: ErrorCode, message: String },
    /// Too many stray or malformed datagrams while waiting for `block`.
    #[error("too many ignored datagrams while waiting for ACK of block {block}")]
    TooManyIgnored { block: u16 },
    /// Send or receive failed for a reason other than a timeout.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Totals for a transfer that reached [`SessionState::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    /// DATA packets acknowledged, including a trailing empty block.
    pub blocks: u64,
    /// Payload bytes acknowledged.
    pub bytes: u64,
}

/// Server-side state for one client's transfer.
pub struct Session<T> {
    transport: T,
    peer: SocketAddr,
    config: ServerConfig,
    state: SessionState,

    /// Session-local cursor over the shared payload.
    payload: Cursor<Arc<[u8]>>,
    /// Block number of the in-flight (or last sent) DATA packet.
    block: u16,
    /// Encoded in-flight DATA packet, kept for retransmission.
    in_flight: Vec<u8>,
    /// Payload bytes carried by `in_flight`.
    in_flight_len: usize,
    /// Transmissions of the in-flight packet so far.
    attempts: u8,
    /// When the current `AwaitingAck` episode times out.
    deadline: Instant,
    /// Datagrams ignored in the current `AwaitingAck` episode.
    ignored: u32,

    summary: TransferSummary,
    failure: Option<SessionError>,
}

impl<T: Transport> Session<T> {
    /// Create a session in [`SessionState::SendingBlock`]; nothing is sent
    /// until the first [`step`](Self::step).
    pub fn new(transport: T, peer: SocketAddr, payload: Arc<[u8]>, config: ServerConfig) -> Self {
        Self {
            transport,
            peer,
            config: config.normalized(),
            state: SessionState::default(),
            payload: Cursor::new(payload),
            block: 0,
            in_flight: Vec::with_capacity(DATAGRAM_SIZE),
            in_flight_len: 0,
            attempts: 0,
            deadline: Instant::now(),
            ignored: 0,
            summary: TransferSummary { blocks: 0, bytes: 0 },
            failure: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Block number of the DATA packet most recently sent.
    pub fn block(&self) -> u16 {
        self.block
    }

    /// Number of times the in-flight DATA packet has been transmitted.
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Drive the state machine until it reaches `Done` or `Aborted`.
    pub async fn run(mut self) -> Result<TransferSummary, SessionError> {
        while !self.state.is_terminal() {
            self.step().await;
        }
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(self.summary),
        }
    }

    /// Perform exactly one transition and return the new state.
    ///
    /// Terminal states are absorbing: stepping them is a no-op.
    pub async fn step(&mut self) -> SessionState {
        let next = match self.state {
            SessionState::SendingBlock => self.send_next_block().await,
            SessionState::AwaitingAck => self.await_ack().await,
            terminal => terminal,
        };
        if next != self.state {
            log::trace!("[{}] {} -> {}", self.peer, self.state, next);
        }
        self.state = next;
        next
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    async fn send_next_block(&mut self) -> SessionState {
        let (datagram, copied) = match packet::encode_data_block(&mut self.block, &mut self.payload) {
            Ok(encoded) => encoded,
            Err(e) => return self.abort(SessionError::Transport(e)),
        };
        self.in_flight = datagram;
        self.in_flight_len = copied;
        self.attempts = 0;
        self.transmit().await
    }

    async fn await_ack(&mut self) -> SessionState {
        let mut buf = [0u8; DATAGRAM_SIZE + 1];
        let received = tokio::time::timeout_at(self.deadline, self.transport.recv(&mut buf)).await;

        let n = match received {
            Err(_elapsed) => return self.on_timeout().await,
            Ok(Err(e)) => return self.abort(SessionError::Transport(e)),
            Ok(Ok(n)) => n,
        };

        match Packet::decode(&buf[..n]) {
            Ok(Packet::Ack(ack)) if ack.block == self.block => {
                self.summary.blocks += 1;
                self.summary.bytes += self.in_flight_len as u64;
                if self.in_flight_len < BLOCK_SIZE {
                    SessionState::Done
                } else {
                    SessionState::SendingBlock
                }
            }
            Ok(Packet::Ack(ack)) => {
                log::debug!(
                    "[{}] ignoring ACK {} while waiting for {}",
                    self.peer,
                    ack.block,
                    self.block
                );
                self.ignore()
            }
            Ok(Packet::Error(err)) => self.abort(SessionError::Remote {
                code: err.code,
                message: err.message,
            }),
            Ok(other) => {
                log::debug!("[{}] ignoring unexpected {:?} packet", self.peer, other.opcode());
                self.ignore()
            }
            Err(e) => {
                log::debug!("[{}] bad packet: {e}", self.peer);
                self.ignore()
            }
        }
    }

    async fn on_timeout(&mut self) -> SessionState {
        if self.attempts >= self.config.retries {
            return self.abort(SessionError::RetriesExhausted { block: self.block });
        }
        log::debug!(
            "[{}] timeout waiting for ACK {}; retransmitting ({}/{})",
            self.peer,
            self.block,
            self.attempts + 1,
            self.config.retries
        );
        self.transmit().await
    }

    /// Send the in-flight packet and open a fresh `AwaitingAck` episode.
    async fn transmit(&mut self) -> SessionState {
        if let Err(e) = self.transport.send(&self.in_flight).await {
            return self.abort(SessionError::Transport(e));
        }
        self.attempts += 1;
        self.ignored = 0;
        self.deadline = Instant::now() + self.config.timeout;
        SessionState::AwaitingAck
    }

    fn ignore(&mut self) -> SessionState {
        self.ignored += 1;
        match self.config.max_ignored {
            Some(limit) if self.ignored > limit => {
                self.abort(SessionError::TooManyIgnored { block: self.block })
            }
            _ => SessionState::AwaitingAck,
        }
    }

    fn abort(&mut self, err: SessionError) -> SessionState {
        self.failure = Some(err);
        SessionState::Aborted
    }
}
