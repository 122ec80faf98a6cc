//! Read-only TFTP client.
//!
//! [`fetch`] sends one octet-mode read request and collects the transfer.
//! It locks on to the source address of the first DATA packet (the server's
//! per-session transfer ID), ACKs each block, and re-ACKs a duplicate of the
//! previous block so a server whose ACK was lost can move on.  Older blocks
//! are reordered copies and are dropped; only a block from ahead of the
//! expected one is a protocol error.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

use crate::packet::{Ack, ErrorCode, Packet, PacketError, ReadRequest, DATAGRAM_SIZE};
use crate::socket::Socket;

/// Errors that end a [`fetch`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Nothing arrived from the server within the wait.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// The server sent an ERROR packet.
    #[error("server reported {code:?}: {message}")]
    Remote { code: ErrorCode, message: String },
    /// The server skipped ahead or went backwards in the block sequence.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The read request could not be encoded.
    #[error("bad request: {0}")]
    Request(#[from] PacketError),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// Download `filename` from `server`.
///
/// `wait` bounds the silence between consecutive datagrams, not the whole
/// transfer.
pub async fn fetch(server: SocketAddr, filename: &str, wait: Duration) -> Result<Vec<u8>, ClientError> {
    let any: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = Socket::bind(any).await?;
    socket
        .send_to(&ReadRequest::new(filename).encode()?, server)
        .await?;
    log::debug!("[{server}] → RRQ {filename}");

    let mut tid: Option<SocketAddr> = None;
    let mut expected: u16 = 1;
    let mut payload = Vec::new();
    let mut buf = [0u8; DATAGRAM_SIZE + 1];

    loop {
        let (n, from) = tokio::time::timeout(wait, socket.recv_from(&mut buf))
            .await
            .map_err(|_| ClientError::Timeout(wait))??;

        if tid.is_some_and(|peer| peer != from) {
            log::debug!("[{from}] ignoring datagram from unknown transfer ID");
            continue;
        }

        match Packet::decode(&buf[..n]) {
            Ok(Packet::Data(data)) if data.block == expected => {
                let peer = *tid.get_or_insert(from);
                payload.extend_from_slice(&data.payload);
                socket.send_to(&Ack { block: data.block }.encode(), peer).await?;
                log::debug!("[{peer}] ← DATA {} ({} bytes); → ACK", data.block, data.payload.len());
                if data.is_final() {
                    return Ok(payload);
                }
                expected = expected.wrapping_add(1);
            }
            Ok(Packet::Data(data)) if tid.is_some() && data.block == expected.wrapping_sub(1) => {
                socket.send_to(&Ack { block: data.block }.encode(), from).await?;
                log::debug!("[{from}] duplicate DATA {}; re-ACKed", data.block);
            }
            // Late copies of older blocks are reordered duplicates, not a skip.
            Ok(Packet::Data(data)) if tid.is_some() && expected.wrapping_sub(data.block) < 0x8000 => {
                log::debug!("[{from}] stale DATA {} (expecting {expected}); ignored", data.block);
            }
            Ok(Packet::Data(data)) => {
                return Err(ClientError::Protocol(format!(
                    "expected block {expected}, got {}",
                    data.block
                )));
            }
            Ok(Packet::Error(err)) => {
                return Err(ClientError::Remote {
                    code: err.code,
                    message: err.message,
                });
            }
            Ok(other) => log::debug!("[{from}] ignoring {:?} packet", other.opcode()),
            Err(e) => log::debug!("[{from}] bad packet: {e}"),
        }
    }
}
