//! Async UDP socket abstractions.
//!
//! - [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` used for the
//!   listener's shared, unconnected socket (and by the fetch client).
//! - [`PeerConn`] is a socket dedicated to one client: bound to a fresh
//!   ephemeral port (a new transfer ID) and connected to the client, so the
//!   OS filters out datagrams from anyone else.
//! - [`Transport`] is the seam a [`crate::session::Session`] talks through.
//!
//! All protocol logic lives elsewhere; this module owns only byte I/O.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};

use tokio::net::UdpSocket;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// One datagram out, one datagram in, to a single fixed peer.
pub trait Transport {
    /// Send `datagram` to the peer.
    fn send(&mut self, datagram: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next datagram from the peer and copy it into `buf`,
    /// returning its length.  Oversized datagrams are truncated to
    /// `buf.len()`.
    fn recv(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, unconnected UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks if needed.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        Self::from_tokio(inner)
    }

    /// Wrap a socket the caller has already bound.
    pub fn from_tokio(inner: UdpSocket) -> io::Result<Self> {
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send `datagram` as a single UDP datagram to `dest`.
    pub async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(datagram, dest).await?;
        Ok(())
    }

    /// Receive the next datagram into `buf`.
    ///
    /// Returns `(length, sender_address)`.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }
}

// ---------------------------------------------------------------------------
// PeerConn
// ---------------------------------------------------------------------------

/// A UDP socket connected to exactly one client.
#[derive(Debug)]
pub struct PeerConn {
    inner: UdpSocket,
}

impl PeerConn {
    /// Bind an ephemeral port on `local_ip` and connect it to `peer`.
    pub async fn connect(local_ip: IpAddr, peer: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(SocketAddr::new(local_ip, 0)).await?;
        inner.connect(peer).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl Transport for PeerConn {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.inner.send(datagram).await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf).await
    }
}
