//! Listener / dispatcher.
//!
//! A [`Server`] owns the payload and the per-session configuration.  Its
//! loop reads one datagram at a time from the shared socket, decodes it as a
//! read request, and spawns an independent [`Session`] task per accepted
//! request without waiting for it.  Malformed requests are logged and
//! dropped; only a failure of the shared socket itself ends the loop.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::packet::{ReadRequest, DATAGRAM_SIZE};
use crate::session::{Session, SessionError};
use crate::socket::{PeerConn, Socket};

/// Transmissions per block before a session gives up.
pub const DEFAULT_RETRIES: u8 = 10;

/// How long a session waits for each ACK.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6);

/// Settings applied uniformly to every session a [`Server`] spawns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Maximum transmissions of each DATA packet.
    pub retries: u8,
    /// Per-transmission ACK wait.
    pub timeout: Duration,
    /// Abort a session after this many stray or malformed datagrams within
    /// one ACK wait.  `None` never aborts for that reason.
    pub max_ignored: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            max_ignored: None,
        }
    }
}

impl ServerConfig {
    /// Replace a zero retry count or zero timeout with the default.
    pub fn normalized(mut self) -> Self {
        if self.retries == 0 {
            self.retries = DEFAULT_RETRIES;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        self
    }
}

/// Fatal listener failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listener socket error: {0}")]
    Io(#[from] io::Error),
}

/// Serves one in-memory payload to every client that asks for it.
#[derive(Debug, Clone)]
pub struct Server {
    payload: Arc<[u8]>,
    config: ServerConfig,
}

impl Server {
    /// A server with [`ServerConfig::default`].
    pub fn new(payload: impl Into<Arc<[u8]>>) -> Self {
        Self::with_config(payload, ServerConfig::default())
    }

    pub fn with_config(payload: impl Into<Arc<[u8]>>, config: ServerConfig) -> Self {
        Self {
            payload: payload.into(),
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind `addr` and serve until the socket fails.
    pub async fn listen_and_serve(&self, addr: SocketAddr) -> Result<(), ServerError> {
        let socket = Socket::bind(addr).await?;
        log::info!("Listening on {} ...", socket.local_addr);
        self.serve(socket).await
    }

    /// Serve on a caller-provided, already bound socket until it fails.
    pub async fn serve(&self, socket: Socket) -> Result<(), ServerError> {
        self.serve_with_shutdown(socket, std::future::pending()).await
    }

    /// Serve until the socket fails or `shutdown` completes.
    ///
    /// Sessions already running are not cancelled by a shutdown; they finish
    /// on their own.
    pub async fn serve_with_shutdown<F>(&self, socket: Socket, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let local_ip = socket.local_addr.ip();
        // One spare byte so oversized datagrams are seen as oversized.
        let mut buf = [0u8; DATAGRAM_SIZE + 1];

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutting down listener on {}", socket.local_addr);
                    return Ok(());
                }
                result = socket.recv_from(&mut buf) => {
                    let (n, client) = result?;
                    match ReadRequest::decode(&buf[..n]) {
                        Ok(rrq) => self.spawn_session(local_ip, client, rrq),
                        Err(e) => log::warn!("[{client}] bad request: {e}"),
                    }
                }
            }
        }
    }

    fn spawn_session(&self, local_ip: IpAddr, client: SocketAddr, rrq: ReadRequest) {
        log::info!("[{client}] requested file: {}", rrq.filename);
        let payload = Arc::clone(&self.payload);
        let config = self.config.clone();
        tokio::spawn(serve_client(local_ip, client, payload, config));
    }
}

/// Body of one session task: open a dedicated connection, run the transfer,
/// log how it ended.
async fn serve_client(local_ip: IpAddr, client: SocketAddr, payload: Arc<[u8]>, config: ServerConfig) {
    let conn = match PeerConn::connect(local_ip, client).await {
        Ok(conn) => conn,
        Err(e) => {
            log::warn!("[{client}] dial: {e}");
            return;
        }
    };

    match Session::new(conn, client, payload, config).run().await {
        Ok(summary) => log::info!(
            "[{client}] sent {} blocks ({} bytes)",
            summary.blocks,
            summary.bytes
        ),
        Err(SessionError::Remote { code, message }) => {
            log::warn!("[{client}] received error {code:?}: {message}")
        }
        Err(SessionError::RetriesExhausted { block }) => {
            log::warn!("[{client}] exhausted retries on block {block}")
        }
        Err(e) => log::warn!("[{client}] transfer aborted: {e}"),
    }
}
