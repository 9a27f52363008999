//! TCP listener for line connections.
//!
//! Binds the configured address, applies socket options to each accepted
//! stream and hands it to its own task. The accept loop runs until the
//! shutdown channel fires or accepting fails.

use crate::config::Config;
use crate::connection::{handle_connection, Limits};
use socket2::SockRef;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, info_span, warn, Instrument};

/// Listener errors. Both are fatal for the process.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    limits: Limits,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.address(),
                source,
            })?;

        Ok(Server {
            listener,
            limits: config.limits(),
            connection_limit: config
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max))),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// The listening socket is closed when this returns. Connections that
    /// are already running are left alone.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown requested, closing listener");
                    return Ok(());
                }
                accepted = self.accept() => {
                    let (stream, peer, permit) = accepted?;
                    self.spawn_connection(stream, peer, permit);
                }
            }
        }
    }

    /// Wait for a connection slot, then accept.
    async fn accept(
        &self,
    ) -> Result<(TcpStream, SocketAddr, Option<OwnedSemaphorePermit>), ServerError> {
        let permit = match &self.connection_limit {
            Some(limit) => limit.clone().acquire_owned().await.ok(),
            None => None,
        };

        let (stream, peer) = self.listener.accept().await.map_err(ServerError::Accept)?;
        Ok((stream, peer, permit))
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let limits = self.limits;
        let span = info_span!("connection", peer = %peer);

        tokio::spawn(
            async move {
                let _permit = permit;

                if let Err(e) = configure_socket(&stream) {
                    warn!(error = %e, "Failed to set socket options, closing connection");
                    return;
                }
                info!("Received a connection");

                if let Err(e) = handle_connection(stream, limits).await {
                    debug!(error = %e, "Connection error");
                }
                debug!("Connection closed");
            }
            .instrument(span),
        );
    }
}

/// Linger off (reset on close), no keep-alive probes, no Nagle.
fn configure_socket(stream: &TcpStream) -> io::Result<()> {
    let socket = SockRef::from(stream);
    socket.set_linger(Some(Duration::ZERO))?;
    socket.set_keepalive(false)?;
    stream.set_nodelay(true)?;
    Ok(())
}
