//! Accept loop of the gated relay

use crate::auth::StepUpAuthenticator;
use crate::error::{GatekeeperError, Result};
use crate::registry::ConnectionRegistry;
use crate::relay::{Relay, RelayStats};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, warn};

/// Proxy listener configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Backend every authorized connection is relayed to
    pub backend_addr: String,
    /// How long to wait for the backend to accept a connection
    pub connect_timeout: Duration,
}

/// What happened to one inbound connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Caller was not authorized and the connection was closed
    Rejected,
    /// Caller was relayed to the backend until one side hung up
    Relayed(RelayStats),
}

/// Proxy server gating inbound connections through the step-up authenticator
pub struct ProxyServer {
    config: ProxyConfig,
    auth: Arc<StepUpAuthenticator>,
    registry: ConnectionRegistry,
}

impl ProxyServer {
    pub fn new(
        config: ProxyConfig,
        auth: Arc<StepUpAuthenticator>,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            config,
            auth,
            registry,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Accept connections from `listener` forever
    ///
    /// Accept errors are logged and the loop keeps going.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(
                "proxy listening on {}, relaying to {}",
                addr, self.config.backend_addr
            );
        }

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                    continue;
                }
            };

            let proxy = self.clone();
            tokio::spawn(
                async move {
                    match proxy.handle_connection(stream, peer_addr).await {
                        Ok(ConnectionOutcome::Rejected) => {}
                        Ok(ConnectionOutcome::Relayed(stats)) => {
                            debug!(
                                client_to_backend = stats.a_to_b,
                                backend_to_client = stats.b_to_a,
                                "connection closed"
                            );
                        }
                        Err(e) => error!("error handling connection: {}", e),
                    }
                }
                .instrument(tracing::info_span!(
                    "proxy_connection",
                    %peer_addr,
                    connection_id = tracing::field::Empty
                )),
            );
        }
    }

    /// Gate one inbound connection and relay it when authorized
    pub async fn handle_connection(
        &self,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<ConnectionOutcome> {
        let ip = peer_addr.ip().to_canonical().to_string();

        if !self.auth.verdict(&ip).await {
            info!(ip = %ip, "connection rejected, IP not authenticated");
            // Best effort; the stream is dropped either way
            let _ = stream.shutdown().await;
            return Ok(ConnectionOutcome::Rejected);
        }
        info!(ip = %ip, "connection accepted, IP authenticated");

        let backend = self.dial_backend().await?;

        let relay = Arc::new(Relay::new());
        let id = self.registry.register(peer_addr, relay.clone()).await;
        tracing::Span::current().record("connection_id", id);

        let stats = relay.start(stream, backend).await;
        self.registry.unregister(id).await;

        Ok(ConnectionOutcome::Relayed(stats))
    }

    async fn dial_backend(&self) -> Result<TcpStream> {
        let addr = &self.config.backend_addr;
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| GatekeeperError::Connectivity {
                addr: addr.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "backend connect timed out",
                ),
            })?
            .map_err(|source| GatekeeperError::Connectivity {
                addr: addr.clone(),
                source,
            })?;

        // Interactive protocols are latency sensitive
        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY on backend stream: {}", e);
        }
        Ok(stream)
    }
}
