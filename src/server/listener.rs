//! Signaling server listener
//!
//! Handles the TCP accept loop, upgrades each connection to WebSocket
//! on the `/ws` path, and spawns the per-connection engine. When a
//! connection winds down, its peer registration (if any) is released
//! from the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::connection::{Connection, ConnectionOptions};
use crate::error::Result;
use crate::hub::Hub;
use crate::protocol::Router;
use crate::signaling;

/// WebSocket signaling server
pub struct SignalServer {
    bind_addr: String,
    hub: Arc<Hub>,
    router: Arc<Router>,
    options: ConnectionOptions,
    handshake_timeout: Duration,
    shutdown: CancellationToken,
}

impl SignalServer {
    /// Create a server wired to the given hub
    pub fn new(config: &Config, hub: Arc<Hub>) -> Self {
        let router = Arc::new(signaling::router(Arc::clone(&hub)));
        let options = ConnectionOptions::default()
            .read_timeout(config.server.read_timeout)
            .write_timeout(config.server.write_timeout);

        Self {
            bind_addr: config.bind_addr(),
            hub,
            router,
            options,
            handshake_timeout: config.server.idle_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Run the server
    ///
    /// This method blocks until a fatal listener error occurs.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "signaling server listening");

        self.accept_loop(&listener).await
    }

    /// Run the accept loop on an already-bound listener
    ///
    /// Useful when the caller needs the ephemeral port before serving.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = ?listener.local_addr(), "signaling server listening");
        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    ///
    /// Open connections are cancelled when the shutdown future
    /// completes; stopping the hub is left to the caller.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "signaling server listening");

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        self.shutdown.cancel();
        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!(peer = %peer_addr, error = %e, "failed to set TCP_NODELAY");
        }

        let connection_id = Uuid::new_v4().to_string();
        tracing::debug!(
            connection_id = %connection_id,
            peer = %peer_addr,
            "new connection"
        );

        let hub = Arc::clone(&self.hub);
        let router = Arc::clone(&self.router);
        let options = self.options.clone();
        let handshake_timeout = self.handshake_timeout;
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let mut ws_config = WebSocketConfig::default();
            ws_config.max_message_size = Some(options.max_message_size);
            ws_config.max_frame_size = Some(options.max_message_size);

            // The upgrade must complete before the idle timeout.
            let upgrade = accept_hdr_async_with_config(socket, require_ws_path, Some(ws_config));
            let stream = match timeout(handshake_timeout, upgrade).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tracing::debug!(peer = %peer_addr, error = %e, "websocket handshake failed");
                    return;
                }
                Err(_) => {
                    tracing::debug!(peer = %peer_addr, "websocket handshake timed out");
                    return;
                }
            };

            let connection = Arc::new(Connection::with_token(
                connection_id.clone(),
                peer_addr,
                options,
                cancel,
            ));

            if let Err(e) = connection.start(stream, router) {
                tracing::error!(
                    connection_id = %connection_id,
                    error = %e,
                    "failed to start connection"
                );
                return;
            }

            tracing::info!(
                connection_id = %connection_id,
                peer = %peer_addr,
                "client connected"
            );

            connection.wait_closed().await;

            // Release the registration exactly once; a peer the hub
            // already evicted is a no-op here.
            if let Some(peer_id) = connection.peer_id() {
                if let Err(e) = hub.unregister(peer_id.clone()) {
                    tracing::debug!(
                        client_id = %peer_id,
                        error = %e,
                        "failed to unregister client"
                    );
                }
            }

            connection.close().await;

            tracing::info!(
                connection_id = %connection_id,
                peer = %peer_addr,
                "client disconnected"
            );
        });
    }

    /// Address the server was configured to bind
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }
}

/// Reject upgrade requests outside the `/ws` endpoint
fn require_ws_path(
    request: &Request,
    response: Response,
) -> std::result::Result<Response, ErrorResponse> {
    if request.uri().path() == "/ws" {
        Ok(response)
    } else {
        let mut not_found = ErrorResponse::new(Some("not found".to_string()));
        *not_found.status_mut() = StatusCode::NOT_FOUND;
        Err(not_found)
    }
}
