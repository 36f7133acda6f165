//! Connection engine
//!
//! Wraps one WebSocket transport and runs two cooperating pumps. The
//! read pump enforces the read deadline, decodes envelopes, and hands
//! them to the router; the write pump drains the bounded send queue,
//! emits keepalive pings, and applies the per-frame write deadline.
//! Transport errors terminate the one connection and never propagate
//! to the hub.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use super::context::RequestContext;
use super::options::ConnectionOptions;
use crate::error::{Error, Result};
use crate::protocol::{Envelope, Router};

/// Frame queued for the write pump
enum Outbound {
    /// Application frame, written as text when valid UTF-8
    Frame(Bytes),
    /// Reply to a peer ping
    Pong(Vec<u8>),
    /// Keepalive probe, generated by the write pump's ticker
    Ping,
}

/// One bidirectional peer transport
///
/// Lifecycle: created, started (pumps running), closed. `close` is
/// idempotent; after it returns no further send succeeds and both
/// pumps have exited.
pub struct Connection {
    id: String,
    remote_addr: SocketAddr,
    options: ConnectionOptions,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
    peer_id: Mutex<Option<String>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Create a connection with its own cancellation scope
    pub fn new(id: String, remote_addr: SocketAddr, options: ConnectionOptions) -> Self {
        Self::with_token(id, remote_addr, options, CancellationToken::new())
    }

    /// Create a connection cancelled together with the given token
    pub fn with_token(
        id: String,
        remote_addr: SocketAddr,
        options: ConnectionOptions,
        cancel: CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(options.send_queue_capacity);

        Self {
            id,
            remote_addr,
            options,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            cancel,
            closed: AtomicBool::new(false),
            peer_id: Mutex::new(None),
            pumps: Mutex::new(Vec::new()),
        }
    }

    /// Transport-level connection id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Id this connection registered under, if any
    pub fn peer_id(&self) -> Option<String> {
        self.peer_id.lock().unwrap().clone()
    }

    /// Record the id assigned at registration
    pub fn set_peer_id(&self, peer_id: String) {
        *self.peer_id.lock().unwrap() = Some(peer_id);
    }

    /// Forget the registered id after unregistration
    pub fn clear_peer_id(&self) {
        *self.peer_id.lock().unwrap() = None;
    }

    /// Whether the connection has been closed or is closing
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the connection starts shutting down
    pub async fn wait_closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Launch the read and write pumps over the given transport
    ///
    /// Returns immediately; the pumps run until the transport fails,
    /// the peer disconnects, or [`Connection::close`] is called.
    pub fn start<S>(self: &Arc<Self>, socket: WebSocketStream<S>, router: Arc<Router>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let outbound = self
            .outbound_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Internal("connection already started".to_string()))?;

        let (sink, stream) = socket.split();

        let read = tokio::spawn(Self::read_pump(Arc::clone(self), stream, router));
        let write = tokio::spawn(Self::write_pump(Arc::clone(self), sink, outbound));
        self.pumps.lock().unwrap().extend([read, write]);

        Ok(())
    }

    /// Enqueue an outbound frame
    ///
    /// Non-blocking: fails with [`Error::ConnectionClosed`] after close
    /// and [`Error::SendQueueFull`] when the bounded queue is saturated,
    /// without waiting for the slow consumer.
    pub fn send(&self, message: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        match self.outbound_tx.try_send(Outbound::Frame(message)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::SendQueueFull),
            Err(TrySendError::Closed(_)) => Err(Error::ConnectionClosed),
        }
    }

    /// Close the connection and wait for both pumps to exit
    ///
    /// Idempotent. The write pump drains already-accepted frames and
    /// emits a close frame before the transport goes away.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(connection_id = %self.id, "closing connection");
        }
        self.cancel.cancel();

        let pumps: Vec<JoinHandle<()>> = self.pumps.lock().unwrap().drain(..).collect();
        for pump in pumps {
            let _ = pump.await;
        }
    }

    /// Begin shutdown without waiting for the pumps to exit
    ///
    /// Marks the connection closed and wakes both pumps; the write pump
    /// still drains accepted frames and emits the close frame. Used by
    /// the pumps on terminal errors and by the hub worker, which must
    /// never wait on a pump. The owning accept task joins via `close`.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    async fn read_pump<S>(
        conn: Arc<Connection>,
        mut stream: SplitStream<WebSocketStream<S>>,
        router: Arc<Router>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            let next = tokio::select! {
                _ = conn.cancel.cancelled() => break,
                next = time::timeout(conn.options.read_timeout, stream.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    tracing::warn!(
                        connection_id = %conn.id,
                        timeout_secs = conn.options.read_timeout.as_secs(),
                        "read deadline exceeded"
                    );
                    break;
                }
                Ok(None) => {
                    tracing::debug!(connection_id = %conn.id, "websocket stream ended");
                    break;
                }
                Ok(Some(Err(error))) => {
                    conn.log_read_error(&error);
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => {
                    conn.dispatch(&router, Bytes::from(text.into_bytes())).await
                }
                Message::Binary(data) => conn.dispatch(&router, Bytes::from(data)).await,
                Message::Ping(payload) => {
                    let _ = conn.outbound_tx.try_send(Outbound::Pong(payload));
                }
                // Receiving the pong already re-armed the read deadline.
                Message::Pong(_) => {}
                Message::Close(_) => {
                    tracing::debug!(connection_id = %conn.id, "close frame received");
                    break;
                }
                Message::Frame(_) => {}
            }
        }

        conn.shutdown();
        tracing::debug!(connection_id = %conn.id, "read pump stopped");
    }

    async fn write_pump<S>(
        conn: Arc<Connection>,
        mut sink: SplitSink<WebSocketStream<S>, Message>,
        mut outbound: mpsc::Receiver<Outbound>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut keepalive = time::interval(conn.options.ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await; // the first tick completes immediately

        'pump: loop {
            tokio::select! {
                _ = conn.cancel.cancelled() => {
                    // Drain frames accepted before shutdown, then say goodbye.
                    while let Ok(frame) = outbound.try_recv() {
                        if conn.write_frame(&mut sink, frame).await.is_err() {
                            break 'pump;
                        }
                    }
                    let _ = time::timeout(
                        conn.options.write_timeout,
                        sink.send(Message::Close(None)),
                    )
                    .await;
                    break 'pump;
                }
                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        let _ = time::timeout(
                            conn.options.write_timeout,
                            sink.send(Message::Close(None)),
                        )
                        .await;
                        break 'pump;
                    };
                    if conn.write_frame(&mut sink, frame).await.is_err() {
                        break 'pump;
                    }
                    // Drain queued frames to amortize flushes.
                    while let Ok(frame) = outbound.try_recv() {
                        if conn.write_frame(&mut sink, frame).await.is_err() {
                            break 'pump;
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if conn.write_frame(&mut sink, Outbound::Ping).await.is_err() {
                        break 'pump;
                    }
                }
            }
        }

        conn.shutdown();
        tracing::debug!(connection_id = %conn.id, "write pump stopped");
    }

    /// Write one frame with the per-frame deadline applied
    async fn write_frame<S>(
        &self,
        sink: &mut SplitSink<WebSocketStream<S>, Message>,
        frame: Outbound,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let message = match frame {
            Outbound::Frame(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(raw) => Message::Binary(raw.into_bytes()),
            },
            Outbound::Pong(payload) => Message::Pong(payload),
            Outbound::Ping => Message::Ping(Vec::new()),
        };

        match time::timeout(self.options.write_timeout, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => {
                tracing::error!(connection_id = %self.id, error = %error, "websocket write error");
                Err(error.into())
            }
            Err(_) => {
                tracing::error!(connection_id = %self.id, "write deadline exceeded");
                Err(Error::Timeout("write frame"))
            }
        }
    }

    /// Decode one inbound frame and run it through the router
    ///
    /// Handler errors are logged at taxonomy severity and never tear
    /// down the connection; only transport failures do that.
    async fn dispatch(self: &Arc<Self>, router: &Router, frame: Bytes) {
        let envelope = match Envelope::decode(&frame) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::info!(
                    connection_id = %self.id,
                    error = %error,
                    "dropping malformed envelope"
                );
                return;
            }
        };

        let ctx = RequestContext::new(Arc::clone(self), frame);

        match router.handle(&ctx, &envelope).await {
            Ok(Some(response)) => match response.encode() {
                Ok(bytes) => {
                    if let Err(error) = self.send(bytes) {
                        tracing::warn!(
                            connection_id = %self.id,
                            error = %error,
                            "failed to enqueue response"
                        );
                    }
                }
                Err(error) => {
                    tracing::error!(
                        connection_id = %self.id,
                        error = %error,
                        "failed to encode response"
                    );
                }
            },
            Ok(None) => {}
            Err(error) => {
                let message_type = envelope.message_type;
                let severity = error.severity();
                if severity == Level::INFO {
                    tracing::info!(
                        connection_id = %self.id,
                        message_type = %message_type,
                        error = %error,
                        "handler error"
                    );
                } else if severity == Level::WARN {
                    tracing::warn!(
                        connection_id = %self.id,
                        message_type = %message_type,
                        error = %error,
                        "handler error"
                    );
                } else {
                    tracing::error!(
                        connection_id = %self.id,
                        message_type = %message_type,
                        error = %error,
                        "handler error"
                    );
                }
            }
        }
    }

    fn log_read_error(&self, error: &WsError) {
        match error {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                tracing::debug!(connection_id = %self.id, "websocket closed")
            }
            WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                tracing::debug!(connection_id = %self.id, "peer reset without close handshake")
            }
            _ => {
                tracing::error!(connection_id = %self.id, error = %error, "websocket read error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use tokio_tungstenite::tungstenite::protocol::Role;

    use super::*;
    use crate::protocol::handler::{HandlerRegistry, MessageHandler};
    use crate::protocol::{MessageType, RegisterRequest, RegisterResponse};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000)
    }

    fn empty_router() -> Arc<Router> {
        Arc::new(Router::new(HandlerRegistry::new()))
    }

    /// Server-role websocket over an in-memory pipe plus its client end
    async fn websocket_pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let conn = Arc::new(Connection::new(
            "c1".to_string(),
            test_addr(),
            ConnectionOptions::default(),
        ));

        conn.close().await;

        let result = conn.send(Bytes::from_static(b"late"));
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let conn = Arc::new(Connection::new(
            "c1".to_string(),
            test_addr(),
            ConnectionOptions::default(),
        ));

        conn.close().await;
        conn.close().await;

        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_send_queue_full() {
        // No write pump running, so nothing drains the queue.
        let conn = Arc::new(Connection::new(
            "c1".to_string(),
            test_addr(),
            ConnectionOptions::default().send_queue_capacity(2),
        ));

        conn.send(Bytes::from_static(b"one")).unwrap();
        conn.send(Bytes::from_static(b"two")).unwrap();

        let result = conn.send(Bytes::from_static(b"three"));
        assert!(matches!(result, Err(Error::SendQueueFull)));

        // A failed offer must not corrupt the queue.
        assert!(matches!(
            conn.send(Bytes::from_static(b"four")),
            Err(Error::SendQueueFull)
        ));
    }

    #[tokio::test]
    async fn test_frames_written_in_submission_order() {
        let (server, mut client) = websocket_pair().await;

        let conn = Arc::new(Connection::new(
            "c1".to_string(),
            test_addr(),
            ConnectionOptions::default(),
        ));
        conn.start(server, empty_router()).unwrap();

        for i in 0..5 {
            conn.send(Bytes::from(format!("frame-{i}"))).unwrap();
        }

        for i in 0..5 {
            let message = client.next().await.unwrap().unwrap();
            assert_eq!(message, Message::Text(format!("frame-{i}")));
        }

        conn.close().await;
    }

    #[tokio::test]
    async fn test_close_emits_close_frame() {
        let (server, mut client) = websocket_pair().await;

        let conn = Arc::new(Connection::new(
            "c1".to_string(),
            test_addr(),
            ConnectionOptions::default(),
        ));
        conn.start(server, empty_router()).unwrap();

        conn.close().await;

        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    }

    struct EchoRegisterHandler;

    #[async_trait::async_trait]
    impl MessageHandler for EchoRegisterHandler {
        async fn handle(
            &self,
            _ctx: &RequestContext,
            envelope: &Envelope,
        ) -> crate::error::Result<Option<Envelope>> {
            let request: RegisterRequest = envelope.decode_payload()?;
            let response = Envelope::new(
                MessageType::RegisterResponse,
                &RegisterResponse {
                    client_id: request.client_id.unwrap_or_default(),
                    success: true,
                },
            )?;
            Ok(Some(response))
        }

        fn can_handle(&self, message_type: MessageType) -> bool {
            message_type == MessageType::RegisterRequest
        }
    }

    #[tokio::test]
    async fn test_inbound_envelope_routed_and_response_sent() {
        let (server, mut client) = websocket_pair().await;

        let mut registry = HandlerRegistry::new();
        registry.register(MessageType::RegisterRequest, Arc::new(EchoRegisterHandler));
        let router = Arc::new(Router::new(registry));

        let conn = Arc::new(Connection::new(
            "c1".to_string(),
            test_addr(),
            ConnectionOptions::default(),
        ));
        conn.start(server, router).unwrap();

        let request = Envelope::new(
            MessageType::RegisterRequest,
            &RegisterRequest {
                client_id: Some("alice".to_string()),
            },
        )
        .unwrap();
        client
            .send(Message::Text(
                String::from_utf8(request.encode().unwrap().to_vec()).unwrap(),
            ))
            .await
            .unwrap();

        let reply = client.next().await.unwrap().unwrap();
        let envelope = Envelope::decode(&reply.into_data()).unwrap();
        assert_eq!(envelope.message_type, MessageType::RegisterResponse);

        let response: RegisterResponse = envelope.decode_payload().unwrap();
        assert_eq!(response.client_id, "alice");
        assert!(response.success);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_malformed_envelope_does_not_kill_connection() {
        let (server, mut client) = websocket_pair().await;

        let mut registry = HandlerRegistry::new();
        registry.register(MessageType::RegisterRequest, Arc::new(EchoRegisterHandler));
        let router = Arc::new(Router::new(registry));

        let conn = Arc::new(Connection::new(
            "c1".to_string(),
            test_addr(),
            ConnectionOptions::default(),
        ));
        conn.start(server, router).unwrap();

        client
            .send(Message::Text("definitely not json".to_string()))
            .await
            .unwrap();

        // The connection survives and still serves well-formed traffic.
        let request =
            Envelope::new(MessageType::RegisterRequest, &RegisterRequest { client_id: None })
                .unwrap();
        client
            .send(Message::Text(
                String::from_utf8(request.encode().unwrap().to_vec()).unwrap(),
            ))
            .await
            .unwrap();

        let reply = client.next().await.unwrap().unwrap();
        let envelope = Envelope::decode(&reply.into_data()).unwrap();
        assert_eq!(envelope.message_type, MessageType::RegisterResponse);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_read_deadline_closes_connection() {
        let (server, _client) = websocket_pair().await;

        let conn = Arc::new(Connection::new(
            "c1".to_string(),
            test_addr(),
            ConnectionOptions::default().read_timeout(Duration::from_millis(50)),
        ));
        conn.start(server, empty_router()).unwrap();

        time::timeout(Duration::from_secs(2), conn.wait_closed())
            .await
            .expect("connection should close after the read deadline");
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (server_a, _client_a) = websocket_pair().await;
        let (server_b, _client_b) = websocket_pair().await;

        let conn = Arc::new(Connection::new(
            "c1".to_string(),
            test_addr(),
            ConnectionOptions::default(),
        ));

        conn.start(server_a, empty_router()).unwrap();
        let result = conn.start(server_b, empty_router());
        assert!(matches!(result, Err(Error::Internal(_))));

        conn.close().await;
    }
}
