//! Signaling client
//!
//! Library-side counterpart of the relay: dials the `/ws` endpoint,
//! registers under a stable id, and exchanges SDP / ICE candidate /
//! data-channel envelopes with other peers through the relay. Inbound
//! envelopes are dispatched to callbacks registered per message type.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::{
    DataChannelMessage, Envelope, IceCandidateMessage, MessageType, RegisterRequest,
    RegisterResponse, SdpMessage, UnregisterRequest,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type MessageCallback = Box<dyn Fn(Envelope) + Send + Sync>;

/// Client for a signaling relay
pub struct SignalClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    writer: tokio::sync::Mutex<SplitSink<Socket, Message>>,
    client_id: Mutex<Option<String>>,
    registered: watch::Sender<bool>,
    callbacks: Mutex<HashMap<MessageType, MessageCallback>>,
    cancel: CancellationToken,
}

impl SignalClient {
    /// Dial the relay's `/ws` endpoint
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::debug!(url = %url, "connecting to signaling server");

        let (socket, _) = connect_async(url).await?;
        let (writer, reader) = socket.split();
        let (registered, _) = watch::channel(false);

        let inner = Arc::new(ClientInner {
            writer: tokio::sync::Mutex::new(writer),
            client_id: Mutex::new(None),
            registered,
            callbacks: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(ClientInner::read_loop(Arc::clone(&inner), reader));

        tracing::info!(url = %url, "connected to signaling server");
        Ok(Self { inner })
    }

    /// Request registration, optionally proposing an id
    pub async fn register(&self, client_id: Option<String>) -> Result<()> {
        let envelope = Envelope::new(MessageType::RegisterRequest, &RegisterRequest { client_id })?;
        self.send_envelope(&envelope).await
    }

    /// Request release of the current registration
    pub async fn unregister(&self) -> Result<()> {
        let envelope =
            Envelope::new(MessageType::UnregisterRequest, &UnregisterRequest { client_id: None })?;
        self.send_envelope(&envelope).await
    }

    /// Wait until the relay confirms the registration
    pub async fn wait_for_registration(&self, deadline: Duration) -> Result<String> {
        let mut registered = self.inner.registered.subscribe();

        timeout(deadline, registered.wait_for(|confirmed| *confirmed))
            .await
            .map_err(|_| Error::Timeout("registration"))?
            .map_err(|_| Error::ConnectionClosed)?;

        self.id().ok_or(Error::NotRegistered)
    }

    /// Id assigned by the relay, once registered
    pub fn id(&self) -> Option<String> {
        self.inner.client_id.lock().unwrap().clone()
    }

    /// Whether registration has been confirmed
    pub fn is_registered(&self) -> bool {
        *self.inner.registered.borrow()
    }

    /// Register a callback for one message type
    pub fn on_message<F>(&self, message_type: MessageType, callback: F)
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .insert(message_type, Box::new(callback));
    }

    /// Send a session description to another peer
    pub async fn send_sdp<P: Serialize>(&self, to_id: &str, session_description: &P) -> Result<()> {
        let message = SdpMessage {
            from_id: self.id().ok_or(Error::NotRegistered)?,
            to_id: to_id.to_string(),
            session_description: serde_json::value::to_raw_value(session_description)
                .map_err(Error::Serialization)?,
        };

        let envelope = Envelope::new(MessageType::Sdp, &message)?;
        self.send_envelope(&envelope).await
    }

    /// Send an ICE candidate to another peer
    pub async fn send_candidate<P: Serialize>(&self, to_id: &str, candidate: &P) -> Result<()> {
        let message = IceCandidateMessage {
            from_id: self.id().ok_or(Error::NotRegistered)?,
            to_id: to_id.to_string(),
            candidate: serde_json::value::to_raw_value(candidate).map_err(Error::Serialization)?,
        };

        let envelope = Envelope::new(MessageType::Candidate, &message)?;
        self.send_envelope(&envelope).await
    }

    /// Send a data-channel payload to another peer
    pub async fn send_data_channel(&self, to_id: &str, label: &str, payload: &[u8]) -> Result<()> {
        let message = DataChannelMessage {
            from_id: self.id().ok_or(Error::NotRegistered)?,
            to_id: to_id.to_string(),
            label: label.to_string(),
            payload: payload.to_vec(),
        };

        let envelope = Envelope::new(MessageType::DataChannel, &message)?;
        self.send_envelope(&envelope).await
    }

    /// Send a pre-built envelope
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }

        let bytes = envelope.encode()?;
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Internal("encoded envelope is not UTF-8".to_string()))?;

        let mut writer = self.inner.writer.lock().await;
        writer.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Close the connection to the relay
    pub async fn close(&self) {
        self.inner.cancel.cancel();

        let mut writer = self.inner.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
    }
}

impl ClientInner {
    async fn read_loop(inner: Arc<ClientInner>, mut reader: SplitStream<Socket>) {
        loop {
            let message = tokio::select! {
                _ = inner.cancel.cancelled() => break,
                message = reader.next() => message,
            };

            match message {
                None => break,
                Some(Err(error)) => {
                    tracing::debug!(error = %error, "signaling read error");
                    break;
                }
                Some(Ok(Message::Text(text))) => inner.handle_frame(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => inner.handle_frame(&data),
                Some(Ok(Message::Ping(payload))) => {
                    let mut writer = inner.writer.lock().await;
                    let _ = writer.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }

        inner.cancel.cancel();
        tracing::debug!("signaling client read loop stopped");
    }

    fn handle_frame(&self, data: &[u8]) {
        let envelope = match Envelope::decode(data) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(error = %error, "dropping malformed envelope from server");
                return;
            }
        };

        // The first successful register_response completes registration;
        // everything else goes to the per-type callbacks.
        if envelope.message_type == MessageType::RegisterResponse && !*self.registered.borrow() {
            match envelope.decode_payload::<RegisterResponse>() {
                Ok(response) if response.success => {
                    *self.client_id.lock().unwrap() = Some(response.client_id.clone());
                    self.registered.send_replace(true);
                    tracing::info!(client_id = %response.client_id, "registered with server");
                }
                Ok(_) => tracing::warn!("registration rejected by server"),
                Err(error) => tracing::warn!(error = %error, "malformed register response"),
            }
            return;
        }

        let callbacks = self.callbacks.lock().unwrap();
        match callbacks.get(&envelope.message_type) {
            Some(callback) => callback(envelope),
            None => tracing::debug!(
                message_type = %envelope.message_type,
                "no callback for message type"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::Config;
    use crate::hub::Hub;
    use crate::server::SignalServer;

    async fn start_relay() -> (Arc<Hub>, String) {
        let hub = Arc::new(Hub::new());
        hub.start().unwrap();

        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        let server = Arc::new(SignalServer::new(&config, Arc::clone(&hub)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        (hub, format!("ws://{addr}/ws"))
    }

    #[tokio::test]
    async fn test_register_and_exchange_data_channel() {
        let (hub, url) = start_relay().await;

        let alice = SignalClient::connect(&url).await.unwrap();
        let bob = SignalClient::connect(&url).await.unwrap();

        alice.register(Some("alice".to_string())).await.unwrap();
        bob.register(Some("bob".to_string())).await.unwrap();

        assert_eq!(
            alice
                .wait_for_registration(Duration::from_secs(2))
                .await
                .unwrap(),
            "alice"
        );
        assert_eq!(
            bob.wait_for_registration(Duration::from_secs(2))
                .await
                .unwrap(),
            "bob"
        );

        let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();
        bob.on_message(MessageType::DataChannel, move |envelope| {
            let message: DataChannelMessage = envelope.decode_payload().unwrap();
            let _ = delivered_tx.send(message);
        });

        alice
            .send_data_channel("bob", "chat", b"hello bob")
            .await
            .unwrap();

        let message = timeout(Duration::from_secs(2), delivered_rx.recv())
            .await
            .expect("timed out waiting for relay")
            .expect("callback channel closed");

        assert_eq!(message.from_id, "alice");
        assert_eq!(message.to_id, "bob");
        assert_eq!(message.label, "chat");
        assert_eq!(message.payload, b"hello bob");

        alice.close().await;
        bob.close().await;
        hub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_before_registration_fails() {
        let (hub, url) = start_relay().await;

        let client = SignalClient::connect(&url).await.unwrap();
        let result = client.send_sdp("bob", &serde_json::json!({"sdp": "v=0"})).await;
        assert!(matches!(result, Err(Error::NotRegistered)));

        client.close().await;
        hub.stop().await.unwrap();
    }
}
