//! Signaling handlers
//!
//! Four shapes of work: registration binds a peer id to the sender's
//! connection, unregistration releases it, and the three relay handlers
//! (SDP, ICE candidate, data channel) decode just enough of the payload
//! to read the target id, then forward the sender's raw frame through
//! the hub. Forwarding is verbatim: the recipient sees the original
//! envelope bytes, never a re-encoding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;
use tracing::{debug, warn};
use uuid::Uuid;

use super::client::PeerClient;
use crate::connection::RequestContext;
use crate::error::Result;
use crate::hub::Hub;
use crate::protocol::{
    DataChannelMessage, Envelope, IceCandidateMessage, MessageHandler, MessageType,
    RegisterRequest, RegisterResponse, SdpMessage, UnregisterRequest, UnregisterResponse,
};

/// How long registration waits for the hub worker's verdict
const REGISTER_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles `register_request`
pub struct RegisterHandler {
    hub: Arc<Hub>,
}

impl RegisterHandler {
    /// Create a register handler bound to the hub
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    fn respond(client_id: String, success: bool) -> Result<Option<Envelope>> {
        let response = Envelope::new(
            MessageType::RegisterResponse,
            &RegisterResponse { client_id, success },
        )?;
        Ok(Some(response))
    }
}

#[async_trait]
impl MessageHandler for RegisterHandler {
    async fn handle(&self, ctx: &RequestContext, envelope: &Envelope) -> Result<Option<Envelope>> {
        let request: RegisterRequest = envelope.decode_payload()?;
        let connection = ctx.connection();

        if let Some(existing) = connection.peer_id() {
            warn!(
                connection_id = %ctx.connection_id(),
                client_id = %existing,
                "connection is already registered"
            );
            return Self::respond(existing, false);
        }

        let client_id = request
            .client_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Fast-path rejection for ids already visible in the registry.
        if self.hub.get_client(&client_id).is_some() {
            warn!(client_id = %client_id, "proposed id already registered, rejecting");
            return Self::respond(client_id, false);
        }

        let client = Arc::new(PeerClient::new(client_id.clone(), Arc::clone(connection)));
        let ack = match self.hub.register(client) {
            Ok(ack) => ack,
            Err(error) => {
                warn!(client_id = %client_id, error = %error, "hub rejected registration");
                return Self::respond(client_id, false);
            }
        };

        // Only the worker knows whether a racing registration took the
        // id between the pre-check and the queue drain; succeed only on
        // its verdict.
        let accepted = match time::timeout(REGISTER_ACK_TIMEOUT, ack).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(_)) => {
                warn!(client_id = %client_id, "hub dropped the registration request");
                false
            }
            Err(_) => {
                warn!(client_id = %client_id, "timed out waiting for registration verdict");
                false
            }
        };

        if !accepted {
            warn!(client_id = %client_id, "registration lost to an existing client");
            return Self::respond(client_id, false);
        }

        connection.set_peer_id(client_id.clone());
        debug!(
            connection_id = %ctx.connection_id(),
            client_id = %client_id,
            "registration accepted"
        );

        Self::respond(client_id, true)
    }

    fn can_handle(&self, message_type: MessageType) -> bool {
        message_type == MessageType::RegisterRequest
    }
}

/// Handles `unregister_request`
pub struct UnregisterHandler {
    hub: Arc<Hub>,
}

impl UnregisterHandler {
    /// Create an unregister handler bound to the hub
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    fn respond(client_id: String, success: bool) -> Result<Option<Envelope>> {
        let response = Envelope::new(
            MessageType::UnregisterResponse,
            &UnregisterResponse { client_id, success },
        )?;
        Ok(Some(response))
    }
}

#[async_trait]
impl MessageHandler for UnregisterHandler {
    async fn handle(&self, ctx: &RequestContext, envelope: &Envelope) -> Result<Option<Envelope>> {
        let request: UnregisterRequest = envelope.decode_payload()?;
        let connection = ctx.connection();

        let Some(registered) = connection.peer_id() else {
            warn!(
                connection_id = %ctx.connection_id(),
                "unregister from an unregistered connection"
            );
            return Self::respond(request.client_id.unwrap_or_default(), false);
        };

        // A peer may only release its own registration.
        if let Some(requested) = &request.client_id {
            if *requested != registered {
                warn!(
                    connection_id = %ctx.connection_id(),
                    requested = %requested,
                    registered = %registered,
                    "refusing to unregister another peer"
                );
                return Self::respond(requested.clone(), false);
            }
        }

        if let Err(error) = self.hub.unregister(registered.clone()) {
            warn!(client_id = %registered, error = %error, "hub rejected unregistration");
            return Self::respond(registered, false);
        }

        connection.clear_peer_id();
        debug!(
            connection_id = %ctx.connection_id(),
            client_id = %registered,
            "unregistration accepted"
        );

        Self::respond(registered, true)
    }

    fn can_handle(&self, message_type: MessageType) -> bool {
        message_type == MessageType::UnregisterRequest
    }
}

/// Handles `sdp`: forwards session descriptions to the addressed peer
pub struct SdpHandler {
    hub: Arc<Hub>,
}

impl SdpHandler {
    /// Create an SDP relay handler bound to the hub
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MessageHandler for SdpHandler {
    async fn handle(&self, ctx: &RequestContext, envelope: &Envelope) -> Result<Option<Envelope>> {
        let message: SdpMessage = envelope.decode_payload()?;

        self.hub.send_to(&message.to_id, ctx.frame().clone())?;

        debug!(
            from_id = %message.from_id,
            to_id = %message.to_id,
            "sdp forwarded"
        );

        Ok(None)
    }

    fn can_handle(&self, message_type: MessageType) -> bool {
        message_type == MessageType::Sdp
    }
}

/// Handles `candidate`: forwards ICE candidates to the addressed peer
pub struct IceCandidateHandler {
    hub: Arc<Hub>,
}

impl IceCandidateHandler {
    /// Create an ICE candidate relay handler bound to the hub
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MessageHandler for IceCandidateHandler {
    async fn handle(&self, ctx: &RequestContext, envelope: &Envelope) -> Result<Option<Envelope>> {
        let message: IceCandidateMessage = envelope.decode_payload()?;

        self.hub.send_to(&message.to_id, ctx.frame().clone())?;

        debug!(
            from_id = %message.from_id,
            to_id = %message.to_id,
            "ice candidate forwarded"
        );

        Ok(None)
    }

    fn can_handle(&self, message_type: MessageType) -> bool {
        message_type == MessageType::Candidate
    }
}

/// Handles `data_channel`: forwards data-channel payloads to the addressed peer
pub struct DataChannelHandler {
    hub: Arc<Hub>,
}

impl DataChannelHandler {
    /// Create a data-channel relay handler bound to the hub
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MessageHandler for DataChannelHandler {
    async fn handle(&self, ctx: &RequestContext, envelope: &Envelope) -> Result<Option<Envelope>> {
        let message: DataChannelMessage = envelope.decode_payload()?;

        self.hub.send_to(&message.to_id, ctx.frame().clone())?;

        debug!(
            from_id = %message.from_id,
            to_id = %message.to_id,
            label = %message.label,
            size = message.payload.len(),
            "data channel message forwarded"
        );

        Ok(None)
    }

    fn can_handle(&self, message_type: MessageType) -> bool {
        message_type == MessageType::DataChannel
    }
}
