//! Signaling envelopes and wire codec
//!
//! Every frame on the wire is a JSON envelope: an id for correlation, a
//! type tag, a timestamp, and an opaque payload. The payload is kept as
//! raw JSON (`Box<RawValue>`) so the relay can route and forward without
//! parsing it; only the terminal handler on the recipient side needs the
//! type-specific schema.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Message type tags recognized on the wire (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Client asks to register, optionally proposing an id
    RegisterRequest,
    /// Server's answer to a registration request
    RegisterResponse,
    /// Client asks to drop its registration
    UnregisterRequest,
    /// Server's answer to an unregister request
    UnregisterResponse,
    /// Session description relayed between peers
    Sdp,
    /// ICE candidate relayed between peers
    Candidate,
    /// Data-channel payload relayed between peers
    DataChannel,
}

impl MessageType {
    /// Wire tag for this type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::RegisterRequest => "register_request",
            MessageType::RegisterResponse => "register_response",
            MessageType::UnregisterRequest => "unregister_request",
            MessageType::UnregisterResponse => "unregister_response",
            MessageType::Sdp => "sdp",
            MessageType::Candidate => "candidate",
            MessageType::DataChannel => "data_channel",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outer wire envelope
///
/// Immutable after construction. `data` carries the type-specific
/// payload verbatim, exactly as the sender serialized it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender-chosen unique token, used for correlation
    pub id: String,

    /// Type tag selecting the handler
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// When the sender produced the envelope
    pub timestamp: DateTime<Utc>,

    /// Opaque type-specific payload
    pub data: Box<RawValue>,
}

impl Envelope {
    /// Create a new envelope wrapping the given payload
    pub fn new<P: Serialize>(message_type: MessageType, payload: &P) -> Result<Self> {
        let data = serde_json::value::to_raw_value(payload).map_err(Error::Serialization)?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            timestamp: Utc::now(),
            data,
        })
    }

    /// Encode the envelope to its wire representation
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(Error::Serialization)
    }

    /// Decode an envelope from wire bytes
    ///
    /// Fails with [`Error::MalformedEnvelope`] if the bytes are not a
    /// well-formed envelope or carry an unrecognized type tag.
    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(Error::MalformedEnvelope)
    }

    /// Parse the opaque payload into a typed message
    pub fn decode_payload<P: DeserializeOwned>(&self) -> Result<P> {
        serde_json::from_str(self.data.get()).map_err(Error::MalformedPayload)
    }
}

/// Client registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Client-proposed id; the server assigns one when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Registration response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Assigned client id
    pub client_id: String,
    /// Whether registration was accepted
    pub success: bool,
}

/// Unregistration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterRequest {
    /// Id to unregister; defaults to the sender's own registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Unregistration response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterResponse {
    /// Id the request referred to
    pub client_id: String,
    /// Whether the registration was removed
    pub success: bool,
}

/// Session description exchange message
///
/// The session description itself stays opaque; the relay reads only
/// the addressing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpMessage {
    /// Sending peer
    pub from_id: String,
    /// Addressed peer
    pub to_id: String,
    /// Opaque session description blob
    pub session_description: Box<RawValue>,
}

/// ICE candidate exchange message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidateMessage {
    /// Sending peer
    pub from_id: String,
    /// Addressed peer
    pub to_id: String,
    /// Opaque candidate blob
    pub candidate: Box<RawValue>,
}

/// Data-channel payload relayed between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChannelMessage {
    /// Sending peer
    pub from_id: String,
    /// Addressed peer
    pub to_id: String,
    /// Data-channel label
    pub label: String,
    /// Payload bytes, base64 on the wire
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = Envelope::new(
            MessageType::RegisterRequest,
            &RegisterRequest {
                client_id: Some("alice".to_string()),
            },
        )
        .unwrap();

        let bytes = envelope.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();

        assert_eq!(decoded.id, envelope.id);
        assert_eq!(decoded.message_type, envelope.message_type);
        assert_eq!(decoded.timestamp, envelope.timestamp);
        assert_eq!(decoded.data.get(), envelope.data.get());
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let raw = br#"{"id":"1","type":"teleport","timestamp":"2024-01-01T00:00:00Z","data":{}}"#;

        let result = Envelope::decode(raw);
        assert!(matches!(result, Err(Error::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Envelope::decode(b"not json at all"),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            Envelope::decode(br#"{"id":"1"}"#),
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_payload_preserved_verbatim() {
        // Unusual formatting inside `data` must survive decode + encode.
        let raw = br#"{"id":"7","type":"sdp","timestamp":"2024-01-01T00:00:00Z","data":{"from_id":"a",  "to_id":"b","session_description":{"sdp":"v=0"}}}"#;

        let envelope = Envelope::decode(raw).unwrap();
        assert_eq!(
            envelope.data.get(),
            r#"{"from_id":"a",  "to_id":"b","session_description":{"sdp":"v=0"}}"#
        );
    }

    #[test]
    fn test_decode_sdp_payload() {
        let raw = br#"{"id":"7","type":"sdp","timestamp":"2024-01-01T00:00:00Z","data":{"from_id":"alice","to_id":"bob","session_description":{"type":"offer","sdp":"v=0"}}}"#;

        let envelope = Envelope::decode(raw).unwrap();
        let sdp: SdpMessage = envelope.decode_payload().unwrap();

        assert_eq!(sdp.from_id, "alice");
        assert_eq!(sdp.to_id, "bob");
        assert_eq!(
            sdp.session_description.get(),
            r#"{"type":"offer","sdp":"v=0"}"#
        );
    }

    #[test]
    fn test_malformed_payload() {
        let envelope = Envelope::new(
            MessageType::Sdp,
            &RegisterRequest { client_id: None },
        )
        .unwrap();

        let result: Result<SdpMessage> = envelope.decode_payload();
        assert!(matches!(result, Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn test_register_request_without_id() {
        let raw = br#"{"id":"1","type":"register_request","timestamp":"2024-01-01T00:00:00Z","data":{}}"#;

        let envelope = Envelope::decode(raw).unwrap();
        let request: RegisterRequest = envelope.decode_payload().unwrap();

        assert_eq!(request.client_id, None);
    }

    #[test]
    fn test_data_channel_payload_is_base64() {
        let message = DataChannelMessage {
            from_id: "alice".to_string(),
            to_id: "bob".to_string(),
            label: "chat".to_string(),
            payload: b"hello".to_vec(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["payload"], "aGVsbG8=");

        let back: DataChannelMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_message_type_tags() {
        assert_eq!(MessageType::RegisterRequest.to_string(), "register_request");
        assert_eq!(MessageType::Sdp.to_string(), "sdp");
        assert_eq!(MessageType::Candidate.to_string(), "candidate");
        assert_eq!(MessageType::DataChannel.to_string(), "data_channel");
    }
}
