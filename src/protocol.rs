//! Wire protocol types for IPC
//!
//! Every frame on a transport is the codec encoding of exactly one value:
//! ```text
//! client -> server:  IpcMessage          (envelope around an encoded command)
//! server -> client:  IpcCommandResponse  (omitted for one-way messages)
//! ```
//! Framing is handled by the transport layer.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Byte serializer shared by both peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// MessagePack with named fields
    #[default]
    MessagePack,
    Json,
}

impl Codec {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::MessagePack => {
                rmp_serde::to_vec_named(value).map_err(|e| Error::Serialization(e.to_string()))
            }
            Codec::Json => {
                serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
            }
            Codec::Json => {
                serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
            }
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "msgpack" | "messagepack" => Ok(Codec::MessagePack),
            "json" => Ok(Codec::Json),
            other => Err(Error::Config(format!("unknown codec: {other}"))),
        }
    }
}

/// Envelope around one encoded command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcMessage {
    /// Registry hash identifying the command type
    pub type_hash: String,
    /// Whether the caller wants the handler's result back
    pub requires_response: bool,
    /// Codec-encoded command
    pub payload: Vec<u8>,
    /// Optional addressee, passed through to the handler
    #[serde(default)]
    pub target_id: Option<String>,
    /// Correlation id for logs and diagnostics
    pub message_id: String,
    /// The server writes no response frame at all
    #[serde(default)]
    pub one_way: bool,
}

impl IpcMessage {
    /// Create a new message with an auto-generated id
    pub fn new(type_hash: impl Into<String>, payload: Vec<u8>, requires_response: bool) -> Self {
        Self {
            type_hash: type_hash.into(),
            requires_response,
            payload,
            target_id: None,
            message_id: Uuid::new_v4().to_string(),
            one_way: false,
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// Mark the message as one-way: no response frame is written
    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self.requires_response = false;
        self
    }
}

/// Outcome of one processed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcCommandResponse {
    /// Message id of the command this answers; empty if the envelope was unreadable
    pub command_id: String,
    pub success: bool,
    /// Human-readable failure description
    #[serde(default)]
    pub message: Option<String>,
    /// Codec-encoded handler result
    #[serde(default)]
    pub data: Option<Vec<u8>>,
}

impl IpcCommandResponse {
    /// Create a success response
    pub fn success(command_id: impl Into<String>, data: Option<Vec<u8>>) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            message: None,
            data,
        }
    }

    /// Create an error response
    pub fn failure(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Decode the handler result carried in `data`
    pub fn decode_data<T: DeserializeOwned>(&self, codec: Codec) -> Result<T> {
        match &self.data {
            Some(bytes) => codec.decode(bytes),
            None => Err(Error::Deserialization(format!(
                "response {} carries no data",
                self.command_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Search {
        query: String,
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = IpcMessage::new("h", vec![], true);
        let b = IpcMessage::new("h", vec![], true);
        assert_ne!(a.message_id, b.message_id);
        assert!(a.target_id.is_none());
        assert!(!a.one_way);
    }

    #[test]
    fn test_one_way_clears_requires_response() {
        let msg = IpcMessage::new("h", vec![], true).with_target("worker-1").one_way();
        assert!(msg.one_way);
        assert!(!msg.requires_response);
        assert_eq!(msg.target_id.as_deref(), Some("worker-1"));
    }

    #[test]
    fn test_envelope_survives_both_codecs() {
        for codec in [Codec::MessagePack, Codec::Json] {
            let payload = codec
                .encode(&Search {
                    query: "rust".into(),
                })
                .unwrap();
            let msg = IpcMessage::new("abc", payload, true);
            let decoded: IpcMessage = codec.decode(&codec.encode(&msg).unwrap()).unwrap();
            assert_eq!(decoded, msg);

            let inner: Search = codec.decode(&decoded.payload).unwrap();
            assert_eq!(inner.query, "rust");
        }
    }

    #[test]
    fn test_older_envelope_without_optional_fields() {
        let json = br#"{"type_hash":"abc","requires_response":true,"payload":[],"message_id":"1"}"#;
        let msg: IpcMessage = Codec::Json.decode(json).unwrap();
        assert!(!msg.one_way);
        assert!(msg.target_id.is_none());
    }

    #[test]
    fn test_decode_garbage_is_deserialization_error() {
        let result: Result<IpcMessage> = Codec::MessagePack.decode(&[0xc1, 0x00, 0xff]);
        assert!(matches!(result, Err(Error::Deserialization(_))));
    }

    #[test]
    fn test_failure_response_has_no_data() {
        let resp = IpcCommandResponse::failure("42", "something went wrong");
        assert!(!resp.success);
        assert_eq!(resp.message.as_deref(), Some("something went wrong"));
        let data: Result<String> = resp.decode_data(Codec::MessagePack);
        assert!(matches!(data, Err(Error::Deserialization(_))));
    }

    #[test]
    fn test_codec_from_str() {
        assert_eq!("msgpack".parse::<Codec>().unwrap(), Codec::MessagePack);
        assert_eq!("JSON".parse::<Codec>().unwrap(), Codec::Json);
        assert!("xml".parse::<Codec>().is_err());
    }
}
