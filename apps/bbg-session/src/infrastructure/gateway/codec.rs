//! Frame Codecs
//!
//! Encoding and decoding of gateway frames.
//!
//! - **JSON**: text frames holding one object or an array of objects
//! - **`MessagePack`**: binary frames holding one map or an array of maps
//!   with named fields
//!
//! Inbound frames are decoded by their WebSocket frame type, so a gateway
//! may answer in either encoding whatever the configured outbound format.

use tokio_tungstenite::tungstenite::Message;

use super::messages::{Inbound, Outbound};
use crate::infrastructure::config::WireFormat;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// `MessagePack` encoding failed.
    #[error("`MessagePack` encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// `MessagePack` decoding failed.
    #[error("`MessagePack` decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON text codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame holding one frame object or an array of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON or a frame is malformed.
    pub fn decode(&self, text: &str) -> Result<Vec<Inbound>, CodecError> {
        let trimmed = text.trim();
        if trimmed.starts_with('[') {
            Ok(serde_json::from_str(trimmed)?)
        } else if trimmed.starts_with('{') {
            Ok(vec![serde_json::from_str(trimmed)?])
        } else {
            let preview: String = trimmed.chars().take(50).collect();
            Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {preview}..."
            )))
        }
    }

    /// Encode a frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, frame: &Outbound) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }
}

/// `MessagePack` binary codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Create a new `MessagePack` codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a binary frame holding one frame map or an array of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not `MessagePack` or a frame is
    /// malformed.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<Inbound>, CodecError> {
        let mut cursor = std::io::Cursor::new(data);
        let raw = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| CodecError::InvalidFormat(e.to_string()))?;

        match raw {
            rmpv::Value::Array(items) if items.is_empty() => Ok(vec![]),
            rmpv::Value::Array(_) => Ok(rmp_serde::from_slice(data)?),
            rmpv::Value::Map(_) => Ok(vec![rmp_serde::from_slice(data)?]),
            other => Err(CodecError::InvalidFormat(format!(
                "expected array or map, got {other}"
            ))),
        }
    }

    /// Encode a frame as a named-field `MessagePack` map.
    ///
    /// # Errors
    ///
    /// Returns an error if `MessagePack` serialization fails.
    pub fn encode(&self, frame: &Outbound) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(frame)?)
    }
}

/// Codec selected by the configured wire format.
#[derive(Debug, Clone, Copy)]
pub enum FrameCodec {
    /// JSON text frames.
    Json(JsonCodec),
    /// `MessagePack` binary frames.
    MsgPack(MsgPackCodec),
}

impl FrameCodec {
    /// Codec for `format`.
    #[must_use]
    pub const fn for_format(format: WireFormat) -> Self {
        match format {
            WireFormat::Json => Self::Json(JsonCodec::new()),
            WireFormat::MsgPack => Self::MsgPack(MsgPackCodec::new()),
        }
    }

    /// Encode an outbound frame as a WebSocket message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, frame: &Outbound) -> Result<Message, CodecError> {
        match self {
            Self::Json(codec) => Ok(Message::Text(codec.encode(frame)?.into())),
            Self::MsgPack(codec) => Ok(Message::Binary(codec.encode(frame)?.into())),
        }
    }

    /// Decode a WebSocket message. Control frames decode to nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if a data frame is malformed.
    pub fn decode(&self, message: &Message) -> Result<Vec<Inbound>, CodecError> {
        match message {
            Message::Text(text) => JsonCodec::new().decode(text.as_str()),
            Message::Binary(data) => MsgPackCodec::new().decode(data),
            _ => Ok(vec![]),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::event::SessionStatus;
    use crate::infrastructure::gateway::messages::SuccessKind;

    #[test]
    fn json_decode_single_and_array() {
        let codec = JsonCodec::new();
        let single = codec.decode(r#"{"T":"status","status":"up"}"#).unwrap();
        assert_eq!(
            single,
            vec![Inbound::Status {
                status: SessionStatus::Up
            }]
        );

        let many = codec
            .decode(r#"[{"T":"success","msg":"authenticated"},{"T":"response","cid":2,"data":[]}]"#)
            .unwrap();
        assert_eq!(many.len(), 2);
        assert!(matches!(
            many[0],
            Inbound::Success {
                msg: SuccessKind::Authenticated,
                ..
            }
        ));
    }

    #[test]
    fn json_decode_rejects_garbage() {
        assert!(matches!(
            JsonCodec::new().decode("hello"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(JsonCodec::new().decode("[]").unwrap().is_empty());
    }

    #[test]
    fn msgpack_decodes_named_maps() {
        let frames = vec![
            json!({ "T": "data", "cid": 9, "data": [{ "BID": 10.5 }] }),
            json!({ "T": "status", "status": "lost" }),
        ];
        let bytes = rmp_serde::to_vec_named(&frames).unwrap();

        let decoded = MsgPackCodec::new().decode(&bytes).unwrap();
        assert!(matches!(&decoded[0], Inbound::Data { cid: 9, data } if data[0]["BID"] == 10.5));
        assert_eq!(
            decoded[1],
            Inbound::Status {
                status: SessionStatus::Lost
            }
        );
    }

    #[test]
    fn msgpack_single_map_and_empty_array() {
        let bytes = rmp_serde::to_vec_named(&json!({ "T": "response", "cid": 1 })).unwrap();
        assert_eq!(MsgPackCodec::new().decode(&bytes).unwrap().len(), 1);

        let empty = rmp_serde::to_vec(&Vec::<u8>::new()).unwrap();
        assert!(MsgPackCodec::new().decode(&empty).unwrap().is_empty());
    }

    #[test]
    fn frame_codec_follows_format() {
        let frame = Outbound::OpenService {
            service: "//blp/refdata".into(),
        };
        let json = FrameCodec::for_format(WireFormat::Json).encode(&frame).unwrap();
        assert!(matches!(json, Message::Text(ref t) if t.as_str().contains("open_service")));

        let binary = FrameCodec::for_format(WireFormat::MsgPack)
            .encode(&frame)
            .unwrap();
        let Message::Binary(bytes) = binary else {
            panic!("expected binary frame");
        };
        let back: Outbound = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn control_frames_decode_to_nothing() {
        let codec = FrameCodec::for_format(WireFormat::Json);
        assert!(codec.decode(&Message::Ping(vec![].into())).unwrap().is_empty());
    }
}
