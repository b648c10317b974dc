//! Codec trait and the JSON implementation.
//!
//! Control traffic in Moonshard always rides in text frames, so a codec
//! here maps between Rust values and `String`s rather than raw bytes.
//! File payloads never pass through a codec; they stay in binary frames.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust values to text and decode them back.
///
/// `Send + Sync + 'static` so a single codec value can live in shared
/// shard state and be used from any connection task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a text frame payload.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes a text frame payload.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the text is malformed or does not
    /// match the expected type.
    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ```rust
/// use moonshard_protocol::{ClientMessage, Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let msg: ClientMessage = codec.decode(r#"{"type":"list_online"}"#).unwrap();
/// assert_eq!(msg, ClientMessage::ListOnline);
/// assert_eq!(codec.encode(&msg).unwrap(), r#"{"type":"list_online"}"#);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}
