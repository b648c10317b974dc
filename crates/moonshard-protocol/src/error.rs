//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means the bytes on the wire were wrong, never
//! that the network or a store failed.

/// Errors that can occur while encoding, decoding, or validating messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into JSON).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed.
    ///
    /// Covers malformed JSON, missing fields, wrong field types, and
    /// unknown `type` tags on client messages.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message parsed but breaks a protocol rule, e.g. a sentinel
    /// with an unknown prefix or a command sent in the wrong state.
    #[error("protocol violation: {0}")]
    Violation(String),
}

impl ProtocolError {
    /// Shorthand for building a [`ProtocolError::Violation`].
    pub fn violation(reason: impl Into<String>) -> Self {
        Self::Violation(reason.into())
    }
}
