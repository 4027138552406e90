//! Wire-level error types shared by the carrier and engine codecs.
//!
//! Everything above the wire (external clients, controller handlers) uses
//! `anyhow::Result`; parse failures are typed so the controller can log them
//! as protocol faults and keep the session running.

use thiserror::Error;

/// A malformed or unusable message on either leg.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("message is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("audio payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("unrecognized event type `{0}`")]
    UnknownEvent(String),
}
