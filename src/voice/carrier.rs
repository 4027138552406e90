//! Carrier media-stream wire schema (Twilio Media Streams).
//!
//! ## Protocol
//!
//! ```text
//! Carrier ──WebSocket──▸ Bridge
//!   connected → start → media* (mark*) → stop
//! Bridge ──WebSocket──▸ Carrier
//!   media* / clear / mark
//! ```
//!
//! Every message is a JSON text frame tagged by `event`. Audio is base64
//! μ-law 8 kHz, one 20 ms frame per inbound `media` message.

use std::collections::HashMap;

use base64::Engine;
use serde::Deserialize;

use crate::error::ProtocolError;

// ── Inbound ──────────────────────────────────────────────────────

/// A message received on the carrier leg.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CarrierEvent {
    /// Socket handshake acknowledgment; carries no call data.
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    /// Call metadata. Always precedes media.
    Start { start: StartMetadata },
    /// One inbound audio frame.
    Media { media: MediaPayload },
    /// Playback of a previously sent mark finished.
    Mark { mark: MarkPayload },
    /// The call ended.
    Stop {
        #[serde(default)]
        stop: Option<StopMetadata>,
    },
}

/// Payload of the `start` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartMetadata {
    #[serde(rename = "streamSid", default)]
    pub stream_sid: String,
    #[serde(rename = "callSid", default)]
    pub call_sid: String,
    #[serde(rename = "accountSid", default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(rename = "mediaFormat", default)]
    pub media_format: Option<MediaFormat>,
    /// Out-of-band parameters set by the call's stream instructions.
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StartMetadata {
    fn param(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|k| self.custom_parameters.get(*k))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn caller_number(&self) -> Option<String> {
        self.param(&["from", "caller", "callerNumber"])
    }

    pub fn tenant_id(&self) -> Option<String> {
        self.param(&["tenantId", "tenant_id"])
    }

    pub fn greeting(&self) -> Option<String> {
        self.param(&["greeting"])
    }

    pub fn business_name(&self) -> Option<String> {
        self.param(&["businessName", "business_name"])
    }

    pub fn custom_instructions(&self) -> Option<String> {
        self.param(&["customInstructions", "custom_instructions"])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    pub channels: u32,
}

/// Payload of the `media` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// `inbound` (caller) or `outbound`.
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    /// Milliseconds since stream start, as a decimal string.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Base64 μ-law audio.
    pub payload: String,
}

impl MediaPayload {
    pub fn decode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.payload)?)
    }

    /// Only caller audio is forwarded to the engine.
    pub fn is_inbound_track(&self) -> bool {
        self.track.as_deref().is_none_or(|t| t == "inbound")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopMetadata {
    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,
}

/// Parse one carrier text frame.
pub fn parse_carrier_message(text: &str) -> Result<CarrierEvent, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = value
        .get("event")
        .and_then(|v| v.as_str())
        .ok_or(ProtocolError::MissingField("event"))?;

    match kind {
        "connected" | "start" | "media" | "mark" | "stop" => Ok(serde_json::from_value(value)?),
        other => Err(ProtocolError::UnknownEvent(other.to_string())),
    }
}

// ── Outbound ─────────────────────────────────────────────────────

/// One outbound audio frame for the caller to hear.
pub fn media_message(stream_sid: &str, ulaw: &[u8]) -> String {
    serde_json::json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": {
            "payload": base64::engine::general_purpose::STANDARD.encode(ulaw),
        },
    })
    .to_string()
}

/// Flush audio the carrier has buffered but not yet played (barge-in).
pub fn clear_message(stream_sid: &str) -> String {
    serde_json::json!({
        "event": "clear",
        "streamSid": stream_sid,
    })
    .to_string()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = r#"{
        "event": "start",
        "sequenceNumber": "1",
        "start": {
            "accountSid": "AC123",
            "streamSid": "MZ456",
            "callSid": "CA789",
            "tracks": ["inbound"],
            "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
            "customParameters": {"from": "+15551234567", "tenantId": "tenant-a", "greeting": "  "}
        },
        "streamSid": "MZ456"
    }"#;

    #[test]
    fn parse_start_reads_ids_and_parameters() {
        let CarrierEvent::Start { start } = parse_carrier_message(START).unwrap() else {
            panic!("Expected Start");
        };
        assert_eq!(start.stream_sid, "MZ456");
        assert_eq!(start.call_sid, "CA789");
        assert_eq!(start.caller_number().as_deref(), Some("+15551234567"));
        assert_eq!(start.tenant_id().as_deref(), Some("tenant-a"));
        // Blank values count as absent.
        assert!(start.greeting().is_none());
        assert_eq!(start.media_format.unwrap().sample_rate, 8000);
    }

    #[test]
    fn start_without_parameters_has_no_tenant_or_caller() {
        let json = r#"{"event":"start","start":{"streamSid":"MZ1","callSid":"CA1"}}"#;
        let CarrierEvent::Start { start } = parse_carrier_message(json).unwrap() else {
            panic!("Expected Start");
        };
        assert!(start.tenant_id().is_none());
        assert!(start.caller_number().is_none());
    }

    #[test]
    fn alternate_parameter_keys_are_accepted() {
        let json = r#"{"event":"start","start":{"streamSid":"MZ1","callSid":"CA1",
            "customParameters":{"callerNumber":"+1444","tenant_id":"t-9","businessName":"Acme Dental"}}}"#;
        let CarrierEvent::Start { start } = parse_carrier_message(json).unwrap() else {
            panic!("Expected Start");
        };
        assert_eq!(start.caller_number().as_deref(), Some("+1444"));
        assert_eq!(start.tenant_id().as_deref(), Some("t-9"));
        assert_eq!(start.business_name().as_deref(), Some("Acme Dental"));
    }

    #[test]
    fn parse_media_decodes_payload() {
        let payload = base64::engine::general_purpose::STANDARD.encode([0xFFu8; 160]);
        let json = format!(
            r#"{{"event":"media","streamSid":"MZ1","media":{{"track":"inbound","chunk":"2","timestamp":"20","payload":"{payload}"}}}}"#
        );
        let CarrierEvent::Media { media } = parse_carrier_message(&json).unwrap() else {
            panic!("Expected Media");
        };
        assert!(media.is_inbound_track());
        assert_eq!(media.decode().unwrap(), vec![0xFF; 160]);
    }

    #[test]
    fn invalid_base64_is_a_protocol_error() {
        let json = r#"{"event":"media","media":{"payload":"!!not base64!!"}}"#;
        let CarrierEvent::Media { media } = parse_carrier_message(json).unwrap() else {
            panic!("Expected Media");
        };
        assert!(matches!(
            media.decode(),
            Err(ProtocolError::InvalidBase64(_))
        ));
    }

    #[test]
    fn parse_stop_and_mark() {
        let stop = r#"{"event":"stop","stop":{"accountSid":"AC1","callSid":"CA1"},"streamSid":"MZ1"}"#;
        assert!(matches!(
            parse_carrier_message(stop).unwrap(),
            CarrierEvent::Stop { .. }
        ));
        let mark = r#"{"event":"mark","streamSid":"MZ1","mark":{"name":"greeting"}}"#;
        assert!(matches!(
            parse_carrier_message(mark).unwrap(),
            CarrierEvent::Mark { mark } if mark.name == "greeting"
        ));
    }

    #[test]
    fn malformed_and_unknown_messages_are_rejected() {
        assert!(matches!(
            parse_carrier_message("{not json"),
            Err(ProtocolError::MalformedJson(_))
        ));
        assert!(matches!(
            parse_carrier_message(r#"{"streamSid":"MZ1"}"#),
            Err(ProtocolError::MissingField("event"))
        ));
        assert!(matches!(
            parse_carrier_message(r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#),
            Err(ProtocolError::UnknownEvent(e)) if e == "dtmf"
        ));
    }

    #[test]
    fn outbound_media_shape() {
        let msg: serde_json::Value =
            serde_json::from_str(&media_message("MZ1", &[1, 2, 3])).unwrap();
        assert_eq!(msg["event"], "media");
        assert_eq!(msg["streamSid"], "MZ1");
        assert_eq!(msg["media"]["payload"], "AQID");
    }

    #[test]
    fn outbound_clear_shape() {
        let clear: serde_json::Value = serde_json::from_str(&clear_message("MZ1")).unwrap();
        assert_eq!(clear["event"], "clear");
        assert_eq!(clear["streamSid"], "MZ1");
    }
}
