//! JSON codec for signaling frames.
//!
//! Decoding validates the closed taxonomy and the per-variant required
//! fields in one pass, so a frame that decodes is safe to route.

use crate::event::SignalEvent;
use crate::request::ClientRequest;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON or does not match any known variant.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// The frame decoded but a required field is empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Encode a signaling event to a JSON frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_event(event: &SignalEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decode and validate a signaling event from a JSON frame.
///
/// # Errors
///
/// Returns an error for unknown type tags, malformed JSON, or empty
/// required fields.
pub fn decode_event(frame: &str) -> Result<SignalEvent, ProtocolError> {
    let event: SignalEvent =
        serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    event.validate().map_err(ProtocolError::MissingField)?;
    Ok(event)
}

/// Encode a client request to a JSON frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_request(request: &ClientRequest) -> Result<String, ProtocolError> {
    serde_json::to_string(request).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decode a client request from a JSON frame.
///
/// # Errors
///
/// Returns an error for unknown type tags or malformed JSON.
pub fn decode_request(frame: &str) -> Result<ClientRequest, ProtocolError> {
    let request: ClientRequest =
        serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if let Some(target) = request.target() {
        if target.is_empty() {
            return Err(ProtocolError::MissingField("targetConnectionId"));
        }
    }
    Ok(request)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_roundtrip() {
        let event = SignalEvent::MeetingEnded {
            reason: "host ended the meeting".to_string(),
        };
        let frame = encode_event(&event).unwrap();
        let decoded = decode_event(&frame).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = decode_event(r#"{"type":"teleport","destination":"moon"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_decode_rejects_missing_required_field() {
        let frame = r#"{"type":"offer","fromConnectionId":"","sdp":"v=0"}"#;
        let err = decode_event(frame).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MissingField("fromConnectionId")
        ));
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(decode_event("not json at all").is_err());
        assert!(decode_request("{{{{").is_err());
    }

    #[test]
    fn test_request_roundtrip_and_empty_target() {
        let request = ClientRequest::Answer {
            target_connection_id: "c9".to_string(),
            sdp: "v=0".to_string(),
        };
        let frame = encode_request(&request).unwrap();
        assert_eq!(decode_request(&frame).unwrap(), request);

        let frame = r#"{"type":"answer","targetConnectionId":"","sdp":"v=0"}"#;
        let err = decode_request(frame).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MissingField("targetConnectionId")
        ));
    }
}
