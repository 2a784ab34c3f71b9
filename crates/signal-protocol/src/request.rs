//! Client-to-router signaling requests.

use serde::{Deserialize, Serialize};

use crate::event::IceCandidateInit;

/// Parameters for joining a meeting room.
///
/// Join is the session-establishing request; unlike [`ClientRequest`] it is
/// bound to the transport handshake that sets up the client's event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub meeting_id: String,
    pub participant_id: String,
    pub display_name: String,
    pub camera_on: bool,
    pub muted: bool,
}

/// Requests a joined client can send to the signaling router.
///
/// Targeted requests (`Offer`/`Answer`/`IceCandidate`) are relayed to exactly
/// one connection; the rest are broadcast to the room, excluding the sender.
/// All routing is fire-and-forget: failed delivery is logged and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientRequest {
    /// Relay a session description offer to one peer.
    Offer {
        target_connection_id: String,
        sdp: String,
    },

    /// Relay a session description answer to one peer.
    Answer {
        target_connection_id: String,
        sdp: String,
    },

    /// Relay an ICE candidate to one peer.
    IceCandidate {
        target_connection_id: String,
        candidate: IceCandidateInit,
    },

    /// Broadcast the sender's authoritative camera/mute state.
    CameraState { camera_on: bool, muted: bool },

    /// Broadcast that the sender started screen sharing.
    StartScreenShare,

    /// Broadcast that the sender stopped screen sharing.
    StopScreenShare,

    /// Broadcast a host reassignment.
    HostUpdate { host_id: String },

    /// Broadcast a chat message.
    Chat { text: String, timestamp: i64 },

    /// Subscribe the sender to caption fan-out.
    StartCaptions { language: String },

    /// Unsubscribe the sender from caption fan-out.
    StopCaptions,

    /// Submit one encoded audio segment for transcription.
    AudioData {
        #[serde(with = "serde_bytes_b64")]
        payload: Vec<u8>,
        mime_type: String,
        language: String,
    },

    /// Leave the meeting.
    Leave,

    /// End the meeting for everyone.
    EndMeeting { reason: String },
}

impl ClientRequest {
    /// The connection id this request is targeted at, if it is a relay.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            ClientRequest::Offer {
                target_connection_id,
                ..
            }
            | ClientRequest::Answer {
                target_connection_id,
                ..
            }
            | ClientRequest::IceCandidate {
                target_connection_id,
                ..
            } => Some(target_connection_id),
            _ => None,
        }
    }
}

/// Base64 encoding for binary payloads carried inside JSON frames.
mod serde_bytes_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_requests_expose_target() {
        let offer = ClientRequest::Offer {
            target_connection_id: "c2".to_string(),
            sdp: "v=0".to_string(),
        };
        assert_eq!(offer.target(), Some("c2"));

        let state = ClientRequest::CameraState {
            camera_on: true,
            muted: false,
        };
        assert_eq!(state.target(), None);
    }

    #[test]
    fn test_request_wire_tags() {
        let json = serde_json::to_value(ClientRequest::StartScreenShare).unwrap();
        assert_eq!(json["type"], "start-screen-share");

        let json = serde_json::to_value(ClientRequest::StartCaptions {
            language: "en".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "start-captions");
        assert_eq!(json["language"], "en");
    }

    #[test]
    fn test_audio_data_payload_roundtrip() {
        let request = ClientRequest::AudioData {
            payload: vec![0x00, 0x01, 0xfe, 0xff, 0x7f],
            mime_type: "audio/wav".to_string(),
            language: "en".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        let decoded: ClientRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_audio_data_payload_is_base64_text() {
        let request = ClientRequest::AudioData {
            payload: b"RIFF".to_vec(),
            mime_type: "audio/wav".to_string(),
            language: "en".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["payload"], "UklGRg==");
    }

    #[test]
    fn test_join_request_roundtrip() {
        let join = JoinRequest {
            meeting_id: "m1".to_string(),
            participant_id: "p1".to_string(),
            display_name: "Alice".to_string(),
            camera_on: true,
            muted: false,
        };
        let json = serde_json::to_string(&join).unwrap();
        assert!(json.contains("meetingId"));
        let decoded: JoinRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, join);
    }
}
