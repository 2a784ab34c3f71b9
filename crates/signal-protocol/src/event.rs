//! Server-to-client signaling events.
//!
//! Every event a client can receive from the signaling router is a variant
//! here. Type tags use kebab-case and field names use camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Announcement of a participant, as carried by presence events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAnnouncement {
    /// Stable logical identity; survives reconnects.
    pub participant_id: String,
    /// Ephemeral transport identity; a routing address, never a durable key.
    pub connection_id: String,
    /// Name shown on the participant's tile.
    pub display_name: String,
    pub camera_on: bool,
    pub muted: bool,
    pub is_screen_sharing: bool,
}

/// One ICE candidate, as exchanged during connection establishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
}

/// One STUN/TURN server entry handed to a client at join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServerEntry {
    pub urls: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerEntry {
    /// The default public STUN entry used when no configuration is supplied.
    #[must_use]
    pub fn default_stun() -> Self {
        Self {
            urls: "stun:stun.l.google.com:19302".to_string(),
            username: None,
            credential: None,
        }
    }
}

/// Events delivered by the signaling router to a client.
///
/// The `type` tag and required fields of each variant are the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SignalEvent {
    /// Full snapshot of the room, delivered to a joiner exactly once.
    /// Deduplicated by participant id and never includes the joiner.
    ExistingParticipants { participants: Vec<ParticipantAnnouncement> },

    /// A new participant entered the room.
    UserJoined { participant: ParticipantAnnouncement },

    /// A known participant re-established its transport under a new
    /// connection id. Receivers must tear down state keyed by the old id
    /// before creating state keyed by the new one.
    UserReconnected {
        participant_id: String,
        old_connection_id: String,
        new_connection_id: String,
    },

    /// A participant left the room.
    UserLeft {
        participant_id: String,
        connection_id: String,
    },

    /// A session description offer relayed from one specific peer.
    Offer {
        from_connection_id: String,
        sdp: String,
    },

    /// A session description answer relayed from one specific peer.
    Answer {
        from_connection_id: String,
        sdp: String,
    },

    /// An ICE candidate relayed from one specific peer.
    IceCandidate {
        from_connection_id: String,
        candidate: IceCandidateInit,
    },

    /// Authoritative camera/mute state broadcast by a participant.
    CameraStateChanged {
        participant_id: String,
        connection_id: String,
        camera_on: bool,
        muted: bool,
    },

    /// A participant started sharing its screen.
    StartScreenShare { connection_id: String },

    /// A participant stopped sharing its screen.
    StopScreenShare { connection_id: String },

    /// The meeting host changed. Always wins over metadata-derived hosts.
    HostUpdated { host_id: String },

    /// The meeting ended; receivers perform a full local teardown.
    MeetingEnded { reason: String },

    /// A chat message fanned out to the room.
    ChatMessage {
        sender_id: String,
        sender_name: String,
        text: String,
        timestamp: i64,
    },

    /// A caption produced by the transcription collaborator.
    CaptionUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speaker_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speaker_name: Option<String>,
        text: String,
        language: String,
    },

    /// The transcription collaborator failed for one submission.
    /// Transient; never affects media.
    CaptionError { message: String },
}

impl SignalEvent {
    /// The wire type tag for this event.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        match self {
            SignalEvent::ExistingParticipants { .. } => "existing-participants",
            SignalEvent::UserJoined { .. } => "user-joined",
            SignalEvent::UserReconnected { .. } => "user-reconnected",
            SignalEvent::UserLeft { .. } => "user-left",
            SignalEvent::Offer { .. } => "offer",
            SignalEvent::Answer { .. } => "answer",
            SignalEvent::IceCandidate { .. } => "ice-candidate",
            SignalEvent::CameraStateChanged { .. } => "camera-state-changed",
            SignalEvent::StartScreenShare { .. } => "start-screen-share",
            SignalEvent::StopScreenShare { .. } => "stop-screen-share",
            SignalEvent::HostUpdated { .. } => "host-updated",
            SignalEvent::MeetingEnded { .. } => "meeting-ended",
            SignalEvent::ChatMessage { .. } => "chat-message",
            SignalEvent::CaptionUpdate { .. } => "caption-update",
            SignalEvent::CaptionError { .. } => "caption-error",
        }
    }

    /// Validate required fields. Called at the router boundary so malformed
    /// events never reach session state.
    ///
    /// # Errors
    ///
    /// Returns the name of the first empty required field.
    pub fn validate(&self) -> Result<(), &'static str> {
        fn required(value: &str, name: &'static str) -> Result<(), &'static str> {
            if value.is_empty() {
                Err(name)
            } else {
                Ok(())
            }
        }

        match self {
            SignalEvent::ExistingParticipants { participants } => {
                for p in participants {
                    required(&p.participant_id, "participantId")?;
                    required(&p.connection_id, "connectionId")?;
                }
                Ok(())
            }
            SignalEvent::UserJoined { participant } => {
                required(&participant.participant_id, "participantId")?;
                required(&participant.connection_id, "connectionId")
            }
            SignalEvent::UserReconnected {
                participant_id,
                old_connection_id,
                new_connection_id,
            } => {
                required(participant_id, "participantId")?;
                required(old_connection_id, "oldConnectionId")?;
                required(new_connection_id, "newConnectionId")
            }
            SignalEvent::UserLeft { connection_id, .. }
            | SignalEvent::StartScreenShare { connection_id }
            | SignalEvent::StopScreenShare { connection_id } => {
                required(connection_id, "connectionId")
            }
            SignalEvent::Offer {
                from_connection_id,
                sdp,
            }
            | SignalEvent::Answer {
                from_connection_id,
                sdp,
            } => {
                required(from_connection_id, "fromConnectionId")?;
                required(sdp, "sdp")
            }
            SignalEvent::IceCandidate {
                from_connection_id,
                candidate,
            } => {
                required(from_connection_id, "fromConnectionId")?;
                required(&candidate.candidate, "candidate")
            }
            SignalEvent::CameraStateChanged {
                participant_id,
                connection_id,
                ..
            } => {
                required(participant_id, "participantId")?;
                required(connection_id, "connectionId")
            }
            SignalEvent::HostUpdated { host_id } => required(host_id, "hostId"),
            SignalEvent::ChatMessage { sender_id, text, .. } => {
                required(sender_id, "senderId")?;
                required(text, "text")
            }
            SignalEvent::CaptionUpdate { text, language, .. } => {
                required(text, "text")?;
                required(language, "language")
            }
            SignalEvent::MeetingEnded { .. } | SignalEvent::CaptionError { .. } => Ok(()),
        }
    }
}
