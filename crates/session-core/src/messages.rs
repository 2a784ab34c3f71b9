//! Message types for actor communication.
//!
//! All inter-actor communication is strongly-typed message passing over
//! `tokio::sync::mpsc`; request-reply uses `tokio::sync::oneshot`.

use tokio::sync::{mpsc, oneshot};

use crate::errors::SessionError;
use crate::media::{MediaTrack, MeetingStatus};
use crate::peer::PeerState;
use serde::Serialize;
use signal_protocol::{ClientRequest, IceServerEntry, JoinRequest, SignalEvent};

/// Local identity used when joining a meeting.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// Stable account identity; survives reconnects.
    pub participant_id: String,
    pub display_name: String,
}

/// Messages sent to the `SignalingRouterActor`.
#[derive(Debug)]
pub enum RouterMessage {
    /// A client joins a meeting room. The router replies with the assigned
    /// connection id and delivers `ExistingParticipants` on `events`
    /// exactly once.
    Join {
        request: JoinRequest,
        events: mpsc::Sender<SignalEvent>,
        respond_to: oneshot::Sender<Result<JoinAccept, SessionError>>,
    },

    /// A request from a joined client.
    Request {
        from_connection_id: String,
        request: ClientRequest,
    },

    /// A client transport dropped without an explicit leave. The member is
    /// removed silently; peers learn about it through `user-reconnected`
    /// or the next full-state snapshot.
    Disconnect { connection_id: String },

    /// A caption result came back from the transcription collaborator.
    CaptionResult {
        meeting_id: String,
        speaker_connection_id: String,
        speaker_id: String,
        speaker_name: String,
        language: String,
        result: Result<String, SessionError>,
    },

    /// Router status for health checks and tests.
    GetStatus {
        respond_to: oneshot::Sender<RouterStatus>,
    },
}

/// Result of a successful room join.
#[derive(Debug, Clone)]
pub struct JoinAccept {
    /// Connection id assigned by the router; the client's routing address.
    pub connection_id: String,
    /// STUN/TURN configuration for peer connections.
    pub ice_servers: Vec<IceServerEntry>,
    /// True when this join replaced an existing connection for the same
    /// participant.
    pub reconnected: bool,
}

/// Router status snapshot.
#[derive(Debug, Clone)]
pub struct RouterStatus {
    pub room_count: usize,
    pub connection_count: usize,
}

/// Commands sent to a `MeetingSessionActor` through its handle.
#[derive(Debug)]
pub enum SessionCommand {
    /// Current session state for UI/layout/tests.
    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },

    /// Toggle the local camera; broadcast authoritative state.
    SetCameraEnabled(bool),

    /// Toggle the local microphone; broadcast authoritative state.
    SetMuted(bool),

    /// Start screen sharing and renegotiate every peer.
    StartScreenShare {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Stop screen sharing and renegotiate every peer.
    StopScreenShare {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Send a chat message to the room.
    SendChat { text: String },

    /// Reassign the meeting host and broadcast the change.
    UpdateHost { host_id: String },

    /// Subscribe to caption fan-out and start forwarding audio.
    EnableCaptions { language: String },

    /// Unsubscribe from caption fan-out.
    DisableCaptions,

    /// Forward one encoded audio segment to the captioning path. Dropped
    /// when captions are disabled; the capture pipeline itself is stopped
    /// separately.
    SubmitAudio { payload: Vec<u8>, mime_type: String },

    /// An inbound media track arrived from the media layer. May precede
    /// the owning participant's presence event.
    RemoteTrackArrived {
        connection_id: String,
        track: MediaTrack,
    },

    /// Hand a finalized recording container to the upload collaborator.
    FinalizeRecording { container: Vec<u8> },

    /// Leave the meeting and tear down all local state.
    Leave {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// End the meeting for everyone (host action).
    EndMeeting {
        reason: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// One remote participant in a session snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub participant_id: String,
    pub connection_id: String,
    pub display_name: String,
    pub camera_on: bool,
    pub muted: bool,
    pub is_screen_sharing: bool,
    /// Inbound tracks currently attributed to this participant.
    pub track_count: usize,
}

/// One peer connection in a session snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub connection_id: String,
    pub participant_id: Option<String>,
    pub state: PeerState,
    pub initiator: bool,
    /// Completed offer/answer cycles, including the initial one.
    pub negotiation_cycles: u32,
    /// Renegotiations queued behind the in-flight cycle.
    pub pending_renegotiations: usize,
}

/// Point-in-time state of a meeting session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub meeting_id: String,
    pub local_connection_id: String,
    pub status: MeetingStatus,
    /// Resolved host participant id; `None` means the virtual placeholder
    /// host is on stage.
    pub host_id: Option<String>,
    pub participants: Vec<ParticipantSummary>,
    pub peers: Vec<PeerSummary>,
    pub camera_on: bool,
    pub muted: bool,
    pub is_screen_sharing: bool,
    /// Connection id of the remote participant currently sharing, if any.
    pub remote_screen_sharer: Option<String>,
    pub captions_enabled: bool,
    /// Caption (or transient caption-error notice) currently on screen.
    pub current_caption: Option<String>,
    pub chat_len: usize,
    /// Inbound tracks parked for connections with no participant record
    /// yet.
    pub pending_tracks: usize,
}

impl SessionSnapshot {
    /// Peers currently in the given state.
    #[must_use]
    pub fn peers_in_state(&self, state: PeerState) -> usize {
        self.peers.iter().filter(|p| p.state == state).count()
    }

    /// The peer toward the given connection id, if any.
    #[must_use]
    pub fn peer(&self, connection_id: &str) -> Option<&PeerSummary> {
        self.peers.iter().find(|p| p.connection_id == connection_id)
    }
}
