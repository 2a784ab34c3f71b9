//! Session error types.
//!
//! Errors carry a severity that encodes how far they propagate: fatal
//! errors tear the whole session down, peer-isolated errors degrade one
//! tile, transient errors are shown briefly and self-clear.

use thiserror::Error;

/// How an error propagates through a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Tears down the whole session; recovery is a fresh join.
    Fatal,
    /// Isolated to one peer connection; the rest of the mesh is unaffected.
    PeerIsolated,
    /// Shown transiently and self-clearing; never affects media.
    Transient,
}

/// Session error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The signaling channel was lost. All peer connections and registry
    /// entries are torn down; partial repair is not attempted.
    #[error("Signaling transport lost: {0}")]
    Transport(String),

    /// Camera or microphone acquisition failed. Fatal to joining and
    /// surfaced before any signaling join is attempted.
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Offer/answer/ICE negotiation failed for one peer.
    #[error("Negotiation failed for peer {connection_id}: {detail}")]
    Negotiation {
        connection_id: String,
        detail: String,
    },

    /// Two offer/answer cycles raced on the same peer. The connection is
    /// closed and rebuilt rather than patched.
    #[error("Renegotiation race detected for peer {connection_id}")]
    RenegotiationRace { connection_id: String },

    /// Screen sharing is not available on this endpoint.
    #[error("Screen share unsupported: {0}")]
    ScreenShareUnsupported(String),

    /// The transcription collaborator failed for one submission.
    #[error("Captioning error: {0}")]
    Captioning(String),

    /// The meeting metadata collaborator failed.
    #[error("Meeting directory error: {0}")]
    Directory(String),

    /// Referenced participant is not in the registry.
    #[error("Participant not found")]
    ParticipantNotFound,

    /// The meeting has already ended.
    #[error("Meeting has ended")]
    MeetingEnded,

    /// Internal error (channel failures and other bugs).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// How far this error propagates.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            SessionError::Transport(_)
            | SessionError::MediaAcquisition(_)
            | SessionError::MeetingEnded
            | SessionError::Internal(_) => Severity::Fatal,
            SessionError::Negotiation { .. } | SessionError::RenegotiationRace { .. } => {
                Severity::PeerIsolated
            }
            SessionError::ScreenShareUnsupported(_)
            | SessionError::Captioning(_)
            | SessionError::Directory(_)
            | SessionError::ParticipantNotFound => Severity::Transient,
        }
    }

    /// A user-facing message with no internal detail.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Transport(_) => {
                "Connection to the meeting was lost. Please rejoin.".to_string()
            }
            SessionError::MediaAcquisition(_) => {
                "Could not access camera or microphone. Please check permissions.".to_string()
            }
            SessionError::Negotiation { .. } | SessionError::RenegotiationRace { .. } => {
                "A participant's video could not be connected.".to_string()
            }
            SessionError::ScreenShareUnsupported(reason) => {
                format!("Screen sharing is not supported here: {reason}")
            }
            SessionError::Captioning(_) => "Transcription unavailable".to_string(),
            SessionError::Directory(_) => "Meeting details are unavailable.".to_string(),
            SessionError::ParticipantNotFound => "Participant not found".to_string(),
            SessionError::MeetingEnded => "The meeting has ended.".to_string(),
            SessionError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(
            SessionError::Transport("ws closed".to_string()).severity(),
            Severity::Fatal
        );
        assert_eq!(
            SessionError::MediaAcquisition("denied".to_string()).severity(),
            Severity::Fatal
        );
        assert_eq!(
            SessionError::Negotiation {
                connection_id: "c1".to_string(),
                detail: "ice failed".to_string(),
            }
            .severity(),
            Severity::PeerIsolated
        );
        assert_eq!(
            SessionError::RenegotiationRace {
                connection_id: "c1".to_string(),
            }
            .severity(),
            Severity::PeerIsolated
        );
        assert_eq!(
            SessionError::Captioning("whisper 500".to_string()).severity(),
            Severity::Transient
        );
    }

    #[test]
    fn test_user_messages_hide_internal_details() {
        let err = SessionError::Transport("ws://10.0.0.5:5000 refused".to_string());
        assert!(!err.user_message().contains("10.0.0.5"));

        let err = SessionError::Internal("mpsc closed at peer.rs:120".to_string());
        assert_eq!(err.user_message(), "An internal error occurred");
    }

    #[test]
    fn test_display_formatting() {
        let err = SessionError::Negotiation {
            connection_id: "c7".to_string(),
            detail: "description mismatch".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "Negotiation failed for peer c7: description mismatch"
        );
    }
}
