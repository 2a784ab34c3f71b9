//! Media track types and collaborator seams.
//!
//! The session core does not own media capture or transport; it talks to
//! them through the traits here. Production code binds these to the
//! platform RTC stack and to the backing services; tests bind in-memory
//! fakes.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use signal_protocol::IceCandidateInit;

/// Kind of a media track within a participant's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Camera,
    Screen,
}

/// Handle to one media track (local or inbound remote).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    /// Track identifier from the media layer.
    pub id: String,
    pub kind: TrackKind,
    /// Device or content label reported by the media layer. May be empty.
    pub label: String,
    /// Frame width for video tracks, when known.
    pub width: Option<u32>,
    /// Frame height for video tracks, when known.
    pub height: Option<u32>,
}

/// Best-effort classification of a remote video track.
///
/// Remote streams carry camera and screen video without an authoritative
/// marker, so this is a heuristic over label and resolution. It is
/// advisory only: the authoritative screen-share signal is the
/// `start-screen-share` / `stop-screen-share` broadcast, and teardown
/// decisions must never depend on this classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOrigin {
    LikelyCamera,
    LikelyScreen,
}

/// Classify a remote video track as camera or screen content.
#[must_use]
pub fn classify_remote_video(track: &MediaTrack) -> TrackOrigin {
    let label = track.label.to_ascii_lowercase();
    if label.starts_with("screen") || label.starts_with("window") || label.starts_with("display") {
        return TrackOrigin::LikelyScreen;
    }
    // Screen captures tend to run at desktop resolutions; cameras rarely
    // exceed 1280 wide in this product's constraints.
    if let (Some(width), Some(height)) = (track.width, track.height) {
        if width >= 1280 && width * 9 != height * 16 && width * 3 != height * 4 {
            return TrackOrigin::LikelyScreen;
        }
    }
    TrackOrigin::LikelyCamera
}

/// Capture constraints for local media acquisition.
#[derive(Debug, Clone)]
pub struct MediaConstraints {
    pub video: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: 48_000,
        }
    }
}

/// Meeting status as tracked locally and by the metadata collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Active,
    /// Terminal; all local state is torn down.
    Ended,
}

/// Meeting metadata returned by the directory collaborator.
#[derive(Debug, Clone)]
pub struct MeetingMetadata {
    pub meeting_id: String,
    pub title: String,
    pub host_id: Option<String>,
    pub status: MeetingStatus,
}

/// Abstraction over the platform media/RTC facilities used by the peer
/// state machines. One implementation instance serves one session.
#[async_trait]
pub trait MediaEndpoint: Send + Sync {
    /// Whether this endpoint can capture screen content. Determined once
    /// at the media boundary, never re-derived ad hoc.
    fn screen_share_capability(&self) -> crate::capability::ScreenShareCapability;

    /// Hand the endpoint its STUN/TURN configuration, received at join.
    async fn configure_ice(&self, servers: &[signal_protocol::IceServerEntry]);

    /// Acquire camera and microphone tracks.
    async fn acquire_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Vec<MediaTrack>, SessionError>;

    /// Acquire a screen capture track.
    async fn acquire_display_media(&self) -> Result<MediaTrack, SessionError>;

    /// Stop and release the screen capture track, if any.
    async fn release_display_media(&self);

    /// Stop and release camera/microphone tracks.
    async fn release_user_media(&self);

    /// Attach local tracks to the connection toward `connection_id`.
    async fn attach_local_tracks(
        &self,
        connection_id: &str,
        tracks: &[MediaTrack],
    ) -> Result<(), SessionError>;

    /// Detach the local track of the given kind from one connection.
    async fn detach_local_track(
        &self,
        connection_id: &str,
        kind: TrackKind,
    ) -> Result<(), SessionError>;

    /// Create a session description offer for one connection.
    async fn create_offer(&self, connection_id: &str) -> Result<String, SessionError>;

    /// Apply a remote offer and create the answering description.
    async fn create_answer(
        &self,
        connection_id: &str,
        remote_sdp: &str,
    ) -> Result<String, SessionError>;

    /// Apply a remote description (the answer to our offer).
    async fn apply_remote_description(
        &self,
        connection_id: &str,
        sdp: &str,
    ) -> Result<(), SessionError>;

    /// Apply a relayed ICE candidate.
    async fn apply_ice_candidate(
        &self,
        connection_id: &str,
        candidate: &IceCandidateInit,
    ) -> Result<(), SessionError>;

    /// Close the connection and release everything attached to it.
    async fn close_peer(&self, connection_id: &str);
}

/// Meeting metadata service. Persistence calls are fire-and-forget
/// relative to live session state.
#[async_trait]
pub trait MeetingDirectory: Send + Sync {
    async fn get_meeting(&self, meeting_id: &str) -> Result<MeetingMetadata, SessionError>;
    async fn join_meeting(&self, meeting_id: &str, participant_id: &str)
        -> Result<(), SessionError>;
    async fn leave_meeting(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<(), SessionError>;
    async fn end_meeting(&self, meeting_id: &str) -> Result<(), SessionError>;
}

/// One audio submission for the transcription collaborator.
#[derive(Debug, Clone)]
pub struct AudioSubmission {
    pub payload: Vec<u8>,
    pub mime_type: String,
    pub language: String,
    pub speaker_id: String,
    pub speaker_name: String,
}

/// Transcription/captioning collaborator. No ordering guarantee between
/// submissions and their captions is assumed by the session core.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, submission: AudioSubmission) -> Result<String, SessionError>;
}

/// Recording upload collaborator; accepts a finalized, playable container.
#[async_trait]
pub trait RecordingSink: Send + Sync {
    async fn upload(&self, meeting_id: &str, container: Bytes) -> Result<(), SessionError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn video_track(label: &str, width: u32, height: u32) -> MediaTrack {
        MediaTrack {
            id: "t1".to_string(),
            kind: TrackKind::Camera,
            label: label.to_string(),
            width: Some(width),
            height: Some(height),
        }
    }

    #[test]
    fn test_classify_by_label() {
        let track = video_track("screen:0", 640, 480);
        assert_eq!(classify_remote_video(&track), TrackOrigin::LikelyScreen);

        let track = video_track("Window - Terminal", 640, 480);
        assert_eq!(classify_remote_video(&track), TrackOrigin::LikelyScreen);

        let track = video_track("FaceTime HD Camera", 1280, 720);
        assert_eq!(classify_remote_video(&track), TrackOrigin::LikelyCamera);
    }

    #[test]
    fn test_classify_by_resolution() {
        // Desktop-shaped resolution with no helpful label.
        let track = video_track("", 1920, 1200);
        assert_eq!(classify_remote_video(&track), TrackOrigin::LikelyScreen);

        // 16:9 at camera resolution stays camera.
        let track = video_track("", 1280, 720);
        assert_eq!(classify_remote_video(&track), TrackOrigin::LikelyCamera);

        // Unknown dimensions default to camera.
        let mut track = video_track("", 0, 0);
        track.width = None;
        track.height = None;
        assert_eq!(classify_remote_video(&track), TrackOrigin::LikelyCamera);
    }

    #[test]
    fn test_default_constraints_match_capture_profile() {
        let constraints = MediaConstraints::default();
        assert!(constraints.video);
        assert!(constraints.echo_cancellation);
        assert_eq!(constraints.sample_rate, 48_000);
    }
}
