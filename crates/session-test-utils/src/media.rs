//! Fake media endpoint with an operation log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use session_core::capability::ScreenShareCapability;
use session_core::errors::SessionError;
use session_core::media::{MediaConstraints, MediaEndpoint, MediaTrack, TrackKind};
use signal_protocol::IceCandidateInit;

/// Scripted media layer. Produces deterministic SDP strings of the form
/// `offer:<label>-><connection>#<n>` and records every call in an
/// operation log for ordering assertions.
pub struct FakeMediaEndpoint {
    label: String,
    screen_capability: ScreenShareCapability,
    fail_user_media: bool,
    sdp_counter: AtomicU32,
    ops: Mutex<Vec<String>>,
    attached: Mutex<HashMap<String, Vec<MediaTrack>>>,
    applied_candidates: Mutex<HashMap<String, usize>>,
}

impl FakeMediaEndpoint {
    /// An endpoint that supports everything.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            screen_capability: ScreenShareCapability::Supported,
            fail_user_media: false,
            sdp_counter: AtomicU32::new(0),
            ops: Mutex::new(Vec::new()),
            attached: Mutex::new(HashMap::new()),
            applied_candidates: Mutex::new(HashMap::new()),
        }
    }

    /// An endpoint that cannot capture screen content.
    pub fn without_screen_share(label: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut endpoint = Self::new(label);
        endpoint.screen_capability = ScreenShareCapability::unsupported(reason);
        endpoint
    }

    /// An endpoint whose camera/microphone acquisition fails.
    pub fn denied_user_media(label: impl Into<String>) -> Self {
        let mut endpoint = Self::new(label);
        endpoint.fail_user_media = true;
        endpoint
    }

    /// Every call made against this endpoint, in order.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().expect("ops lock poisoned").clone()
    }

    /// Candidates applied toward one connection.
    pub fn applied_candidates(&self, connection_id: &str) -> usize {
        *self
            .applied_candidates
            .lock()
            .expect("candidates lock poisoned")
            .get(connection_id)
            .unwrap_or(&0)
    }

    /// Kinds of local tracks currently attached toward one connection.
    pub fn attached_kinds(&self, connection_id: &str) -> Vec<TrackKind> {
        self.attached
            .lock()
            .expect("attached lock poisoned")
            .get(connection_id)
            .map(|tracks| tracks.iter().map(|t| t.kind).collect())
            .unwrap_or_default()
    }

    fn record(&self, op: String) {
        self.ops.lock().expect("ops lock poisoned").push(op);
    }

    fn next_sdp(&self, prefix: &str, connection_id: &str) -> String {
        let n = self.sdp_counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}:{}->{connection_id}#{n}", self.label)
    }
}

#[async_trait]
impl MediaEndpoint for FakeMediaEndpoint {
    fn screen_share_capability(&self) -> ScreenShareCapability {
        self.screen_capability.clone()
    }

    async fn configure_ice(&self, servers: &[signal_protocol::IceServerEntry]) {
        self.record(format!("configure_ice:{}", servers.len()));
    }

    async fn acquire_user_media(
        &self,
        _constraints: &MediaConstraints,
    ) -> Result<Vec<MediaTrack>, SessionError> {
        self.record("acquire_user_media".to_string());
        if self.fail_user_media {
            return Err(SessionError::MediaAcquisition(
                "permission denied".to_string(),
            ));
        }
        Ok(vec![
            MediaTrack {
                id: format!("{}-mic", self.label),
                kind: TrackKind::Audio,
                label: "Fake Microphone".to_string(),
                width: None,
                height: None,
            },
            MediaTrack {
                id: format!("{}-cam", self.label),
                kind: TrackKind::Camera,
                label: "Fake Camera".to_string(),
                width: Some(1280),
                height: Some(720),
            },
        ])
    }

    async fn acquire_display_media(&self) -> Result<MediaTrack, SessionError> {
        self.record("acquire_display_media".to_string());
        self.screen_capability.require()?;
        Ok(MediaTrack {
            id: format!("{}-screen", self.label),
            kind: TrackKind::Screen,
            label: "screen:0".to_string(),
            width: Some(1920),
            height: Some(1080),
        })
    }

    async fn release_display_media(&self) {
        self.record("release_display_media".to_string());
    }

    async fn release_user_media(&self) {
        self.record("release_user_media".to_string());
    }

    async fn attach_local_tracks(
        &self,
        connection_id: &str,
        tracks: &[MediaTrack],
    ) -> Result<(), SessionError> {
        self.record(format!("attach:{connection_id}:{}", tracks.len()));
        self.attached
            .lock()
            .expect("attached lock poisoned")
            .entry(connection_id.to_string())
            .or_default()
            .extend_from_slice(tracks);
        Ok(())
    }

    async fn detach_local_track(
        &self,
        connection_id: &str,
        kind: TrackKind,
    ) -> Result<(), SessionError> {
        self.record(format!("detach:{connection_id}:{kind:?}"));
        if let Some(tracks) = self
            .attached
            .lock()
            .expect("attached lock poisoned")
            .get_mut(connection_id)
        {
            tracks.retain(|t| t.kind != kind);
        }
        Ok(())
    }

    async fn create_offer(&self, connection_id: &str) -> Result<String, SessionError> {
        self.record(format!("offer:{connection_id}"));
        Ok(self.next_sdp("offer", connection_id))
    }

    async fn create_answer(
        &self,
        connection_id: &str,
        remote_sdp: &str,
    ) -> Result<String, SessionError> {
        self.record(format!("answer:{connection_id}"));
        if !remote_sdp.starts_with("offer:") {
            return Err(SessionError::Negotiation {
                connection_id: connection_id.to_string(),
                detail: format!("remote description is not an offer: {remote_sdp}"),
            });
        }
        Ok(self.next_sdp("answer", connection_id))
    }

    async fn apply_remote_description(
        &self,
        connection_id: &str,
        _sdp: &str,
    ) -> Result<(), SessionError> {
        self.record(format!("apply:{connection_id}"));
        Ok(())
    }

    async fn apply_ice_candidate(
        &self,
        connection_id: &str,
        _candidate: &IceCandidateInit,
    ) -> Result<(), SessionError> {
        self.record(format!("candidate:{connection_id}"));
        *self
            .applied_candidates
            .lock()
            .expect("candidates lock poisoned")
            .entry(connection_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn close_peer(&self, connection_id: &str) {
        self.record(format!("close:{connection_id}"));
        self.attached
            .lock()
            .expect("attached lock poisoned")
            .remove(connection_id);
    }
}
