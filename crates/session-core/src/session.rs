//! `MeetingSessionActor` - owns all live state for one joined meeting.
//!
//! One actor exists per meeting join, constructed by [`MeetingSessionActor::join`]
//! and destroyed on leave, meeting end, or transport loss. It is the only
//! writer of session state: the registry, the peer connection map, and the
//! host resolution all live here and are read by everyone else through
//! snapshots.
//!
//! # Lifecycle
//!
//! 1. Acquire local media. Failure is fatal and surfaced before any
//!    signaling join is attempted.
//! 2. Fetch meeting metadata (host derivation; non-fatal if unavailable).
//! 3. Join the room through the signaling router.
//! 4. Run the event loop until leave, meeting end, cancellation, or
//!    transport loss.
//! 5. Teardown: close every peer connection and release local media
//!    before the session object is discarded.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::capability::ScreenShareCapability;
use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::host::HostResolver;
use crate::media::{
    classify_remote_video, MediaConstraints, MediaEndpoint, MediaTrack, MeetingDirectory,
    MeetingStatus, RecordingSink, TrackKind, TrackOrigin,
};
use crate::messages::{LocalIdentity, PeerSummary, SessionCommand, SessionSnapshot};
use crate::metrics::{ActorType, MailboxMonitor, SessionMetrics};
use crate::peer::{NegotiationReason, PeerConnection};
use crate::registry::SessionRegistry;
use crate::router::SignalingRouterHandle;
use signal_protocol::{ClientRequest, JoinRequest, ParticipantAnnouncement, SignalEvent};

/// Most recent chat messages kept locally.
const CHAT_BACKLOG: usize = 200;

/// One chat message as kept locally.
#[derive(Debug, Clone)]
pub struct ChatEntry {
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp: i64,
}

/// Everything needed to join a meeting.
pub struct SessionParams {
    pub config: SessionConfig,
    pub meeting_id: String,
    pub identity: LocalIdentity,
    pub router: SignalingRouterHandle,
    pub endpoint: Arc<dyn MediaEndpoint>,
    pub directory: Arc<dyn MeetingDirectory>,
    pub recordings: Arc<dyn RecordingSink>,
    pub cancel_token: CancellationToken,
}

/// Handle to a `MeetingSessionActor`.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    cancel_token: CancellationToken,
    meeting_id: String,
    connection_id: String,
}

impl SessionHandle {
    /// The meeting this session belongs to.
    #[must_use]
    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    /// The connection id the router assigned to this client.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Current session state.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionCommand::Snapshot { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Internal(format!("session reply lost: {e}")))
    }

    /// Toggle the local camera and broadcast the new state.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::SetCameraEnabled(enabled))
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))
    }

    /// Toggle the local microphone and broadcast the new state.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::SetMuted(muted))
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))
    }

    /// Start screen sharing; renegotiates every peer connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ScreenShareUnsupported`] on endpoints
    /// without capture support, or a media error.
    pub async fn start_screen_share(&self) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionCommand::StartScreenShare { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Internal(format!("session reply lost: {e}")))?
    }

    /// Stop screen sharing; renegotiates every peer connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn stop_screen_share(&self) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionCommand::StopScreenShare { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Internal(format!("session reply lost: {e}")))?
    }

    /// Send a chat message to the room.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::SendChat { text: text.into() })
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))
    }

    /// Reassign the meeting host and broadcast the change to the room.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn update_host(&self, host_id: impl Into<String>) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::UpdateHost {
                host_id: host_id.into(),
            })
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))
    }

    /// Enable captions: subscribe to fan-out and start forwarding audio.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn enable_captions(&self, language: impl Into<String>) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::EnableCaptions {
                language: language.into(),
            })
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))
    }

    /// Disable captions.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn disable_captions(&self) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::DisableCaptions)
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))
    }

    /// Forward one encoded audio segment toward the captioning path.
    /// Dropped silently when captions are disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn submit_audio(
        &self,
        payload: Vec<u8>,
        mime_type: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::SubmitAudio {
                payload,
                mime_type: mime_type.into(),
            })
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))
    }

    /// Report an inbound media track from the media layer. Tracks that
    /// arrive before their participant's presence event are parked and
    /// folded in when the record appears.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn register_remote_track(
        &self,
        connection_id: impl Into<String>,
        track: MediaTrack,
    ) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::RemoteTrackArrived {
                connection_id: connection_id.into(),
                track,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))
    }

    /// Hand a finalized recording container to the upload collaborator.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn finalize_recording(&self, container: Vec<u8>) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::FinalizeRecording { container })
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))
    }

    /// Leave the meeting and tear down all local state.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn leave(&self) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionCommand::Leave { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Internal(format!("session reply lost: {e}")))?
    }

    /// End the meeting for everyone (host action).
    ///
    /// # Errors
    ///
    /// Returns an error if the session has already shut down.
    pub async fn end_meeting(&self, reason: impl Into<String>) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionCommand::EndMeeting {
                reason: reason.into(),
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("session gone: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Internal(format!("session reply lost: {e}")))?
    }

    /// Cancel the session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the session is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `MeetingSessionActor` implementation.
pub struct MeetingSessionActor {
    meeting_id: String,
    identity: LocalIdentity,
    connection_id: String,
    config: SessionConfig,
    router: SignalingRouterHandle,
    endpoint: Arc<dyn MediaEndpoint>,
    directory: Arc<dyn MeetingDirectory>,
    recordings: Arc<dyn RecordingSink>,
    registry: SessionRegistry,
    peers: HashMap<String, PeerConnection>,
    host: HostResolver,
    status: MeetingStatus,
    local_tracks: Vec<MediaTrack>,
    screen_track: Option<MediaTrack>,
    screen_capability: ScreenShareCapability,
    camera_on: bool,
    muted: bool,
    remote_screen_sharer: Option<String>,
    captions_enabled: bool,
    caption_language: String,
    current_caption: Option<String>,
    caption_deadline: Option<Instant>,
    chat: VecDeque<ChatEntry>,
    receiver: mpsc::Receiver<SessionCommand>,
    events: mpsc::Receiver<SignalEvent>,
    cancel_token: CancellationToken,
    metrics: Arc<SessionMetrics>,
    mailbox: MailboxMonitor,
}

impl MeetingSessionActor {
    /// Join a meeting: acquire media, resolve metadata, register with the
    /// signaling router, and spawn the session actor.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MediaAcquisition`] before any signaling
    /// join is attempted if camera/microphone access fails,
    /// [`SessionError::MeetingEnded`] for a meeting that already ended,
    /// or a transport error from the router.
    pub async fn join(
        params: SessionParams,
    ) -> Result<(SessionHandle, JoinHandle<()>), SessionError> {
        let SessionParams {
            config,
            meeting_id,
            identity,
            router,
            endpoint,
            directory,
            recordings,
            cancel_token,
        } = params;

        // Media first: a denied camera/microphone is fatal to joining and
        // must surface before the signaling join.
        let local_tracks = endpoint
            .acquire_user_media(&MediaConstraints::default())
            .await?;
        let screen_capability = endpoint.screen_share_capability();

        let mut host = HostResolver::new();
        match directory.get_meeting(&meeting_id).await {
            Ok(metadata) => {
                if metadata.status == MeetingStatus::Ended {
                    endpoint.release_user_media().await;
                    return Err(SessionError::MeetingEnded);
                }
                host.observe_metadata(metadata.host_id.as_deref());
            }
            Err(e) => {
                // Host resolution falls back to the virtual placeholder; a
                // later host-updated signal still applies.
                warn!(
                    target: "atrium.session",
                    meeting_id = %meeting_id,
                    error = %e,
                    "Meeting metadata unavailable"
                );
            }
        }

        let (events_tx, events_rx) = mpsc::channel(config.event_channel);
        let accept = match router
            .join(
                JoinRequest {
                    meeting_id: meeting_id.clone(),
                    participant_id: identity.participant_id.clone(),
                    display_name: identity.display_name.clone(),
                    camera_on: true,
                    muted: false,
                },
                events_tx,
            )
            .await
        {
            Ok(accept) => accept,
            Err(e) => {
                endpoint.release_user_media().await;
                return Err(e);
            }
        };

        endpoint.configure_ice(&accept.ice_servers).await;

        // Persistence is fire-and-forget relative to the live session.
        {
            let directory = Arc::clone(&directory);
            let meeting_id = meeting_id.clone();
            let participant_id = identity.participant_id.clone();
            tokio::spawn(async move {
                if let Err(e) = directory.join_meeting(&meeting_id, &participant_id).await {
                    warn!(
                        target: "atrium.session",
                        meeting_id = %meeting_id,
                        error = %e,
                        "Could not persist join"
                    );
                }
            });
        }

        let (sender, receiver) = mpsc::channel(config.session_mailbox);
        let caption_language = config.default_language.clone();

        let actor = Self {
            meeting_id: meeting_id.clone(),
            identity,
            connection_id: accept.connection_id.clone(),
            config,
            router,
            endpoint,
            directory,
            recordings,
            registry: SessionRegistry::new(),
            peers: HashMap::new(),
            host,
            status: MeetingStatus::Active,
            local_tracks,
            screen_track: None,
            screen_capability,
            camera_on: true,
            muted: false,
            remote_screen_sharer: None,
            captions_enabled: false,
            caption_language,
            current_caption: None,
            caption_deadline: None,
            chat: VecDeque::new(),
            receiver,
            events: events_rx,
            cancel_token: cancel_token.clone(),
            metrics: SessionMetrics::new(),
            mailbox: MailboxMonitor::new(ActorType::Session, &accept.connection_id),
        };

        let task_handle = tokio::spawn(actor.run());

        Ok((
            SessionHandle {
                sender,
                cancel_token,
                meeting_id,
                connection_id: accept.connection_id,
            },
            task_handle,
        ))
    }

    /// Run the actor loop.
    #[instrument(
        skip_all,
        name = "atrium.session",
        fields(meeting_id = %self.meeting_id, connection_id = %self.connection_id)
    )]
    async fn run(mut self) {
        info!(target: "atrium.session", "MeetingSession started");

        let mut caption_tick = tokio::time::interval(Duration::from_millis(250));

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.teardown("cancelled").await;
                    break;
                }

                _ = caption_tick.tick() => {
                    self.clear_expired_caption();
                }

                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(command) => {
                            self.mailbox.record_enqueue();
                            let exit = self.handle_command(command).await;
                            self.mailbox.record_dequeue();
                            if exit {
                                break;
                            }
                        }
                        None => {
                            self.teardown("handle dropped").await;
                            break;
                        }
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => {
                            self.metrics.event_processed();
                            if self.handle_event(event).await {
                                break;
                            }
                        }
                        None => {
                            // Transport loss: full local teardown, no
                            // partial repair. Recovery is a fresh join.
                            error!(
                                target: "atrium.session",
                                "Signaling transport lost"
                            );
                            self.teardown("signaling transport lost").await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "atrium.session",
            events_processed = self.metrics.events_processed.load(std::sync::atomic::Ordering::Relaxed),
            "MeetingSession stopped"
        );
    }

    /// Handle a command from the handle. Returns true when the actor
    /// should exit.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
                false
            }

            SessionCommand::SetCameraEnabled(enabled) => {
                self.camera_on = enabled;
                self.send_request(ClientRequest::CameraState {
                    camera_on: self.camera_on,
                    muted: self.muted,
                })
                .await;
                false
            }

            SessionCommand::SetMuted(muted) => {
                self.muted = muted;
                self.send_request(ClientRequest::CameraState {
                    camera_on: self.camera_on,
                    muted: self.muted,
                })
                .await;
                false
            }

            SessionCommand::StartScreenShare { respond_to } => {
                let result = self.start_screen_share().await;
                let _ = respond_to.send(result);
                false
            }

            SessionCommand::StopScreenShare { respond_to } => {
                let result = self.stop_screen_share().await;
                let _ = respond_to.send(result);
                false
            }

            SessionCommand::SendChat { text } => {
                let timestamp = chrono::Utc::now().timestamp_millis();
                self.push_chat(ChatEntry {
                    sender_id: self.identity.participant_id.clone(),
                    sender_name: self.identity.display_name.clone(),
                    text: text.clone(),
                    timestamp,
                });
                self.send_request(ClientRequest::Chat { text, timestamp })
                    .await;
                false
            }

            SessionCommand::UpdateHost { host_id } => {
                // The router never echoes our own broadcast back, so the
                // signal applies locally here as well.
                self.host.observe_signal(&host_id);
                self.send_request(ClientRequest::HostUpdate { host_id }).await;
                false
            }

            SessionCommand::EnableCaptions { language } => {
                self.captions_enabled = true;
                self.caption_language = language.clone();
                self.send_request(ClientRequest::StartCaptions { language })
                    .await;
                false
            }

            SessionCommand::DisableCaptions => {
                self.captions_enabled = false;
                self.send_request(ClientRequest::StopCaptions).await;
                false
            }

            SessionCommand::SubmitAudio { payload, mime_type } => {
                if self.captions_enabled {
                    self.send_request(ClientRequest::AudioData {
                        payload,
                        mime_type,
                        language: self.caption_language.clone(),
                    })
                    .await;
                } else {
                    debug!(
                        target: "atrium.session",
                        "Audio segment dropped, captions disabled"
                    );
                }
                false
            }

            SessionCommand::RemoteTrackArrived {
                connection_id,
                mut track,
            } => {
                if track.kind == TrackKind::Camera {
                    // The share broadcast is authoritative; the label/size
                    // heuristic is advisory and only logged on mismatch.
                    let heuristic = classify_remote_video(&track);
                    let signaled_sharer =
                        self.remote_screen_sharer.as_deref() == Some(connection_id.as_str());
                    if signaled_sharer {
                        track.kind = TrackKind::Screen;
                    }
                    if signaled_sharer != (heuristic == TrackOrigin::LikelyScreen) {
                        debug!(
                            target: "atrium.session",
                            connection_id = %connection_id,
                            stream_key = %self.registry.resolve_stream_key(&connection_id),
                            heuristic = ?heuristic,
                            signaled_sharer = signaled_sharer,
                            "Track classification disagrees with share signal"
                        );
                    }
                }
                self.registry.add_remote_track(&connection_id, track);
                false
            }

            SessionCommand::FinalizeRecording { container } => {
                let recordings = Arc::clone(&self.recordings);
                let meeting_id = self.meeting_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = recordings
                        .upload(&meeting_id, Bytes::from(container))
                        .await
                    {
                        warn!(
                            target: "atrium.session",
                            meeting_id = %meeting_id,
                            error = %e,
                            "Recording upload failed"
                        );
                    }
                });
                false
            }

            SessionCommand::Leave { respond_to } => {
                self.send_request(ClientRequest::Leave).await;
                self.persist_fire_and_forget(PersistCall::Leave);
                self.teardown("left meeting").await;
                let _ = respond_to.send(Ok(()));
                true
            }

            SessionCommand::EndMeeting { reason, respond_to } => {
                self.send_request(ClientRequest::EndMeeting { reason }).await;
                self.persist_fire_and_forget(PersistCall::End);
                self.status = MeetingStatus::Ended;
                self.teardown("ended meeting").await;
                let _ = respond_to.send(Ok(()));
                true
            }
        }
    }

    /// Handle a signaling event. Returns true when the actor should exit.
    async fn handle_event(&mut self, event: SignalEvent) -> bool {
        match event {
            SignalEvent::ExistingParticipants { participants } => {
                self.handle_existing_participants(participants).await;
                false
            }

            SignalEvent::UserJoined { participant } => {
                if participant.participant_id != self.identity.participant_id {
                    self.registry.upsert(&participant);
                    // The joiner initiates toward us; we wait for its offer.
                    self.spawn_peer(&participant.connection_id, false).await;
                }
                false
            }

            SignalEvent::UserReconnected {
                participant_id,
                old_connection_id,
                new_connection_id,
            } => {
                self.handle_reconnection(&participant_id, &old_connection_id, &new_connection_id)
                    .await;
                false
            }

            SignalEvent::UserLeft {
                participant_id,
                connection_id,
            } => {
                self.handle_user_left(&participant_id, &connection_id).await;
                false
            }

            SignalEvent::Offer {
                from_connection_id,
                sdp,
            } => {
                self.handle_offer(&from_connection_id, &sdp).await;
                false
            }

            SignalEvent::Answer {
                from_connection_id,
                sdp,
            } => {
                self.handle_answer(&from_connection_id, &sdp).await;
                false
            }

            SignalEvent::IceCandidate {
                from_connection_id,
                candidate,
            } => {
                // A candidate may beat both user-joined and the offer.
                if !self.peers.contains_key(&from_connection_id) {
                    self.spawn_peer(&from_connection_id, false).await;
                }
                let result = match self.peers.get_mut(&from_connection_id) {
                    Some(peer) => peer.handle_candidate(candidate).await,
                    None => Ok(()),
                };
                if let Err(e) = result {
                    debug!(
                        target: "atrium.session",
                        connection_id = %from_connection_id,
                        error = %e,
                        "Candidate rejected"
                    );
                }
                false
            }

            SignalEvent::CameraStateChanged {
                participant_id,
                camera_on,
                muted,
                ..
            } => {
                // Authoritative: overwrites any optimistic local view.
                self.registry
                    .apply_camera_state(&participant_id, camera_on, muted);
                false
            }

            SignalEvent::StartScreenShare { connection_id } => {
                self.registry.set_screen_sharing(&connection_id, true);
                self.remote_screen_sharer = Some(connection_id);
                false
            }

            SignalEvent::StopScreenShare { connection_id } => {
                self.registry.set_screen_sharing(&connection_id, false);
                if self.remote_screen_sharer.as_deref() == Some(connection_id.as_str()) {
                    self.remote_screen_sharer = None;
                }
                false
            }

            SignalEvent::HostUpdated { host_id } => {
                self.host.observe_signal(&host_id);
                false
            }

            SignalEvent::MeetingEnded { reason } => {
                info!(
                    target: "atrium.session",
                    reason = %reason,
                    "Meeting ended"
                );
                self.status = MeetingStatus::Ended;
                self.teardown("meeting ended").await;
                true
            }

            SignalEvent::ChatMessage {
                sender_id,
                sender_name,
                text,
                timestamp,
            } => {
                self.push_chat(ChatEntry {
                    sender_id,
                    sender_name,
                    text,
                    timestamp,
                });
                false
            }

            SignalEvent::CaptionUpdate { text, .. } => {
                self.show_caption(text);
                false
            }

            SignalEvent::CaptionError { message } => {
                // Transient, auto-clearing; never affects media.
                self.show_caption(message);
                false
            }
        }
    }

    async fn handle_existing_participants(
        &mut self,
        participants: Vec<ParticipantAnnouncement>,
    ) {
        for announcement in participants {
            if announcement.participant_id == self.identity.participant_id {
                continue;
            }
            if announcement.is_screen_sharing {
                self.remote_screen_sharer = Some(announcement.connection_id.clone());
            }
            self.registry.upsert(&announcement);
            // We discovered them, so we initiate.
            self.spawn_peer(&announcement.connection_id, true).await;
        }
    }

    /// Re-key a participant onto its new connection. Teardown strictly
    /// precedes creation so two connections for one participant never
    /// coexist and produce duplicate audio.
    async fn handle_reconnection(
        &mut self,
        participant_id: &str,
        old_connection_id: &str,
        new_connection_id: &str,
    ) {
        if let Some(mut peer) = self.peers.remove(old_connection_id) {
            peer.close().await;
            self.metrics.peer_closed();
        }
        self.registry.discard_pending(old_connection_id);
        let previous = self.registry.remove_by_connection(old_connection_id);

        if self.remote_screen_sharer.as_deref() == Some(old_connection_id) {
            self.remote_screen_sharer = None;
        }

        let announcement = ParticipantAnnouncement {
            participant_id: participant_id.to_string(),
            connection_id: new_connection_id.to_string(),
            display_name: previous
                .as_ref()
                .map_or_else(|| participant_id.to_string(), |p| p.display_name.clone()),
            camera_on: previous.as_ref().is_none_or(|p| p.camera_on),
            muted: previous.as_ref().is_some_and(|p| p.muted),
            is_screen_sharing: false,
        };
        self.registry.upsert(&announcement);

        // The reconnecting side receives the room snapshot and initiates
        // toward us; we wait for its offer.
        self.spawn_peer(new_connection_id, false).await;

        info!(
            target: "atrium.session",
            old_connection_id = %old_connection_id,
            new_connection_id = %new_connection_id,
            "Participant re-keyed after reconnect"
        );
    }

    async fn handle_user_left(&mut self, participant_id: &str, connection_id: &str) {
        if let Some(mut peer) = self.peers.remove(connection_id) {
            peer.close().await;
            self.metrics.peer_closed();
        }
        // No-op for a connection already replaced by reconnection.
        self.registry.remove_by_connection(connection_id);

        if self.remote_screen_sharer.as_deref() == Some(connection_id) {
            self.remote_screen_sharer = None;
        }

        debug!(
            target: "atrium.session",
            participant_id = %participant_id,
            connection_id = %connection_id,
            remaining = self.registry.len(),
            "Participant left"
        );
    }

    async fn handle_offer(&mut self, from: &str, sdp: &str) {
        // An offer can beat user-joined; create the peer on demand.
        if !self.peers.contains_key(from) {
            self.spawn_peer(from, false).await;
        }
        let result = match self.peers.get_mut(from) {
            Some(peer) => peer.handle_offer(sdp).await,
            None => return,
        };
        match result {
            Ok(answer) => {
                self.send_request(ClientRequest::Answer {
                    target_connection_id: from.to_string(),
                    sdp: answer,
                })
                .await;
                self.metrics.renegotiation_completed();

                // Renegotiations queued while this side could not offer
                // run now that the cycle is complete.
                let follow_up = match self.peers.get_mut(from) {
                    Some(peer) => peer.resume_pending().await,
                    None => Ok(None),
                };
                match follow_up {
                    Ok(Some(sdp)) => {
                        self.send_request(ClientRequest::Offer {
                            target_connection_id: from.to_string(),
                            sdp,
                        })
                        .await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            target: "atrium.session",
                            connection_id = %from,
                            error = %e,
                            "Queued renegotiation failed"
                        );
                        self.fail_peer(from);
                    }
                }
            }
            Err(SessionError::RenegotiationRace { .. }) => {
                // Close and rebuild rather than patch racing descriptions.
                warn!(
                    target: "atrium.session",
                    connection_id = %from,
                    "Renegotiation race, rebuilding peer connection"
                );
                self.rebuild_peer(from).await;
            }
            Err(e) => {
                warn!(
                    target: "atrium.session",
                    connection_id = %from,
                    error = %e,
                    "Offer handling failed"
                );
                self.fail_peer(from);
            }
        }
    }

    async fn handle_answer(&mut self, from: &str, sdp: &str) {
        let result = match self.peers.get_mut(from) {
            Some(peer) => peer.handle_answer(sdp).await,
            None => {
                debug!(
                    target: "atrium.session",
                    connection_id = %from,
                    "Answer for unknown peer dropped"
                );
                return;
            }
        };
        match result {
            Ok(Some(next_offer)) => {
                self.metrics.renegotiation_completed();
                self.send_request(ClientRequest::Offer {
                    target_connection_id: from.to_string(),
                    sdp: next_offer,
                })
                .await;
            }
            Ok(None) => {
                self.metrics.renegotiation_completed();
            }
            Err(e) => {
                warn!(
                    target: "atrium.session",
                    connection_id = %from,
                    error = %e,
                    "Answer handling failed"
                );
                self.fail_peer(from);
            }
        }
    }

    /// Create the peer connection toward one remote, attaching local
    /// tracks (camera, microphone, active screen) immediately. At most
    /// one peer exists per connection id.
    async fn spawn_peer(&mut self, connection_id: &str, initiator: bool) {
        if self.peers.contains_key(connection_id) {
            return;
        }

        let mut tracks = self.local_tracks.clone();
        if let Some(screen) = &self.screen_track {
            tracks.push(screen.clone());
        }

        match PeerConnection::create(
            connection_id,
            initiator,
            &tracks,
            Arc::clone(&self.endpoint),
        )
        .await
        {
            Ok(mut peer) => {
                self.metrics.peer_created();
                if initiator {
                    match peer.begin_negotiation(NegotiationReason::InitialMedia).await {
                        Ok(Some(sdp)) => {
                            self.send_request(ClientRequest::Offer {
                                target_connection_id: connection_id.to_string(),
                                sdp,
                            })
                            .await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                target: "atrium.session",
                                connection_id = %connection_id,
                                error = %e,
                                "Initial negotiation failed"
                            );
                            peer.mark_failed();
                        }
                    }
                }
                self.peers.insert(connection_id.to_string(), peer);
            }
            Err(e) => {
                warn!(
                    target: "atrium.session",
                    connection_id = %connection_id,
                    error = %e,
                    "Peer connection creation failed"
                );
            }
        }
    }

    /// Close a raced peer connection and create a fresh one with the same
    /// initiator role.
    async fn rebuild_peer(&mut self, connection_id: &str) {
        let initiator = match self.peers.remove(connection_id) {
            Some(mut peer) => {
                let initiator = peer.is_initiator();
                peer.close().await;
                self.metrics.peer_closed();
                initiator
            }
            None => return,
        };
        self.spawn_peer(connection_id, initiator).await;
    }

    /// Degrade one peer without touching the rest of the mesh.
    fn fail_peer(&mut self, connection_id: &str) {
        if let Some(peer) = self.peers.get_mut(connection_id) {
            peer.mark_failed();
        }
    }

    async fn start_screen_share(&mut self) -> Result<(), SessionError> {
        if self.screen_track.is_some() {
            return Ok(());
        }
        self.screen_capability.require()?;

        let track = self.endpoint.acquire_display_media().await?;
        self.screen_track = Some(track.clone());

        // Renegotiate each peer individually; cycles serialize per peer
        // and other peers are never touched.
        let connection_ids: Vec<String> = self.peers.keys().cloned().collect();
        for connection_id in connection_ids {
            if let Err(e) = self
                .endpoint
                .attach_local_tracks(&connection_id, std::slice::from_ref(&track))
                .await
            {
                warn!(
                    target: "atrium.session",
                    connection_id = %connection_id,
                    error = %e,
                    "Screen track attach failed"
                );
                continue;
            }
            self.renegotiate(&connection_id, NegotiationReason::ScreenShareStarted)
                .await;
        }

        self.send_request(ClientRequest::StartScreenShare).await;
        info!(target: "atrium.session", "Screen share started");
        Ok(())
    }

    async fn stop_screen_share(&mut self) -> Result<(), SessionError> {
        if self.screen_track.is_none() {
            return Ok(());
        }
        self.screen_track = None;

        let connection_ids: Vec<String> = self.peers.keys().cloned().collect();
        for connection_id in connection_ids {
            if let Err(e) = self
                .endpoint
                .detach_local_track(&connection_id, TrackKind::Screen)
                .await
            {
                warn!(
                    target: "atrium.session",
                    connection_id = %connection_id,
                    error = %e,
                    "Screen track detach failed"
                );
                continue;
            }
            self.renegotiate(&connection_id, NegotiationReason::ScreenShareStopped)
                .await;
        }

        self.endpoint.release_display_media().await;
        self.send_request(ClientRequest::StopScreenShare).await;
        info!(target: "atrium.session", "Screen share stopped");
        Ok(())
    }

    async fn renegotiate(&mut self, connection_id: &str, reason: NegotiationReason) {
        let result = match self.peers.get_mut(connection_id) {
            Some(peer) => peer.begin_negotiation(reason).await,
            None => return,
        };
        match result {
            Ok(Some(sdp)) => {
                self.send_request(ClientRequest::Offer {
                    target_connection_id: connection_id.to_string(),
                    sdp,
                })
                .await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    target: "atrium.session",
                    connection_id = %connection_id,
                    error = %e,
                    "Renegotiation failed"
                );
                self.fail_peer(connection_id);
            }
        }
    }

    fn show_caption(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.current_caption = Some(text);
        self.caption_deadline = Some(Instant::now() + self.config.caption_clear);
    }

    fn clear_expired_caption(&mut self) {
        if let Some(deadline) = self.caption_deadline {
            if Instant::now() >= deadline {
                self.current_caption = None;
                self.caption_deadline = None;
            }
        }
    }

    fn push_chat(&mut self, entry: ChatEntry) {
        if self.chat.len() == CHAT_BACKLOG {
            self.chat.pop_front();
        }
        self.chat.push_back(entry);
    }

    fn persist_fire_and_forget(&self, call: PersistCall) {
        let directory = Arc::clone(&self.directory);
        let meeting_id = self.meeting_id.clone();
        let participant_id = self.identity.participant_id.clone();
        tokio::spawn(async move {
            let result = match call {
                PersistCall::Leave => directory.leave_meeting(&meeting_id, &participant_id).await,
                PersistCall::End => directory.end_meeting(&meeting_id).await,
            };
            if let Err(e) = result {
                warn!(
                    target: "atrium.session",
                    meeting_id = %meeting_id,
                    error = %e,
                    "Could not persist meeting change"
                );
            }
        });
    }

    async fn send_request(&self, request: ClientRequest) {
        if let Err(e) = self.router.send(self.connection_id.clone(), request).await {
            warn!(
                target: "atrium.session",
                error = %e,
                "Signaling send failed"
            );
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let mut participants: Vec<_> = self
            .registry
            .participants()
            .map(crate::registry::ParticipantRecord::summary)
            .collect();
        participants.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));

        let mut peers: Vec<PeerSummary> = self
            .peers
            .values()
            .map(|peer| PeerSummary {
                connection_id: peer.connection_id().to_string(),
                participant_id: self
                    .registry
                    .by_connection(peer.connection_id())
                    .map(|p| p.participant_id.clone()),
                state: peer.state(),
                initiator: peer.is_initiator(),
                negotiation_cycles: peer.negotiation_cycles(),
                pending_renegotiations: peer.pending_renegotiations(),
            })
            .collect();
        peers.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));

        SessionSnapshot {
            meeting_id: self.meeting_id.clone(),
            local_connection_id: self.connection_id.clone(),
            status: self.status,
            host_id: self.host.host_id().map(str::to_string),
            participants,
            peers,
            camera_on: self.camera_on,
            muted: self.muted,
            is_screen_sharing: self.screen_track.is_some(),
            remote_screen_sharer: self.remote_screen_sharer.clone(),
            captions_enabled: self.captions_enabled,
            current_caption: self.current_caption.clone(),
            chat_len: self.chat.len(),
            pending_tracks: self.registry.pending_track_count(),
        }
    }

    /// Close every peer connection and release local media before the
    /// session object is discarded.
    async fn teardown(&mut self, reason: &str) {
        info!(
            target: "atrium.session",
            reason = %reason,
            peers = self.peers.len(),
            "Tearing down session"
        );

        for (_, mut peer) in self.peers.drain() {
            if peer.is_live() {
                peer.close().await;
                self.metrics.peer_closed();
            } else {
                peer.close().await;
            }
        }
        self.registry.clear();
        self.remote_screen_sharer = None;

        if self.screen_track.take().is_some() {
            self.endpoint.release_display_media().await;
        }
        self.endpoint.release_user_media().await;
    }
}

/// Which persistence call to make on the way out.
enum PersistCall {
    Leave,
    End,
}
