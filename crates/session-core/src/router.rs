//! `SignalingRouterActor` - relays signaling between exactly the right
//! participants.
//!
//! The router owns room membership: who is in which meeting, under which
//! connection id, with which event channel. It delivers
//! `existing-participants` to a joiner exactly once, fans presence and
//! state changes out to everyone else, and relays offer/answer/candidate
//! messages to exactly one target. A participant never receives its own
//! events back.
//!
//! Routing is fire-and-forget: a delivery that fails (full or closed
//! channel) is dropped and logged, never retried. Lost presence is
//! repaired by the next full-state snapshot or by reconnection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::media::{AudioSubmission, Transcriber};
use crate::messages::{JoinAccept, RouterMessage, RouterStatus};
use crate::metrics::{ActorType, MailboxMonitor};
use signal_protocol::{ClientRequest, JoinRequest, ParticipantAnnouncement, SignalEvent};

/// One connected client within a room.
struct Member {
    participant_id: String,
    display_name: String,
    camera_on: bool,
    muted: bool,
    is_screen_sharing: bool,
    events: mpsc::Sender<SignalEvent>,
}

impl Member {
    fn announcement(&self, connection_id: &str) -> ParticipantAnnouncement {
        ParticipantAnnouncement {
            participant_id: self.participant_id.clone(),
            connection_id: connection_id.to_string(),
            display_name: self.display_name.clone(),
            camera_on: self.camera_on,
            muted: self.muted,
            is_screen_sharing: self.is_screen_sharing,
        }
    }
}

/// One meeting room.
#[derive(Default)]
struct Room {
    members: HashMap<String, Member>,
    /// Caption fan-out subscribers: connection id -> language tag.
    caption_subscribers: HashMap<String, String>,
}

/// Handle to the `SignalingRouterActor`.
#[derive(Clone)]
pub struct SignalingRouterHandle {
    sender: mpsc::Sender<RouterMessage>,
    cancel_token: CancellationToken,
}

impl SignalingRouterHandle {
    /// Join a meeting room. Delivers `existing-participants` on `events`
    /// exactly once and announces the join (or reconnect) to the room.
    ///
    /// # Errors
    ///
    /// Returns an error if the join is rejected or the router is gone.
    pub async fn join(
        &self,
        request: JoinRequest,
        events: mpsc::Sender<SignalEvent>,
    ) -> Result<JoinAccept, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RouterMessage::Join {
                request,
                events,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Transport(format!("router unavailable: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Transport(format!("router reply lost: {e}")))?
    }

    /// Send a request on behalf of a joined connection. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns an error only when the router itself is gone.
    pub async fn send(
        &self,
        from_connection_id: impl Into<String>,
        request: ClientRequest,
    ) -> Result<(), SessionError> {
        self.sender
            .send(RouterMessage::Request {
                from_connection_id: from_connection_id.into(),
                request,
            })
            .await
            .map_err(|e| SessionError::Transport(format!("router unavailable: {e}")))
    }

    /// Report a transport drop with no explicit leave. The member is
    /// removed silently.
    ///
    /// # Errors
    ///
    /// Returns an error only when the router itself is gone.
    pub async fn disconnect(&self, connection_id: impl Into<String>) -> Result<(), SessionError> {
        self.sender
            .send(RouterMessage::Disconnect {
                connection_id: connection_id.into(),
            })
            .await
            .map_err(|e| SessionError::Transport(format!("router unavailable: {e}")))
    }

    /// Router status for health checks and tests.
    ///
    /// # Errors
    ///
    /// Returns an error when the router is gone.
    pub async fn status(&self) -> Result<RouterStatus, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RouterMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| SessionError::Transport(format!("router unavailable: {e}")))?;
        rx.await
            .map_err(|e| SessionError::Transport(format!("router reply lost: {e}")))
    }

    /// Cancel the router actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the router is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `SignalingRouterActor` implementation.
pub struct SignalingRouterActor {
    config: SessionConfig,
    receiver: mpsc::Receiver<RouterMessage>,
    /// For caption tasks to report back into the mailbox.
    self_sender: mpsc::Sender<RouterMessage>,
    cancel_token: CancellationToken,
    transcriber: Option<Arc<dyn Transcriber>>,
    rooms: HashMap<String, Room>,
    /// connection id -> meeting id.
    connection_rooms: HashMap<String, String>,
    mailbox: MailboxMonitor,
}

impl SignalingRouterActor {
    /// Spawn the router actor.
    ///
    /// `transcriber` is the captioning collaborator; without one, audio
    /// submissions answer with a `caption-error`.
    #[must_use]
    pub fn spawn(
        config: SessionConfig,
        transcriber: Option<Arc<dyn Transcriber>>,
        cancel_token: CancellationToken,
    ) -> (SignalingRouterHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.router_mailbox);

        let actor = Self {
            config,
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            transcriber,
            rooms: HashMap::new(),
            connection_rooms: HashMap::new(),
            mailbox: MailboxMonitor::new(ActorType::Router, "router"),
        };

        let task_handle = tokio::spawn(actor.run());

        (
            SignalingRouterHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "atrium.router")]
    async fn run(mut self) {
        info!(target: "atrium.router", "SignalingRouter started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "atrium.router", "SignalingRouter received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(target: "atrium.router", "SignalingRouter channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "atrium.router",
            rooms = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SignalingRouter stopped"
        );
    }

    fn handle_message(&mut self, message: RouterMessage) {
        match message {
            RouterMessage::Join {
                request,
                events,
                respond_to,
            } => {
                let result = self.handle_join(request, events);
                let _ = respond_to.send(result);
            }

            RouterMessage::Request {
                from_connection_id,
                request,
            } => {
                self.handle_request(&from_connection_id, request);
            }

            RouterMessage::Disconnect { connection_id } => {
                self.handle_disconnect(&connection_id);
            }

            RouterMessage::CaptionResult {
                meeting_id,
                speaker_connection_id,
                speaker_id,
                speaker_name,
                language,
                result,
            } => {
                self.handle_caption_result(
                    &meeting_id,
                    &speaker_connection_id,
                    speaker_id,
                    speaker_name,
                    language,
                    result,
                );
            }

            RouterMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RouterStatus {
                    room_count: self.rooms.len(),
                    connection_count: self.connection_rooms.len(),
                });
            }
        }
    }

    #[instrument(skip_all, fields(meeting_id = %request.meeting_id))]
    fn handle_join(
        &mut self,
        request: JoinRequest,
        events: mpsc::Sender<SignalEvent>,
    ) -> Result<JoinAccept, SessionError> {
        if request.meeting_id.is_empty()
            || request.participant_id.is_empty()
            || request.display_name.is_empty()
        {
            return Err(SessionError::Internal(
                "join rejected: empty identity field".to_string(),
            ));
        }

        let connection_id = uuid::Uuid::new_v4().to_string();
        let room = self.rooms.entry(request.meeting_id.clone()).or_default();

        // A join for an already-present participant id is a reconnect: the
        // old connection is replaced and the room is told to re-key.
        let old_connection = room
            .members
            .iter()
            .find(|(_, m)| m.participant_id == request.participant_id)
            .map(|(id, _)| id.clone());

        let reconnected = old_connection.is_some();

        if let Some(old_connection_id) = old_connection {
            room.members.remove(&old_connection_id);
            room.caption_subscribers.remove(&old_connection_id);
            self.connection_rooms.remove(&old_connection_id);

            let announcement = SignalEvent::UserReconnected {
                participant_id: request.participant_id.clone(),
                old_connection_id: old_connection_id.clone(),
                new_connection_id: connection_id.clone(),
            };
            Self::broadcast(room, None, &announcement, &self.mailbox);

            info!(
                target: "atrium.router",
                old_connection_id = %old_connection_id,
                new_connection_id = %connection_id,
                "Participant reconnected"
            );
        } else {
            let announcement = SignalEvent::UserJoined {
                participant: ParticipantAnnouncement {
                    participant_id: request.participant_id.clone(),
                    connection_id: connection_id.clone(),
                    display_name: request.display_name.clone(),
                    camera_on: request.camera_on,
                    muted: request.muted,
                    is_screen_sharing: false,
                },
            };
            Self::broadcast(room, None, &announcement, &self.mailbox);
        }

        // Snapshot for the joiner: everyone currently present, deduplicated
        // by participant id, never including the joiner itself. Delivered
        // exactly once, here.
        let mut by_participant: HashMap<&str, ParticipantAnnouncement> = HashMap::new();
        for (member_connection, member) in &room.members {
            by_participant.insert(
                member.participant_id.as_str(),
                member.announcement(member_connection),
            );
        }
        let snapshot = SignalEvent::ExistingParticipants {
            participants: by_participant.into_values().collect(),
        };
        if events.try_send(snapshot).is_err() {
            warn!(
                target: "atrium.router",
                connection_id = %connection_id,
                "Joiner event channel rejected snapshot"
            );
        }

        room.members.insert(
            connection_id.clone(),
            Member {
                participant_id: request.participant_id.clone(),
                display_name: request.display_name,
                camera_on: request.camera_on,
                muted: request.muted,
                is_screen_sharing: false,
                events,
            },
        );
        self.connection_rooms
            .insert(connection_id.clone(), request.meeting_id);

        Ok(JoinAccept {
            connection_id,
            ice_servers: self.config.ice_servers.clone(),
            reconnected,
        })
    }

    fn handle_request(&mut self, from: &str, request: ClientRequest) {
        let Some(meeting_id) = self.connection_rooms.get(from).cloned() else {
            debug!(
                target: "atrium.router",
                connection_id = %from,
                "Request from unknown connection dropped"
            );
            return;
        };
        let Some(room) = self.rooms.get_mut(&meeting_id) else {
            return;
        };

        match request {
            ClientRequest::Offer {
                target_connection_id,
                sdp,
            } => {
                Self::relay(
                    room,
                    from,
                    &target_connection_id,
                    SignalEvent::Offer {
                        from_connection_id: from.to_string(),
                        sdp,
                    },
                    &self.mailbox,
                );
            }

            ClientRequest::Answer {
                target_connection_id,
                sdp,
            } => {
                Self::relay(
                    room,
                    from,
                    &target_connection_id,
                    SignalEvent::Answer {
                        from_connection_id: from.to_string(),
                        sdp,
                    },
                    &self.mailbox,
                );
            }

            ClientRequest::IceCandidate {
                target_connection_id,
                candidate,
            } => {
                Self::relay(
                    room,
                    from,
                    &target_connection_id,
                    SignalEvent::IceCandidate {
                        from_connection_id: from.to_string(),
                        candidate,
                    },
                    &self.mailbox,
                );
            }

            ClientRequest::CameraState { camera_on, muted } => {
                let Some(member) = room.members.get_mut(from) else {
                    return;
                };
                member.camera_on = camera_on;
                member.muted = muted;
                let event = SignalEvent::CameraStateChanged {
                    participant_id: member.participant_id.clone(),
                    connection_id: from.to_string(),
                    camera_on,
                    muted,
                };
                Self::broadcast(room, Some(from), &event, &self.mailbox);
            }

            ClientRequest::StartScreenShare => {
                if let Some(member) = room.members.get_mut(from) {
                    member.is_screen_sharing = true;
                }
                let event = SignalEvent::StartScreenShare {
                    connection_id: from.to_string(),
                };
                Self::broadcast(room, Some(from), &event, &self.mailbox);
            }

            ClientRequest::StopScreenShare => {
                if let Some(member) = room.members.get_mut(from) {
                    member.is_screen_sharing = false;
                }
                let event = SignalEvent::StopScreenShare {
                    connection_id: from.to_string(),
                };
                Self::broadcast(room, Some(from), &event, &self.mailbox);
            }

            ClientRequest::HostUpdate { host_id } => {
                let event = SignalEvent::HostUpdated { host_id };
                Self::broadcast(room, Some(from), &event, &self.mailbox);
            }

            ClientRequest::Chat { text, timestamp } => {
                let Some(member) = room.members.get(from) else {
                    return;
                };
                let event = SignalEvent::ChatMessage {
                    sender_id: member.participant_id.clone(),
                    sender_name: member.display_name.clone(),
                    text,
                    timestamp,
                };
                Self::broadcast(room, Some(from), &event, &self.mailbox);
            }

            ClientRequest::StartCaptions { language } => {
                room.caption_subscribers.insert(from.to_string(), language);
            }

            ClientRequest::StopCaptions => {
                room.caption_subscribers.remove(from);
            }

            ClientRequest::AudioData {
                payload,
                mime_type,
                language,
            } => {
                self.handle_audio_data(&meeting_id, from, payload, mime_type, language);
            }

            ClientRequest::Leave => {
                self.handle_leave(&meeting_id, from);
            }

            ClientRequest::EndMeeting { reason } => {
                self.handle_end_meeting(&meeting_id, from, reason);
            }
        }
    }

    /// Hand one audio submission to the transcription collaborator without
    /// blocking the router loop; the result comes back through the
    /// mailbox as `CaptionResult`.
    fn handle_audio_data(
        &mut self,
        meeting_id: &str,
        from: &str,
        payload: Vec<u8>,
        mime_type: String,
        language: String,
    ) {
        let Some(room) = self.rooms.get(meeting_id) else {
            return;
        };
        let Some(member) = room.members.get(from) else {
            return;
        };
        let speaker_id = member.participant_id.clone();
        let speaker_name = member.display_name.clone();

        let Some(transcriber) = self.transcriber.clone() else {
            Self::deliver(
                room,
                from,
                SignalEvent::CaptionError {
                    message: "Transcription unavailable".to_string(),
                },
                &self.mailbox,
            );
            return;
        };

        let submission = AudioSubmission {
            payload,
            mime_type,
            language: language.clone(),
            speaker_id: speaker_id.clone(),
            speaker_name: speaker_name.clone(),
        };
        let reply = self.self_sender.clone();
        let meeting_id = meeting_id.to_string();
        let from = from.to_string();
        tokio::spawn(async move {
            let result = transcriber.transcribe(submission).await;
            let _ = reply
                .send(RouterMessage::CaptionResult {
                    meeting_id,
                    speaker_connection_id: from,
                    speaker_id,
                    speaker_name,
                    language,
                    result,
                })
                .await;
        });
    }

    fn handle_caption_result(
        &mut self,
        meeting_id: &str,
        speaker_connection_id: &str,
        speaker_id: String,
        speaker_name: String,
        language: String,
        result: Result<String, SessionError>,
    ) {
        let Some(room) = self.rooms.get(meeting_id) else {
            return;
        };

        match result {
            Ok(text) => {
                let event = SignalEvent::CaptionUpdate {
                    speaker_id: Some(speaker_id),
                    speaker_name: Some(speaker_name),
                    text,
                    language,
                };
                // Captions go to every subscriber, speaker included; they
                // are collaborator output, not a participant's own event.
                for connection_id in room.caption_subscribers.keys() {
                    Self::deliver(room, connection_id, event.clone(), &self.mailbox);
                }
            }
            Err(e) => {
                // Transient: surfaced only to the submitter, capture keeps
                // running.
                Self::deliver(
                    room,
                    speaker_connection_id,
                    SignalEvent::CaptionError {
                        message: e.user_message(),
                    },
                    &self.mailbox,
                );
            }
        }
    }

    fn handle_leave(&mut self, meeting_id: &str, connection_id: &str) {
        let Some(room) = self.rooms.get_mut(meeting_id) else {
            return;
        };
        let Some(member) = room.members.remove(connection_id) else {
            return;
        };
        room.caption_subscribers.remove(connection_id);
        self.connection_rooms.remove(connection_id);

        let event = SignalEvent::UserLeft {
            participant_id: member.participant_id,
            connection_id: connection_id.to_string(),
        };
        Self::broadcast(room, None, &event, &self.mailbox);

        if room.members.is_empty() {
            self.rooms.remove(meeting_id);
        }
    }

    fn handle_end_meeting(&mut self, meeting_id: &str, from: &str, reason: String) {
        let Some(room) = self.rooms.remove(meeting_id) else {
            return;
        };
        info!(
            target: "atrium.router",
            meeting_id = %meeting_id,
            reason = %reason,
            participants = room.members.len(),
            "Meeting ended"
        );
        let event = SignalEvent::MeetingEnded { reason };
        Self::broadcast(&room, Some(from), &event, &self.mailbox);
        for connection_id in room.members.keys() {
            self.connection_rooms.remove(connection_id);
        }
    }

    fn handle_disconnect(&mut self, connection_id: &str) {
        let Some(meeting_id) = self.connection_rooms.remove(connection_id) else {
            return;
        };
        if let Some(room) = self.rooms.get_mut(&meeting_id) {
            // Silent removal: peers learn about it through
            // `user-reconnected` or the next snapshot.
            room.members.remove(connection_id);
            room.caption_subscribers.remove(connection_id);
            if room.members.is_empty() {
                self.rooms.remove(&meeting_id);
            }
        }
        debug!(
            target: "atrium.router",
            connection_id = %connection_id,
            "Connection dropped without leave"
        );
    }

    /// Deliver to exactly one member, skipping self-delivery.
    fn relay(room: &Room, from: &str, target: &str, event: SignalEvent, mailbox: &MailboxMonitor) {
        if target == from {
            debug!(
                target: "atrium.router",
                connection_id = %from,
                "Self-addressed relay dropped"
            );
            return;
        }
        Self::deliver(room, target, event, mailbox);
    }

    /// Deliver to every member except `except`.
    fn broadcast(
        room: &Room,
        except: Option<&str>,
        event: &SignalEvent,
        mailbox: &MailboxMonitor,
    ) {
        for connection_id in room.members.keys() {
            if Some(connection_id.as_str()) == except {
                continue;
            }
            Self::deliver(room, connection_id, event.clone(), mailbox);
        }
    }

    /// Fire-and-forget delivery to one member.
    fn deliver(room: &Room, connection_id: &str, event: SignalEvent, mailbox: &MailboxMonitor) {
        let Some(member) = room.members.get(connection_id) else {
            debug!(
                target: "atrium.router",
                connection_id = %connection_id,
                "Delivery target not in room, dropped"
            );
            return;
        };
        let event_type = event.type_tag();
        if member.events.try_send(event).is_err() {
            mailbox.record_drop();
            warn!(
                target: "atrium.router",
                connection_id = %connection_id,
                event_type = event_type,
                "Delivery failed, dropped without retry"
            );
        }
    }
}
