//! `PeerConnection` - per-remote-participant connection state machine.
//!
//! One instance exists per remote connection id at any time. The machine
//! moves `Created -> Negotiating -> Connected`, re-enters `Negotiating`
//! for each screen-share renegotiation, and terminates in `Closed` or
//! `Failed`.
//!
//! # Rules
//!
//! - Local tracks attach at creation, never deferred. Deferred attachment
//!   is the dominant cause of missing remote audio/video in this class of
//!   system.
//! - The initiator role is fixed when the connection is created: the side
//!   that learned about the peer from `existing-participants` initiates;
//!   the side that saw `user-joined` waits for an offer.
//! - Renegotiation is strictly serialized per peer. While one offer/answer
//!   cycle is outstanding, later requests queue behind it; two concurrent
//!   cycles would race descriptions and silently lose a track.
//! - ICE failure is terminal. The only recovery is a fresh connection via
//!   reconnection.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::SessionError;
use crate::media::{MediaEndpoint, MediaTrack};
use signal_protocol::IceCandidateInit;

/// Lifecycle state of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Created,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

/// Why a negotiation cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationReason {
    /// First offer/answer exchange after track attachment.
    InitialMedia,
    /// A screen track was added.
    ScreenShareStarted,
    /// A screen track was removed.
    ScreenShareStopped,
}

/// State machine for one remote peer connection.
pub struct PeerConnection {
    connection_id: String,
    initiator: bool,
    state: PeerState,
    endpoint: Arc<dyn MediaEndpoint>,
    /// The cycle currently awaiting an answer, if this side offered.
    in_flight: Option<NegotiationReason>,
    /// Renegotiations queued behind the in-flight cycle.
    pending: VecDeque<NegotiationReason>,
    remote_description_set: bool,
    /// Candidates that arrived before the remote description.
    buffered_candidates: Vec<IceCandidateInit>,
    negotiation_cycles: u32,
}

impl PeerConnection {
    /// Create a connection toward `connection_id`, attaching the local
    /// tracks immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if track attachment fails at the media layer.
    pub async fn create(
        connection_id: impl Into<String>,
        initiator: bool,
        local_tracks: &[MediaTrack],
        endpoint: Arc<dyn MediaEndpoint>,
    ) -> Result<Self, SessionError> {
        let connection_id = connection_id.into();
        endpoint
            .attach_local_tracks(&connection_id, local_tracks)
            .await?;

        debug!(
            target: "atrium.peer",
            connection_id = %connection_id,
            initiator = initiator,
            tracks = local_tracks.len(),
            "Peer connection created"
        );

        Ok(Self {
            connection_id,
            initiator,
            state: PeerState::Created,
            endpoint,
            in_flight: None,
            pending: VecDeque::new(),
            remote_description_set: false,
            buffered_candidates: Vec::new(),
            negotiation_cycles: 0,
        })
    }

    /// Request an offer/answer cycle. Returns the offer SDP to relay when
    /// this side should offer now; `None` when the request was queued or
    /// this side waits for the remote offer.
    ///
    /// # Errors
    ///
    /// Returns an error if the media layer fails to produce an offer.
    pub async fn begin_negotiation(
        &mut self,
        reason: NegotiationReason,
    ) -> Result<Option<String>, SessionError> {
        match self.state {
            PeerState::Closed | PeerState::Failed => {
                debug!(
                    target: "atrium.peer",
                    connection_id = %self.connection_id,
                    state = ?self.state,
                    "Negotiation request ignored on terminal connection"
                );
                return Ok(None);
            }
            PeerState::Created | PeerState::Negotiating | PeerState::Connected => {}
        }

        if self.in_flight.is_some() {
            // Serialize: one cycle at a time per peer.
            self.pending.push_back(reason);
            return Ok(None);
        }

        let should_offer = match self.state {
            PeerState::Created | PeerState::Negotiating => self.initiator,
            // Once connected, either side may offer a renegotiation.
            PeerState::Connected => true,
            PeerState::Closed | PeerState::Failed => false,
        };

        if !should_offer {
            if reason != NegotiationReason::InitialMedia {
                // Not connected yet; run it after the initial cycle lands.
                self.pending.push_back(reason);
            }
            return Ok(None);
        }

        let sdp = self.endpoint.create_offer(&self.connection_id).await?;
        self.in_flight = Some(reason);
        self.state = PeerState::Negotiating;
        Ok(Some(sdp))
    }

    /// Handle a relayed offer: apply the remote description and produce
    /// the answer SDP to relay back.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RenegotiationRace`] when this side also has
    /// an offer outstanding as the designated initiator (the connection
    /// must be closed and rebuilt), or a negotiation error from the media
    /// layer.
    pub async fn handle_offer(&mut self, sdp: &str) -> Result<String, SessionError> {
        if matches!(self.state, PeerState::Closed | PeerState::Failed) {
            return Err(SessionError::Negotiation {
                connection_id: self.connection_id.clone(),
                detail: "offer received on terminal connection".to_string(),
            });
        }

        if let Some(abandoned) = self.in_flight.take() {
            if self.initiator {
                // Both sides offered; descriptions would race.
                return Err(SessionError::RenegotiationRace {
                    connection_id: self.connection_id.clone(),
                });
            }
            // Yield: abandon our outstanding offer and answer theirs. The
            // abandoned request runs again after this cycle completes.
            warn!(
                target: "atrium.peer",
                connection_id = %self.connection_id,
                "Abandoning outstanding offer to answer remote offer"
            );
            if abandoned != NegotiationReason::InitialMedia {
                self.pending.push_front(abandoned);
            }
        }

        self.state = PeerState::Negotiating;
        let answer = self.endpoint.create_answer(&self.connection_id, sdp).await?;
        self.remote_description_set = true;
        self.drain_candidates().await;
        self.state = PeerState::Connected;
        self.negotiation_cycles += 1;
        Ok(answer)
    }

    /// Handle a relayed answer to our outstanding offer. If renegotiations
    /// were queued, the next cycle starts immediately and its offer SDP is
    /// returned for relay.
    ///
    /// # Errors
    ///
    /// Returns an error for an answer with no outstanding offer, or a
    /// media-layer failure.
    pub async fn handle_answer(&mut self, sdp: &str) -> Result<Option<String>, SessionError> {
        if self.in_flight.is_none() {
            return Err(SessionError::Negotiation {
                connection_id: self.connection_id.clone(),
                detail: "answer received with no offer outstanding".to_string(),
            });
        }

        self.endpoint
            .apply_remote_description(&self.connection_id, sdp)
            .await?;
        self.remote_description_set = true;
        self.drain_candidates().await;
        self.in_flight = None;
        self.state = PeerState::Connected;
        self.negotiation_cycles += 1;

        // Strictly serialized: the next queued renegotiation starts only
        // now that this cycle is complete.
        if let Some(reason) = self.pending.pop_front() {
            let sdp = self.endpoint.create_offer(&self.connection_id).await?;
            self.in_flight = Some(reason);
            self.state = PeerState::Negotiating;
            return Ok(Some(sdp));
        }
        Ok(None)
    }

    /// Start the next queued renegotiation if the connection is idle.
    /// Called after an inbound offer completes a cycle, since requests
    /// queued while this side could not offer drain only here. Returns
    /// the offer SDP to relay when a cycle was started.
    ///
    /// # Errors
    ///
    /// Returns an error if the media layer fails to produce an offer.
    pub async fn resume_pending(&mut self) -> Result<Option<String>, SessionError> {
        if self.in_flight.is_some() || self.state != PeerState::Connected {
            return Ok(None);
        }
        let Some(reason) = self.pending.pop_front() else {
            return Ok(None);
        };
        let sdp = self.endpoint.create_offer(&self.connection_id).await?;
        self.in_flight = Some(reason);
        self.state = PeerState::Negotiating;
        Ok(Some(sdp))
    }

    /// Handle a relayed ICE candidate, buffering it if the remote
    /// description is not set yet.
    ///
    /// # Errors
    ///
    /// Returns a negotiation error if the media layer rejects an applied
    /// candidate.
    pub async fn handle_candidate(
        &mut self,
        candidate: IceCandidateInit,
    ) -> Result<(), SessionError> {
        if matches!(self.state, PeerState::Closed | PeerState::Failed) {
            return Ok(());
        }
        if self.remote_description_set {
            self.endpoint
                .apply_ice_candidate(&self.connection_id, &candidate)
                .await?;
        } else {
            self.buffered_candidates.push(candidate);
        }
        Ok(())
    }

    /// Mark the connection failed (ICE failure). Terminal: no retry on
    /// this connection; recovery is a fresh connection via reconnection.
    pub fn mark_failed(&mut self) {
        warn!(
            target: "atrium.peer",
            connection_id = %self.connection_id,
            "Peer connection failed"
        );
        self.state = PeerState::Failed;
        self.in_flight = None;
        self.pending.clear();
        self.buffered_candidates.clear();
    }

    /// Close the connection and release everything attached to it.
    pub async fn close(&mut self) {
        if self.state == PeerState::Closed {
            return;
        }
        self.endpoint.close_peer(&self.connection_id).await;
        self.state = PeerState::Closed;
        self.in_flight = None;
        self.pending.clear();
        self.buffered_candidates.clear();
        debug!(
            target: "atrium.peer",
            connection_id = %self.connection_id,
            "Peer connection closed"
        );
    }

    async fn drain_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.buffered_candidates) {
            if let Err(e) = self
                .endpoint
                .apply_ice_candidate(&self.connection_id, &candidate)
                .await
            {
                debug!(
                    target: "atrium.peer",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Buffered candidate rejected"
                );
            }
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    #[must_use]
    pub const fn state(&self) -> PeerState {
        self.state
    }

    #[must_use]
    pub const fn is_initiator(&self) -> bool {
        self.initiator
    }

    #[must_use]
    pub const fn negotiation_cycles(&self) -> u32 {
        self.negotiation_cycles
    }

    #[must_use]
    pub fn pending_renegotiations(&self) -> usize {
        self.pending.len()
    }

    /// Whether the connection still holds live media (not terminal).
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(
            self.state,
            PeerState::Created | PeerState::Negotiating | PeerState::Connected
        )
    }
}
