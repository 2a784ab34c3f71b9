//! Per-peer negotiation state-machine scenarios.
//!
//! Relocated from the `peer` module's in-crate tests: they construct
//! `FakeMediaEndpoint` from `session-test-utils`, which depends on
//! `session-core`. Running them as integration tests links a single
//! `session_core` instance, avoiding the dev-dependency-cycle type
//! mismatch that an in-crate `#[cfg(test)]` module would hit.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use session_core::errors::SessionError;
use session_core::media::{MediaEndpoint, MediaTrack};
use session_core::peer::{NegotiationReason, PeerConnection, PeerState};
use signal_protocol::IceCandidateInit;

use session_test_utils::FakeMediaEndpoint;

    fn tracks() -> Vec<MediaTrack> {
        vec![
            MediaTrack {
                id: "mic".to_string(),
                kind: session_core::media::TrackKind::Audio,
                label: String::new(),
                width: None,
                height: None,
            },
            MediaTrack {
                id: "cam".to_string(),
                kind: session_core::media::TrackKind::Camera,
                label: String::new(),
                width: Some(1280),
                height: Some(720),
            },
        ]
    }

    fn candidate(n: u32) -> IceCandidateInit {
        IceCandidateInit {
            candidate: format!("candidate:{n}"),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    async fn peer(initiator: bool, endpoint: &Arc<FakeMediaEndpoint>) -> PeerConnection {
        let endpoint: Arc<dyn MediaEndpoint> = endpoint.clone();
        PeerConnection::create("remote-1", initiator, &tracks(), endpoint)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_tracks_attach_at_creation() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("a"));
        let peer = peer(true, &endpoint).await;

        assert_eq!(peer.state(), PeerState::Created);
        // Attachment happens before any negotiation, never deferred.
        assert_eq!(endpoint.ops().first().map(String::as_str), Some("attach:remote-1:2"));
        assert_eq!(endpoint.attached_kinds("remote-1").len(), 2);
    }

    #[tokio::test]
    async fn test_initiator_offers_then_connects_on_answer() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("a"));
        let mut peer = peer(true, &endpoint).await;

        let offer = peer
            .begin_negotiation(NegotiationReason::InitialMedia)
            .await
            .unwrap();
        assert!(offer.unwrap().starts_with("offer:"));
        assert_eq!(peer.state(), PeerState::Negotiating);

        let next = peer.handle_answer("answer:b->remote-1#0").await.unwrap();
        assert!(next.is_none());
        assert_eq!(peer.state(), PeerState::Connected);
        assert_eq!(peer.negotiation_cycles(), 1);
    }

    #[tokio::test]
    async fn test_non_initiator_waits_for_offer() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("b"));
        let mut peer = peer(false, &endpoint).await;

        let offer = peer
            .begin_negotiation(NegotiationReason::InitialMedia)
            .await
            .unwrap();
        assert!(offer.is_none());
        assert_eq!(peer.state(), PeerState::Created);

        let answer = peer.handle_offer("offer:a->remote-1#0").await.unwrap();
        assert!(answer.starts_with("answer:"));
        assert_eq!(peer.state(), PeerState::Connected);
    }

    #[tokio::test]
    async fn test_renegotiation_strictly_serialized() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("a"));
        let mut peer = peer(true, &endpoint).await;

        peer.begin_negotiation(NegotiationReason::InitialMedia)
            .await
            .unwrap();
        peer.handle_answer("answer:b->remote-1#0").await.unwrap();

        // First renegotiation goes out immediately.
        let offer = peer
            .begin_negotiation(NegotiationReason::ScreenShareStarted)
            .await
            .unwrap();
        assert!(offer.is_some());

        // Second renegotiation queues behind the outstanding cycle.
        let offer = peer
            .begin_negotiation(NegotiationReason::ScreenShareStopped)
            .await
            .unwrap();
        assert!(offer.is_none());
        assert_eq!(peer.pending_renegotiations(), 1);

        // Completing the first cycle starts the queued one.
        let next = peer.handle_answer("answer:b->remote-1#1").await.unwrap();
        assert!(next.unwrap().starts_with("offer:"));
        assert_eq!(peer.pending_renegotiations(), 0);
        assert_eq!(peer.state(), PeerState::Negotiating);

        peer.handle_answer("answer:b->remote-1#2").await.unwrap();
        assert_eq!(peer.state(), PeerState::Connected);
        assert_eq!(peer.negotiation_cycles(), 3);
    }

    #[tokio::test]
    async fn test_renegotiation_before_connected_queues() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("b"));
        let mut peer = peer(false, &endpoint).await;

        // Screen share requested while still waiting for the first offer.
        let offer = peer
            .begin_negotiation(NegotiationReason::ScreenShareStarted)
            .await
            .unwrap();
        assert!(offer.is_none());
        assert_eq!(peer.pending_renegotiations(), 1);

        // The queued request drains once the initial cycle completes.
        peer.handle_offer("offer:a->remote-1#0").await.unwrap();
        let follow_up = peer.resume_pending().await.unwrap();
        assert!(follow_up.unwrap().starts_with("offer:"));
        assert_eq!(peer.pending_renegotiations(), 0);
        assert_eq!(peer.state(), PeerState::Negotiating);
    }

    #[tokio::test]
    async fn test_resume_pending_is_a_noop_when_idle() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("b"));
        let mut peer = peer(false, &endpoint).await;
        assert!(peer.resume_pending().await.unwrap().is_none());

        peer.handle_offer("offer:a->remote-1#0").await.unwrap();
        assert!(peer.resume_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_candidates_buffered_until_remote_description() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("b"));
        let mut peer = peer(false, &endpoint).await;

        peer.handle_candidate(candidate(1)).await.unwrap();
        peer.handle_candidate(candidate(2)).await.unwrap();
        assert_eq!(endpoint.applied_candidates("remote-1"), 0);

        peer.handle_offer("offer:a->remote-1#0").await.unwrap();
        assert_eq!(endpoint.applied_candidates("remote-1"), 2);

        // Later candidates apply directly.
        peer.handle_candidate(candidate(3)).await.unwrap();
        assert_eq!(endpoint.applied_candidates("remote-1"), 3);
    }

    #[tokio::test]
    async fn test_initiator_detects_renegotiation_race() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("a"));
        let mut peer = peer(true, &endpoint).await;

        peer.begin_negotiation(NegotiationReason::InitialMedia)
            .await
            .unwrap();

        let err = peer.handle_offer("offer:b->remote-1#0").await.unwrap_err();
        assert!(matches!(err, SessionError::RenegotiationRace { .. }));
    }

    #[tokio::test]
    async fn test_non_initiator_yields_on_glare() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("b"));
        let mut peer = peer(false, &endpoint).await;

        peer.begin_negotiation(NegotiationReason::InitialMedia)
            .await
            .unwrap();
        peer.handle_offer("offer:a->remote-1#0").await.unwrap();

        // Now connected; our own renegotiation offer goes out.
        let offer = peer
            .begin_negotiation(NegotiationReason::ScreenShareStarted)
            .await
            .unwrap();
        assert!(offer.is_some());

        // Remote offers while ours is outstanding: we yield, answer, and
        // re-queue our abandoned request.
        let answer = peer.handle_offer("offer:a->remote-1#1").await.unwrap();
        assert!(answer.starts_with("answer:"));
        assert_eq!(peer.pending_renegotiations(), 1);
        assert_eq!(peer.state(), PeerState::Connected);
    }

    #[tokio::test]
    async fn test_unexpected_answer_is_negotiation_error() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("a"));
        let mut peer = peer(true, &endpoint).await;

        let err = peer.handle_answer("answer:b->remote-1#0").await.unwrap_err();
        assert!(matches!(err, SessionError::Negotiation { .. }));
    }

    #[tokio::test]
    async fn test_close_releases_and_goes_terminal() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("a"));
        let mut peer = peer(true, &endpoint).await;
        peer.handle_candidate(candidate(1)).await.unwrap();

        peer.close().await;
        assert_eq!(peer.state(), PeerState::Closed);
        assert!(!peer.is_live());
        assert!(endpoint.ops().contains(&"close:remote-1".to_string()));
        // Attached senders released with the connection.
        assert!(endpoint.attached_kinds("remote-1").is_empty());

        // Terminal connections ignore further requests.
        let offer = peer
            .begin_negotiation(NegotiationReason::ScreenShareStarted)
            .await
            .unwrap();
        assert!(offer.is_none());
        assert!(peer.handle_candidate(candidate(2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_is_terminal_without_retry() {
        let endpoint = Arc::new(FakeMediaEndpoint::new("a"));
        let mut peer = peer(true, &endpoint).await;
        peer.begin_negotiation(NegotiationReason::InitialMedia)
            .await
            .unwrap();

        peer.mark_failed();
        assert_eq!(peer.state(), PeerState::Failed);
        assert_eq!(peer.pending_renegotiations(), 0);

        let offer = peer
            .begin_negotiation(NegotiationReason::InitialMedia)
            .await
            .unwrap();
        assert!(offer.is_none());
    }
