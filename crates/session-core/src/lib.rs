//! Atrium Session Core
//!
//! This library implements the real-time orchestration layer for a
//! browser-style multi-party meeting room: the signaling state machine that
//! lets N clients discover each other, build a full mesh of peer media
//! connections, and keep that mesh consistent across joins, leaves,
//! reconnects, host changes, and screen-share renegotiation.
//!
//! # Architecture
//!
//! Two actors cooperate per process:
//!
//! ```text
//! SignalingRouterActor (one per router process)
//! └── rooms: meeting_id -> connection_id -> event channel
//!
//! MeetingSessionActor (one per joined meeting, per client)
//! ├── SessionRegistry   - source of truth for participant/host state
//! ├── PeerConnection    - per-remote state machine (offer/answer/ICE)
//! └── HostResolver      - signal > metadata > virtual placeholder
//! ```
//!
//! The session actor is the only writer of session state; layout and UI
//! read snapshots and never hold a divergent copy of presence state.
//!
//! # Key Design Decisions
//!
//! - **Explicit session object**: a `MeetingSession` is constructed per join
//!   and destroyed on leave; there are no ambient module-level maps.
//! - **Stable identity**: participants are keyed by `participant_id`;
//!   `connection_id` is a routing address that changes on every reconnect.
//! - **Teardown before create**: reconnection closes the stale peer
//!   connection before the replacement exists, so two connections for one
//!   participant never coexist.
//! - **Serialized renegotiation**: per peer, at most one offer/answer cycle
//!   is in flight; later requests queue behind it.

#![warn(clippy::pedantic)]

pub mod capability;
pub mod config;
pub mod errors;
pub mod host;
pub mod media;
pub mod messages;
pub mod metrics;
pub mod peer;
pub mod registry;
pub mod router;
pub mod session;
