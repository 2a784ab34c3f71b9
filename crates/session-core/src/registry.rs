//! `SessionRegistry` - the process-local source of truth for who is in
//! the meeting.
//!
//! Records are keyed by stable `participant_id`; a secondary index maps
//! the current `connection_id` (a routing address) back to it. Inbound
//! media may arrive from a connection before its participant record
//! exists - such tracks are parked in a pending bucket keyed by
//! connection id and folded in the moment the record appears.

use std::collections::HashMap;

use tracing::debug;

use crate::media::{MediaTrack, TrackKind};
use crate::messages::ParticipantSummary;
use signal_protocol::ParticipantAnnouncement;

/// One remote participant as known to this client.
#[derive(Debug, Clone)]
pub struct ParticipantRecord {
    pub participant_id: String,
    /// Current routing address. Changes on every reconnect.
    pub connection_id: String,
    pub display_name: String,
    /// Authoritative value is whatever the remote last broadcast.
    pub camera_on: bool,
    pub muted: bool,
    pub is_screen_sharing: bool,
    /// Inbound tracks, indexed by kind.
    pub tracks: HashMap<TrackKind, MediaTrack>,
}

impl ParticipantRecord {
    fn from_announcement(announcement: &ParticipantAnnouncement) -> Self {
        Self {
            participant_id: announcement.participant_id.clone(),
            connection_id: announcement.connection_id.clone(),
            display_name: announcement.display_name.clone(),
            camera_on: announcement.camera_on,
            muted: announcement.muted,
            is_screen_sharing: announcement.is_screen_sharing,
            tracks: HashMap::new(),
        }
    }

    /// Summary view for snapshots.
    #[must_use]
    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            participant_id: self.participant_id.clone(),
            connection_id: self.connection_id.clone(),
            display_name: self.display_name.clone(),
            camera_on: self.camera_on,
            muted: self.muted,
            is_screen_sharing: self.is_screen_sharing,
            track_count: self.tracks.len(),
        }
    }
}

/// Authoritative participant registry for one session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    by_participant: HashMap<String, ParticipantRecord>,
    connection_index: HashMap<String, String>,
    pending_tracks: HashMap<String, Vec<MediaTrack>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_participant.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_participant.is_empty()
    }

    /// Insert or update a participant from a presence announcement,
    /// folding in any tracks that arrived ahead of it.
    pub fn upsert(&mut self, announcement: &ParticipantAnnouncement) {
        if let Some(existing) = self.by_participant.get_mut(&announcement.participant_id) {
            // Same participant under a (possibly) new connection: keep
            // tracks only if the connection is unchanged.
            if existing.connection_id != announcement.connection_id {
                self.connection_index.remove(&existing.connection_id);
                existing.tracks.clear();
                existing.connection_id = announcement.connection_id.clone();
            }
            existing.display_name = announcement.display_name.clone();
            existing.camera_on = announcement.camera_on;
            existing.muted = announcement.muted;
            existing.is_screen_sharing = announcement.is_screen_sharing;
        } else {
            self.by_participant.insert(
                announcement.participant_id.clone(),
                ParticipantRecord::from_announcement(announcement),
            );
        }

        self.connection_index.insert(
            announcement.connection_id.clone(),
            announcement.participant_id.clone(),
        );

        if let Some(parked) = self.pending_tracks.remove(&announcement.connection_id) {
            if let Some(record) = self.by_participant.get_mut(&announcement.participant_id) {
                for track in parked {
                    record.tracks.insert(track.kind, track);
                }
            }
        }
    }

    /// Remove the participant currently routed through `connection_id`.
    ///
    /// A stale connection id (already replaced by reconnection) is a
    /// no-op, not an error: a late `user-left` must not remove the live
    /// record.
    pub fn remove_by_connection(&mut self, connection_id: &str) -> Option<ParticipantRecord> {
        let participant_id = self.connection_index.get(connection_id)?.clone();
        let record = self.by_participant.get(&participant_id)?;
        if record.connection_id != connection_id {
            debug!(
                target: "atrium.registry",
                connection_id = %connection_id,
                "Stale connection removal ignored"
            );
            return None;
        }
        self.connection_index.remove(connection_id);
        self.pending_tracks.remove(connection_id);
        self.by_participant.remove(&participant_id)
    }

    /// Remove a participant by stable id.
    pub fn remove_by_participant(&mut self, participant_id: &str) -> Option<ParticipantRecord> {
        let record = self.by_participant.remove(participant_id)?;
        self.connection_index.remove(&record.connection_id);
        self.pending_tracks.remove(&record.connection_id);
        Some(record)
    }

    /// Resolve the durable stream key for a connection: the participant id
    /// when known, otherwise the connection id itself.
    #[must_use]
    pub fn resolve_stream_key(&self, connection_id: &str) -> String {
        self.connection_index
            .get(connection_id)
            .cloned()
            .unwrap_or_else(|| connection_id.to_string())
    }

    /// Look up a participant by its current connection id.
    #[must_use]
    pub fn by_connection(&self, connection_id: &str) -> Option<&ParticipantRecord> {
        let participant_id = self.connection_index.get(connection_id)?;
        self.by_participant.get(participant_id)
    }

    /// Look up a participant by stable id.
    #[must_use]
    pub fn by_participant(&self, participant_id: &str) -> Option<&ParticipantRecord> {
        self.by_participant.get(participant_id)
    }

    /// Record an inbound media track. If the owning participant record is
    /// not known yet the track is parked, keyed by connection id; it is
    /// never dropped.
    pub fn add_remote_track(&mut self, connection_id: &str, track: MediaTrack) {
        if let Some(participant_id) = self.connection_index.get(connection_id) {
            if let Some(record) = self.by_participant.get_mut(participant_id) {
                record.tracks.insert(track.kind, track);
                return;
            }
        }
        debug!(
            target: "atrium.registry",
            connection_id = %connection_id,
            kind = ?track.kind,
            "Parking track for unknown connection"
        );
        self.pending_tracks
            .entry(connection_id.to_string())
            .or_default()
            .push(track);
    }

    /// Drop any media parked under a connection id (used when a reconnect
    /// invalidates the old connection).
    pub fn discard_pending(&mut self, connection_id: &str) {
        self.pending_tracks.remove(connection_id);
    }

    /// Number of tracks parked for unknown connections.
    #[must_use]
    pub fn pending_track_count(&self) -> usize {
        self.pending_tracks.values().map(Vec::len).sum()
    }

    /// Apply an authoritative camera/mute broadcast. Overwrites any local
    /// optimistic value unconditionally.
    pub fn apply_camera_state(&mut self, participant_id: &str, camera_on: bool, muted: bool) {
        if let Some(record) = self.by_participant.get_mut(participant_id) {
            record.camera_on = camera_on;
            record.muted = muted;
        }
    }

    /// Mark the participant behind a connection as sharing (or not).
    pub fn set_screen_sharing(&mut self, connection_id: &str, sharing: bool) {
        if let Some(participant_id) = self.connection_index.get(connection_id) {
            if let Some(record) = self.by_participant.get_mut(participant_id) {
                record.is_screen_sharing = sharing;
            }
        }
    }

    /// Iterate all participant records.
    pub fn participants(&self) -> impl Iterator<Item = &ParticipantRecord> {
        self.by_participant.values()
    }

    /// Clear everything (session teardown).
    pub fn clear(&mut self) {
        self.by_participant.clear();
        self.connection_index.clear();
        self.pending_tracks.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn announcement(participant_id: &str, connection_id: &str) -> ParticipantAnnouncement {
        ParticipantAnnouncement {
            participant_id: participant_id.to_string(),
            connection_id: connection_id.to_string(),
            display_name: format!("User {participant_id}"),
            camera_on: true,
            muted: false,
            is_screen_sharing: false,
        }
    }

    fn track(id: &str, kind: TrackKind) -> MediaTrack {
        MediaTrack {
            id: id.to_string(),
            kind,
            label: String::new(),
            width: None,
            height: None,
        }
    }

    #[test]
    fn test_upsert_and_resolve() {
        let mut registry = SessionRegistry::new();
        registry.upsert(&announcement("alice", "c1"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve_stream_key("c1"), "alice");
        assert_eq!(registry.resolve_stream_key("c-unknown"), "c-unknown");
        assert!(registry.by_connection("c1").is_some());
    }

    #[test]
    fn test_track_before_record_is_parked_then_folded() {
        let mut registry = SessionRegistry::new();

        registry.add_remote_track("c1", track("t-audio", TrackKind::Audio));
        registry.add_remote_track("c1", track("t-video", TrackKind::Camera));
        assert_eq!(registry.pending_track_count(), 2);

        registry.upsert(&announcement("alice", "c1"));
        assert_eq!(registry.pending_track_count(), 0);

        let record = registry.by_participant("alice").unwrap();
        assert_eq!(record.tracks.len(), 2);
        assert!(record.tracks.contains_key(&TrackKind::Audio));
    }

    #[test]
    fn test_track_after_record_goes_straight_in() {
        let mut registry = SessionRegistry::new();
        registry.upsert(&announcement("alice", "c1"));
        registry.add_remote_track("c1", track("t-audio", TrackKind::Audio));
        assert_eq!(registry.pending_track_count(), 0);
        assert_eq!(registry.by_participant("alice").unwrap().tracks.len(), 1);
    }

    #[test]
    fn test_stale_connection_removal_is_noop() {
        let mut registry = SessionRegistry::new();
        registry.upsert(&announcement("alice", "c1"));
        // Reconnect re-keys alice to c2.
        registry.upsert(&announcement("alice", "c2"));

        // A late user-left for the replaced connection must not remove the
        // live record.
        assert!(registry.remove_by_connection("c1").is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.by_participant("alice").unwrap().connection_id,
            "c2"
        );

        assert!(registry.remove_by_connection("c2").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reconnect_discards_old_tracks() {
        let mut registry = SessionRegistry::new();
        registry.upsert(&announcement("alice", "c1"));
        registry.add_remote_track("c1", track("t-audio", TrackKind::Audio));

        registry.upsert(&announcement("alice", "c2"));
        let record = registry.by_participant("alice").unwrap();
        assert!(record.tracks.is_empty());
        assert_eq!(registry.resolve_stream_key("c2"), "alice");
    }

    #[test]
    fn test_authoritative_state_overwrites() {
        let mut registry = SessionRegistry::new();
        registry.upsert(&announcement("alice", "c1"));

        registry.apply_camera_state("alice", false, true);
        let record = registry.by_participant("alice").unwrap();
        assert!(!record.camera_on);
        assert!(record.muted);

        registry.set_screen_sharing("c1", true);
        assert!(registry.by_participant("alice").unwrap().is_screen_sharing);
    }

    #[test]
    fn test_remove_by_participant_clears_indexes() {
        let mut registry = SessionRegistry::new();
        registry.upsert(&announcement("alice", "c1"));
        registry.add_remote_track("c1", track("t", TrackKind::Camera));

        let removed = registry.remove_by_participant("alice").unwrap();
        assert_eq!(removed.connection_id, "c1");
        assert_eq!(registry.resolve_stream_key("c1"), "c1");
        assert_eq!(registry.pending_track_count(), 0);
    }
}
