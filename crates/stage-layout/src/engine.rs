//! `StageLayoutEngine` - memoized, incrementally-updated layout.
//!
//! The engine keeps the ring assignment of every participant between
//! calls. A call with unchanged inputs returns the cached map without
//! touching any position. When the participant set changes, only the
//! rings whose membership actually changed are recomputed; everyone
//! else keeps their position, so tiles do not jump around on unrelated
//! updates.

use std::collections::BTreeMap;

use tracing::debug;

use crate::geometry::{
    host_position, ring_capacity, slot_position, StagePosition, StageSize,
};

/// Memoizing layout engine for one stage.
#[derive(Debug, Default)]
pub struct StageLayoutEngine {
    stage: Option<StageSize>,
    tile_px: f32,
    host: Option<String>,
    /// Persistent ring membership, in slot order. Index 0 is ring 1.
    rings: Vec<Vec<String>>,
    positions: BTreeMap<String, StagePosition>,
    /// Keys repositioned by the most recent call. Empty on a memo hit.
    last_recomputed: Vec<String>,
}

impl StageLayoutEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys repositioned by the most recent [`positions`](Self::positions)
    /// call. Empty when the call was a memo hit.
    #[must_use]
    pub fn last_recomputed(&self) -> &[String] {
        &self.last_recomputed
    }

    /// The ring a key currently sits on (1-based), if assigned.
    #[must_use]
    pub fn ring_of(&self, key: &str) -> Option<usize> {
        self.rings
            .iter()
            .position(|ring| ring.iter().any(|k| k == key))
            .map(|i| i + 1)
    }

    /// Compute (or reuse) positions for the given participant set.
    ///
    /// Recomputation triggers only when the sorted non-host key set, the
    /// host, the stage size, or the tile size changed.
    pub fn positions(
        &mut self,
        keys: &[String],
        host_key: Option<&str>,
        stage: StageSize,
        tile_px: f32,
    ) -> &BTreeMap<String, StagePosition> {
        let host = host_key
            .filter(|h| keys.iter().any(|k| k == h))
            .map(str::to_string);

        let mut requested: Vec<&String> = keys
            .iter()
            .filter(|k| Some(k.as_str()) != host.as_deref())
            .collect();
        requested.sort();
        requested.dedup();

        let mut current: Vec<&String> = self.rings.iter().flatten().collect();
        current.sort();

        let geometry_unchanged =
            self.stage == Some(stage) && self.tile_px == tile_px && self.host == host;

        if geometry_unchanged && requested == current {
            self.last_recomputed.clear();
            return &self.positions;
        }

        if geometry_unchanged {
            self.update_membership(&requested, stage, tile_px);
        } else {
            self.rebuild(&requested, host, stage, tile_px);
        }

        debug!(
            target: "atrium.layout",
            participants = requested.len(),
            recomputed = self.last_recomputed.len(),
            "Stage layout updated"
        );
        &self.positions
    }

    /// Full rebuild: sorted keys fill rings from the inside out.
    fn rebuild(
        &mut self,
        requested: &[&String],
        host: Option<String>,
        stage: StageSize,
        tile_px: f32,
    ) {
        self.stage = Some(stage);
        self.tile_px = tile_px;
        self.host = host;
        self.rings.clear();
        self.positions.clear();
        self.last_recomputed.clear();

        if let Some(host) = self.host.clone() {
            self.positions
                .insert(host.clone(), host_position(stage, tile_px));
            self.last_recomputed.push(host);
        }

        let mut remaining = requested;
        let mut ring_index = 1;
        while !remaining.is_empty() {
            let take = ring_capacity(ring_index, tile_px).min(remaining.len());
            let (members, rest) = remaining.split_at(take);
            self.rings
                .push(members.iter().map(|k| (*k).clone()).collect());
            remaining = rest;
            ring_index += 1;
        }

        for ring_index in 1..=self.rings.len() {
            self.reposition_ring(ring_index, stage, tile_px);
        }
    }

    /// Incremental update: departed keys free their slots, new keys take
    /// the first free slot from the inside out, and only rings whose
    /// membership changed are repositioned.
    fn update_membership(&mut self, requested: &[&String], stage: StageSize, tile_px: f32) {
        self.last_recomputed.clear();
        let mut dirty: Vec<usize> = Vec::new();

        // Departures.
        for (index, ring) in self.rings.iter_mut().enumerate() {
            let before = ring.len();
            ring.retain(|key| {
                let keep = requested.iter().any(|r| *r == key);
                if !keep {
                    self.positions.remove(key);
                }
                keep
            });
            if ring.len() != before {
                dirty.push(index + 1);
            }
        }

        // Arrivals, in sorted order, into the first ring with room.
        for key in requested {
            if self.ring_of(key).is_some() {
                continue;
            }
            let free_ring = self
                .rings
                .iter()
                .enumerate()
                .find_map(|(index, ring)| {
                    (ring.len() < ring_capacity(index + 1, tile_px)).then_some(index)
                });
            match free_ring {
                Some(index) => {
                    if let Some(ring) = self.rings.get_mut(index) {
                        ring.push((*key).clone());
                    }
                    dirty.push(index + 1);
                }
                None => {
                    self.rings.push(vec![(*key).clone()]);
                    dirty.push(self.rings.len());
                }
            }
        }

        // Drop empty trailing rings so they do not accumulate.
        while self.rings.last().is_some_and(Vec::is_empty) {
            self.rings.pop();
        }

        dirty.sort_unstable();
        dirty.dedup();
        for ring_index in dirty {
            self.reposition_ring(ring_index, stage, tile_px);
        }
    }

    fn reposition_ring(&mut self, ring_index: usize, stage: StageSize, tile_px: f32) {
        let Some(ring) = self.rings.get(ring_index - 1) else {
            return;
        };
        let occupancy = ring.len();
        for (slot, key) in ring.iter().enumerate() {
            self.positions.insert(
                key.clone(),
                slot_position(ring_index, slot, occupancy, stage, tile_px),
            );
            self.last_recomputed.push(key.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("p{i:03}")).collect()
    }

    const STAGE: StageSize = StageSize::new(4000.0, 4000.0);
    const TILE: f32 = 64.0;

    #[test]
    fn test_idempotent_for_fixed_inputs() {
        let mut engine = StageLayoutEngine::new();
        let participants = keys(8);

        let first = engine
            .positions(&participants, Some("p000"), STAGE, TILE)
            .clone();
        let second = engine
            .positions(&participants, Some("p000"), STAGE, TILE)
            .clone();

        assert_eq!(first, second);
        // Second call was a pure memo hit.
        assert!(engine.last_recomputed().is_empty());
    }

    #[test]
    fn test_matches_one_shot_layout_on_first_compute() {
        let mut engine = StageLayoutEngine::new();
        let participants = keys(12);

        let from_engine = engine
            .positions(&participants, Some("p000"), STAGE, TILE)
            .clone();
        let one_shot =
            crate::geometry::compute_positions(&participants, Some("p000"), STAGE, TILE);
        assert_eq!(from_engine, one_shot);
    }

    #[test]
    fn test_adding_participant_touches_only_its_ring() {
        let mut engine = StageLayoutEngine::new();
        // Enough participants to spill into ring 2 (ring 1 holds 10 at
        // this tile size).
        let participants = keys(13);
        let before = engine.positions(&participants, None, STAGE, TILE).clone();

        let ring_one: Vec<String> = participants
            .iter()
            .filter(|k| engine.ring_of(k) == Some(1))
            .cloned()
            .collect();
        assert!(!ring_one.is_empty());

        let mut grown = participants.clone();
        grown.push("p999".to_string());
        let after = engine.positions(&grown, None, STAGE, TILE).clone();

        // The newcomer lands on ring 2; ring 1 members keep their spots.
        assert_eq!(engine.ring_of("p999"), Some(2));
        for key in &ring_one {
            assert_eq!(before.get(key), after.get(key), "{key} must not move");
        }
        assert!(after.contains_key("p999"));
        assert!(!engine.last_recomputed().iter().any(|k| ring_one.contains(k)));
    }

    #[test]
    fn test_removal_frees_slot_without_touching_other_rings() {
        let mut engine = StageLayoutEngine::new();
        let participants = keys(13);
        let before = engine.positions(&participants, None, STAGE, TILE).clone();

        let ring_two: Vec<String> = participants
            .iter()
            .filter(|k| engine.ring_of(k) == Some(2))
            .cloned()
            .collect();
        let departing = ring_two.first().unwrap().clone();

        let shrunk: Vec<String> = participants
            .iter()
            .filter(|k| **k != departing)
            .cloned()
            .collect();
        let after = engine.positions(&shrunk, None, STAGE, TILE).clone();

        assert!(!after.contains_key(&departing));
        // Ring 1 never moved.
        for key in participants.iter().filter(|k| engine.ring_of(k) == Some(1)) {
            assert_eq!(before.get(key), after.get(key));
        }
    }

    #[test]
    fn test_returning_key_reuses_a_free_slot() {
        let mut engine = StageLayoutEngine::new();
        let participants = keys(5);
        engine.positions(&participants, None, STAGE, TILE);

        let shrunk: Vec<String> = participants.iter().skip(1).cloned().collect();
        engine.positions(&shrunk, None, STAGE, TILE);
        assert_eq!(engine.ring_of("p000"), None);

        let positions = engine.positions(&participants, None, STAGE, TILE).clone();
        assert_eq!(positions.len(), 5);
        assert_eq!(engine.ring_of("p000"), Some(1));
    }

    #[test]
    fn test_stage_resize_forces_full_recompute() {
        let mut engine = StageLayoutEngine::new();
        let participants = keys(6);
        engine.positions(&participants, None, STAGE, TILE);

        let resized = StageSize::new(1280.0, 720.0);
        engine.positions(&participants, None, resized, TILE);
        assert_eq!(engine.last_recomputed().len(), 6);
    }

    #[test]
    fn test_host_change_forces_full_recompute() {
        let mut engine = StageLayoutEngine::new();
        let participants = keys(6);
        engine.positions(&participants, Some("p000"), STAGE, TILE);

        let positions = engine
            .positions(&participants, Some("p001"), STAGE, TILE)
            .clone();
        // New host is centered; former host moved onto a ring.
        let host = positions.get("p001").unwrap();
        assert!((host.left - (2000.0 - TILE / 2.0)).abs() < f32::EPSILON);
        assert_eq!(engine.ring_of("p000"), Some(1));
        assert_eq!(engine.ring_of("p001"), None);
    }

    #[test]
    fn test_unrelated_recompute_does_not_happen() {
        let mut engine = StageLayoutEngine::new();
        let participants = keys(4);

        engine.positions(&participants, None, STAGE, TILE);
        // Same set in a different order is still a memo hit.
        let mut shuffled = participants.clone();
        shuffled.reverse();
        engine.positions(&shuffled, None, STAGE, TILE);
        assert!(engine.last_recomputed().is_empty());
    }
}
