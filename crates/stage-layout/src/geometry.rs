//! Ring geometry: radii, capacities, and slot positions.

use std::collections::BTreeMap;

/// Minimum center-to-center spacing, as a multiple of tile size.
pub const MIN_DISTANCE_FACTOR: f32 = 0.85;

/// Radius increment between rings, as a multiple of tile size.
pub const RING_GAP_FACTOR: f32 = 0.9;

/// Base offset of the first ring, as a multiple of tile size.
pub const FIRST_RING_OFFSET_FACTOR: f32 = 0.5;

/// Per-ring angular stagger in radians, so rings do not align into
/// radial spokes.
pub const ANGULAR_STAGGER: f32 = 0.35;

/// Stage viewport size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageSize {
    pub width: f32,
    pub height: f32,
}

impl StageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Top-left position of one tile in stage-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagePosition {
    pub left: f32,
    pub top: f32,
}

/// Tile edge length for a given participant count, in pixels.
#[must_use]
pub const fn tile_size_for_count(count: usize) -> f32 {
    match count {
        0..=2 => 230.0,
        3..=6 => 160.0,
        7..=12 => 120.0,
        13..=20 => 90.0,
        _ => 64.0,
    }
}

/// Radius of the given ring (1-based), in pixels.
#[must_use]
pub fn ring_radius(ring_index: usize, tile_px: f32) -> f32 {
    ring_index as f32 * (tile_px * RING_GAP_FACTOR) + tile_px * FIRST_RING_OFFSET_FACTOR
}

/// How many tiles fit on the given ring without dropping below the
/// minimum center-to-center spacing.
#[must_use]
pub fn ring_capacity(ring_index: usize, tile_px: f32) -> usize {
    let circumference = 2.0 * std::f32::consts::PI * ring_radius(ring_index, tile_px);
    let capacity = (circumference / (tile_px * MIN_DISTANCE_FACTOR)).floor() as usize;
    capacity.max(1)
}

/// Position of slot `slot` on ring `ring_index` holding `occupancy`
/// tiles, clamped to stage bounds.
#[must_use]
pub fn slot_position(
    ring_index: usize,
    slot: usize,
    occupancy: usize,
    stage: StageSize,
    tile_px: f32,
) -> StagePosition {
    let radius = ring_radius(ring_index, tile_px);
    let angle = 2.0 * std::f32::consts::PI * slot as f32 / occupancy.max(1) as f32
        + ring_index as f32 * ANGULAR_STAGGER;

    let center_x = stage.width / 2.0;
    let center_y = stage.height / 2.0;
    let left = center_x + angle.cos() * radius - tile_px / 2.0;
    let top = center_y + angle.sin() * radius - tile_px / 2.0;
    clamp_to_stage(left, top, stage, tile_px)
}

/// Position of the host tile: stage center.
#[must_use]
pub fn host_position(stage: StageSize, tile_px: f32) -> StagePosition {
    clamp_to_stage(
        stage.width / 2.0 - tile_px / 2.0,
        stage.height / 2.0 - tile_px / 2.0,
        stage,
        tile_px,
    )
}

fn clamp_to_stage(left: f32, top: f32, stage: StageSize, tile_px: f32) -> StagePosition {
    let max_left = (stage.width - tile_px).max(0.0);
    let max_top = (stage.height - tile_px).max(0.0);
    StagePosition {
        left: left.clamp(0.0, max_left),
        top: top.clamp(0.0, max_top),
    }
}

/// One-shot deterministic layout: host centered, remaining keys sorted
/// and placed onto rings in order.
#[must_use]
pub fn compute_positions(
    keys: &[String],
    host_key: Option<&str>,
    stage: StageSize,
    tile_px: f32,
) -> BTreeMap<String, StagePosition> {
    let mut positions = BTreeMap::new();

    let mut others: Vec<&String> = keys
        .iter()
        .filter(|k| Some(k.as_str()) != host_key)
        .collect();
    others.sort();
    others.dedup();

    if let Some(host) = host_key {
        if keys.iter().any(|k| k == host) {
            positions.insert(host.to_string(), host_position(stage, tile_px));
        }
    }

    let mut ring_index = 1;
    let mut remaining = others.as_slice();
    while !remaining.is_empty() {
        let capacity = ring_capacity(ring_index, tile_px);
        let take = capacity.min(remaining.len());
        let (ring_members, rest) = remaining.split_at(take);
        for (slot, key) in ring_members.iter().enumerate() {
            positions.insert(
                (*key).clone(),
                slot_position(ring_index, slot, take, stage, tile_px),
            );
        }
        remaining = rest;
        ring_index += 1;
    }

    positions
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn distance(a: StagePosition, b: StagePosition) -> f32 {
        ((a.left - b.left).powi(2) + (a.top - b.top).powi(2)).sqrt()
    }

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("p{i:03}")).collect()
    }

    #[test]
    fn test_tile_size_bands() {
        assert_eq!(tile_size_for_count(1), 230.0);
        assert_eq!(tile_size_for_count(2), 230.0);
        assert_eq!(tile_size_for_count(6), 160.0);
        assert_eq!(tile_size_for_count(12), 120.0);
        assert_eq!(tile_size_for_count(20), 90.0);
        assert_eq!(tile_size_for_count(50), 64.0);
    }

    #[test]
    fn test_ring_capacity_grows_with_radius() {
        let tile = 120.0;
        assert!(ring_capacity(1, tile) < ring_capacity(2, tile));
        assert!(ring_capacity(2, tile) < ring_capacity(3, tile));
        assert!(ring_capacity(1, tile) >= 1);
    }

    #[test]
    fn test_compute_positions_is_deterministic() {
        let keys = keys(15);
        let stage = StageSize::new(1280.0, 800.0);
        let first = compute_positions(&keys, Some("p000"), stage, 90.0);
        let second = compute_positions(&keys, Some("p000"), stage, 90.0);
        assert_eq!(first, second);
        assert_eq!(first.len(), 15);
    }

    #[test]
    fn test_host_is_centered() {
        let keys = keys(5);
        let stage = StageSize::new(1000.0, 800.0);
        let tile = 160.0;
        let positions = compute_positions(&keys, Some("p002"), stage, tile);
        let host = positions.get("p002").unwrap();
        assert!((host.left - (500.0 - 80.0)).abs() < f32::EPSILON);
        assert!((host.top - (400.0 - 80.0)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_minimum_spacing_within_rings() {
        // Unclamped geometry: a large stage so positions keep their ring
        // shape.
        let keys = keys(30);
        let tile = 64.0;
        let stage = StageSize::new(4000.0, 4000.0);
        let positions = compute_positions(&keys, None, stage, tile);

        let min_distance = tile * MIN_DISTANCE_FACTOR;
        let all: Vec<(&String, &StagePosition)> = positions.iter().collect();
        for (i, (key_a, pos_a)) in all.iter().enumerate() {
            for (key_b, pos_b) in all.iter().skip(i + 1) {
                let d = distance(**pos_a, **pos_b);
                assert!(
                    d >= min_distance * 0.99,
                    "{key_a} and {key_b} overlap: {d} < {min_distance}"
                );
            }
        }
    }

    #[test]
    fn test_positions_clamped_to_stage() {
        // A stage far too small for the ring radii.
        let keys = keys(25);
        let tile = 90.0;
        let stage = StageSize::new(400.0, 300.0);
        let positions = compute_positions(&keys, None, stage, tile);

        for position in positions.values() {
            assert!(position.left >= 0.0);
            assert!(position.top >= 0.0);
            assert!(position.left <= 400.0 - tile);
            assert!(position.top <= 300.0 - tile);
        }
    }

    #[test]
    fn test_duplicate_keys_collapse() {
        let keys = vec!["a".to_string(), "a".to_string(), "b".to_string()];
        let positions = compute_positions(&keys, None, StageSize::new(800.0, 600.0), 160.0);
        assert_eq!(positions.len(), 2);
    }

    #[test]
    fn test_absent_host_key_is_not_invented() {
        let keys = keys(4);
        let positions =
            compute_positions(&keys, Some("ghost"), StageSize::new(800.0, 600.0), 160.0);
        assert_eq!(positions.len(), 4);
        assert!(!positions.contains_key("ghost"));
    }
}
