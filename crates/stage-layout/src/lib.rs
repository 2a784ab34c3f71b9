//! Atrium stage layout.
//!
//! Deterministic, collision-avoiding placement of participant tiles: the
//! host sits at stage center, everyone else on concentric rings around
//! it. Ring spacing and per-ring capacity derive from the tile size, so
//! tiles never overlap regardless of participant count.
//!
//! [`engine::StageLayoutEngine`] memoizes: positions recompute only when
//! the participant set, stage size, or tile size actually changes, and a
//! participant keeps its position unless its own ring was affected.

#![warn(clippy::pedantic)]

pub mod engine;
pub mod geometry;

pub use engine::StageLayoutEngine;
pub use geometry::{compute_positions, tile_size_for_count, StagePosition, StageSize};
