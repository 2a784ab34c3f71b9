//! Atrium audio capture pipeline.
//!
//! Turns a live microphone sample stream into bounded speech segments for
//! the captioning collaborator, with a supervised chunked fallback for
//! environments where the sample-level tap is unavailable.
//!
//! Two paths:
//!
//! - **Primary** ([`pipeline::AudioCapturePipeline`]): accumulate raw
//!   samples into ~1 second windows, classify each by RMS energy, emit
//!   voice-active windows (plus one trailing silent window per utterance)
//!   as mono 16-bit PCM WAV containers.
//! - **Fallback** ([`fallback::FallbackRecorder`]): a chunked recorder
//!   emitting ~8 second compressed containers on a timer, restarted by a
//!   watchdog when it stops unexpectedly, and suppressed while the
//!   primary path is healthy.
//!
//! Emission never blocks on the network: segments are enqueued and the
//! capture loop continues; a congested downstream drops segments.

#![warn(clippy::pedantic)]

pub mod fallback;
pub mod pipeline;
pub mod segmenter;
pub mod wav;

pub use fallback::{ChunkRecorder, FallbackRecorder, RecorderError};
pub use pipeline::{AudioCapturePipeline, EncodedSegment, PipelineConfig};
pub use segmenter::{AudioSegment, SegmenterConfig, VoiceSegmenter};
