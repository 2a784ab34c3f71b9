//! # Session Test Utilities
//!
//! Shared fakes for testing the Atrium session core without real media,
//! directory, or transcription infrastructure.
//!
//! - [`FakeMediaEndpoint`] - scripted media layer with an operation log,
//!   so tests can assert ordering (e.g. teardown-before-create during
//!   reconnection)
//! - [`FakeDirectory`] - canned meeting metadata
//! - [`FakeTranscriber`] - canned caption results or failures
//! - [`MemoryRecordingSink`] - records upload calls

pub mod collaborators;
pub mod media;

pub use collaborators::{FakeDirectory, FakeTranscriber, MemoryRecordingSink, TranscriberScript};
pub use media::FakeMediaEndpoint;

/// Install a test subscriber honoring `RUST_LOG`. Safe to call from
/// every test; only the first call wins.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
