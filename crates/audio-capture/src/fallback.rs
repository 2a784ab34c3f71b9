//! Supervised chunked fallback recorder.
//!
//! Some environments cannot tap raw samples; they still get captions
//! through a chunked recorder that produces ~8 second compressed
//! containers on a timer. A watchdog supervises the recorder task and
//! restarts it when it stops unexpectedly. While the primary path is
//! healthy the fallback stays silent so segments are never emitted
//! twice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pipeline::EncodedSegment;

/// Default fallback chunk length.
pub const DEFAULT_CHUNK_SECONDS: u64 = 8;

/// Delay before the watchdog restarts a stopped recorder.
const RESTART_DELAY: Duration = Duration::from_millis(500);

/// Error type for chunk recording.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// The underlying recorder stopped or failed mid-chunk.
    #[error("Recorder stopped: {0}")]
    Stopped(String),
}

/// Platform chunked recorder (e.g. a compressed-container encoder).
#[async_trait]
pub trait ChunkRecorder: Send + Sync {
    /// Container MIME type this recorder produces.
    fn mime_type(&self) -> &'static str;

    /// Record one chunk of the given duration.
    async fn record_chunk(&self, duration: Duration) -> Result<Bytes, RecorderError>;
}

/// Watchdog-supervised fallback recorder.
pub struct FallbackRecorder {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl FallbackRecorder {
    /// Spawn the supervisor.
    ///
    /// `primary_alive` reflects the health of the primary capture path;
    /// while it reads `true` the fallback records nothing.
    #[must_use]
    pub fn spawn(
        recorder: Arc<dyn ChunkRecorder>,
        chunk_duration: Duration,
        primary_alive: watch::Receiver<bool>,
        segments: mpsc::Sender<EncodedSegment>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            recorder,
            chunk_duration,
            primary_alive,
            segments,
            cancel.clone(),
        ));
        Self { cancel, task }
    }

    /// Stop the supervisor and the recorder task.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// The watchdog: keeps one recorder task alive until cancellation.
/// Restart logic lives here, decoupled from the emission loop itself.
async fn supervise(
    recorder: Arc<dyn ChunkRecorder>,
    chunk_duration: Duration,
    primary_alive: watch::Receiver<bool>,
    segments: mpsc::Sender<EncodedSegment>,
    cancel: CancellationToken,
) {
    loop {
        let worker_cancel = cancel.child_token();
        let mut worker = tokio::spawn(record_loop(
            Arc::clone(&recorder),
            chunk_duration,
            primary_alive.clone(),
            segments.clone(),
            worker_cancel.clone(),
        ));

        tokio::select! {
            () = cancel.cancelled() => {
                worker_cancel.cancel();
                let _ = worker.await;
                break;
            }

            result = &mut worker => {
                if cancel.is_cancelled() {
                    break;
                }
                match result {
                    Ok(Ok(())) => {
                        debug!(target: "atrium.audio", "Fallback recorder ended");
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!(
                            target: "atrium.audio",
                            error = %e,
                            "Fallback recorder stopped unexpectedly, restarting"
                        );
                    }
                    Err(e) => {
                        warn!(
                            target: "atrium.audio",
                            error = %e,
                            "Fallback recorder task died, restarting"
                        );
                    }
                }
                tokio::time::sleep(RESTART_DELAY).await;
                if cancel.is_cancelled() {
                    break;
                }
            }
        }
    }
}

async fn record_loop(
    recorder: Arc<dyn ChunkRecorder>,
    chunk_duration: Duration,
    primary_alive: watch::Receiver<bool>,
    segments: mpsc::Sender<EncodedSegment>,
    cancel: CancellationToken,
) -> Result<(), RecorderError> {
    let mut ticker = tokio::time::interval(chunk_duration);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so chunks align to the
    // chunk duration.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),

            _ = ticker.tick() => {
                if *primary_alive.borrow() {
                    // Primary path healthy: no double emission.
                    continue;
                }
                let container = recorder.record_chunk(chunk_duration).await?;
                let encoded = EncodedSegment {
                    payload: container,
                    mime_type: recorder.mime_type(),
                    is_voice: true,
                    duration_ms: (chunk_duration.as_millis() as u32),
                };
                if segments.try_send(encoded).is_err() {
                    warn!(
                        target: "atrium.audio",
                        "Fallback chunk dropped, downstream congested"
                    );
                }
            }
        }
    }
}
