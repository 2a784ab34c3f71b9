//! `AudioCapturePipeline` - the primary capture path.
//!
//! Owns one background task that pulls raw sample chunks, runs them
//! through the [`VoiceSegmenter`](crate::segmenter::VoiceSegmenter), and
//! enqueues encoded segments downstream. The pipeline runs only while
//! captions are enabled: `start` and `stop` are idempotent, and `stop`
//! awaits the task so no processing callback survives it.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::segmenter::{AudioSegment, SegmenterConfig, VoiceSegmenter};

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub segmenter: SegmenterConfig,
}

impl PipelineConfig {
    /// Default tuning for the given capture rate.
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            segmenter: SegmenterConfig::new(sample_rate),
        }
    }
}

/// One encoded segment ready for the captioning path.
#[derive(Debug, Clone)]
pub struct EncodedSegment {
    pub payload: Bytes,
    pub mime_type: &'static str,
    pub is_voice: bool,
    pub duration_ms: u32,
}

struct ActiveCapture {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The primary capture pipeline.
pub struct AudioCapturePipeline {
    config: PipelineConfig,
    active: Option<ActiveCapture>,
}

impl AudioCapturePipeline {
    #[must_use]
    pub const fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    /// Whether the capture task is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start capturing from `samples`, emitting into `segments`.
    /// Idempotent: a second start while running is a no-op.
    pub fn start(
        &mut self,
        samples: mpsc::Receiver<Vec<f32>>,
        segments: mpsc::Sender<EncodedSegment>,
    ) {
        if self.active.is_some() {
            debug!(target: "atrium.audio", "Capture already running");
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(capture_loop(
            self.config.segmenter.clone(),
            samples,
            segments,
            cancel.clone(),
        ));
        self.active = Some(ActiveCapture { cancel, task });
        debug!(target: "atrium.audio", "Capture started");
    }

    /// Stop capturing. Awaits the capture task, so no segment is emitted
    /// after this returns. Idempotent.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        if let Err(e) = active.task.await {
            warn!(target: "atrium.audio", error = %e, "Capture task ended abnormally");
        }
        debug!(target: "atrium.audio", "Capture stopped");
    }
}

async fn capture_loop(
    config: SegmenterConfig,
    mut samples: mpsc::Receiver<Vec<f32>>,
    segments: mpsc::Sender<EncodedSegment>,
    cancel: CancellationToken,
) {
    let mut segmenter = VoiceSegmenter::new(config);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,

            chunk = samples.recv() => {
                match chunk {
                    Some(chunk) => {
                        for segment in segmenter.push(&chunk) {
                            emit(&segments, &segment);
                        }
                    }
                    None => {
                        debug!(target: "atrium.audio", "Sample source ended");
                        break;
                    }
                }
            }
        }
    }

    // Finish the phrase in flight, if any.
    if let Some(segment) = segmenter.flush() {
        emit(&segments, &segment);
    }
}

/// Enqueue-and-continue: the capture loop never blocks on downstream.
fn emit(segments: &mpsc::Sender<EncodedSegment>, segment: &AudioSegment) {
    let encoded = EncodedSegment {
        payload: segment.to_wav(),
        mime_type: "audio/wav",
        is_voice: segment.is_voice,
        duration_ms: segment.duration_ms(),
    };
    if segments.try_send(encoded).is_err() {
        warn!(
            target: "atrium.audio",
            duration_ms = segment.duration_ms(),
            "Segment dropped, downstream congested"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pipeline() -> AudioCapturePipeline {
        AudioCapturePipeline::new(PipelineConfig::new(100))
    }

    fn voice_chunk(windows: usize) -> Vec<f32> {
        (0..windows * 100)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect()
    }

    #[tokio::test]
    async fn test_voice_flows_through_as_wav() {
        let mut pipeline = pipeline();
        let (samples_tx, samples_rx) = mpsc::channel(16);
        let (segments_tx, mut segments_rx) = mpsc::channel(16);

        pipeline.start(samples_rx, segments_tx);
        samples_tx.send(voice_chunk(2)).await.unwrap();

        for _ in 0..2 {
            let segment = tokio::time::timeout(Duration::from_secs(1), segments_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(segment.is_voice);
            assert_eq!(segment.mime_type, "audio/wav");
            assert_eq!(segment.duration_ms, 1000);
            let (rate, decoded) =
                crate::wav::decode_wav(&mut segment.payload.clone()).unwrap();
            assert_eq!(rate, 100);
            assert_eq!(decoded.len(), 100);
        }

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_silence_emits_nothing() {
        let mut pipeline = pipeline();
        let (samples_tx, samples_rx) = mpsc::channel(16);
        let (segments_tx, mut segments_rx) = mpsc::channel(16);

        pipeline.start(samples_rx, segments_tx);
        samples_tx.send(vec![0.0; 500]).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(100), segments_rx.recv()).await;
        assert!(result.is_err(), "silence must not produce segments");

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let mut pipeline = pipeline();
        let (_samples_tx, samples_rx) = mpsc::channel::<Vec<f32>>(1);
        let (segments_tx, _segments_rx) = mpsc::channel(1);

        assert!(!pipeline.is_active());
        pipeline.start(samples_rx, segments_tx.clone());
        assert!(pipeline.is_active());

        // Second start is a no-op (the new receiver is simply dropped).
        let (_samples_tx2, samples_rx2) = mpsc::channel::<Vec<f32>>(1);
        pipeline.start(samples_rx2, segments_tx);
        assert!(pipeline.is_active());

        pipeline.stop().await;
        assert!(!pipeline.is_active());
        pipeline.stop().await;
        assert!(!pipeline.is_active());
    }

    #[tokio::test]
    async fn test_stop_releases_the_capture_task() {
        let mut pipeline = pipeline();
        let (samples_tx, samples_rx) = mpsc::channel(16);
        let (segments_tx, mut segments_rx) = mpsc::channel(16);

        pipeline.start(samples_rx, segments_tx);
        pipeline.stop().await;

        // The capture task is gone: its receiver is dropped and nothing
        // is emitted after stop.
        assert!(samples_tx.send(voice_chunk(1)).await.is_err());
        assert!(segments_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_congested_downstream_drops_instead_of_blocking() {
        let mut pipeline = pipeline();
        let (samples_tx, samples_rx) = mpsc::channel(16);
        // Downstream with room for a single segment.
        let (segments_tx, mut segments_rx) = mpsc::channel(1);

        pipeline.start(samples_rx, segments_tx);
        samples_tx.send(voice_chunk(10)).await.unwrap();

        // The loop keeps consuming without deadlock; exactly one segment
        // fit, the rest were dropped.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(segments_rx.recv().await.is_some());
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_source_end_flushes_trailing_voice() {
        let mut pipeline = pipeline();
        let (samples_tx, samples_rx) = mpsc::channel(16);
        let (segments_tx, mut segments_rx) = mpsc::channel(16);

        pipeline.start(samples_rx, segments_tx);
        // Half a window of voice, then the source ends.
        samples_tx.send(voice_chunk(1)[..50].to_vec()).await.unwrap();
        drop(samples_tx);

        let segment = tokio::time::timeout(Duration::from_secs(1), segments_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(segment.is_voice);
        assert_eq!(segment.duration_ms, 500);

        pipeline.stop().await;
    }
}
