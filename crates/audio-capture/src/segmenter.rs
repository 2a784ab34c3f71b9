//! Voice-activity segmentation over a rolling sample buffer.
//!
//! Raw samples accumulate until a ~1 second window is full, then the
//! window is classified by RMS energy. Voice-active windows are emitted;
//! after a voice-active run, exactly one trailing silent window is also
//! emitted so trailing speech is not truncated mid-phrase, and further
//! silence is suppressed until voice resumes.

use bytes::Bytes;

use crate::wav::encode_wav;

/// Target window length in seconds.
pub const DEFAULT_TARGET_SECONDS: f32 = 1.0;

/// RMS threshold above which a window counts as voice.
pub const DEFAULT_VAD_THRESHOLD: f32 = 0.01;

/// Segmenter tuning.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub sample_rate: u32,
    pub target_seconds: f32,
    pub vad_threshold: f32,
}

impl SegmenterConfig {
    /// Default tuning for the given capture rate.
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            target_seconds: DEFAULT_TARGET_SECONDS,
            vad_threshold: DEFAULT_VAD_THRESHOLD,
        }
    }

    fn target_samples(&self) -> usize {
        let samples = self.sample_rate as f32 * self.target_seconds;
        (samples as usize).max(1)
    }
}

/// One bounded audio segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    /// Mono 16-bit PCM samples.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Result of the RMS energy test for this window.
    pub is_voice: bool,
}

impl AudioSegment {
    /// Encode as a mono 16-bit PCM WAV container.
    #[must_use]
    pub fn to_wav(&self) -> Bytes {
        encode_wav(&self.samples, self.sample_rate)
    }

    /// Segment duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000 / u64::from(self.sample_rate)) as u32
    }
}

/// Rolling-buffer voice segmenter.
#[derive(Debug)]
pub struct VoiceSegmenter {
    config: SegmenterConfig,
    buffer: Vec<f32>,
    last_voice: bool,
}

impl VoiceSegmenter {
    #[must_use]
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            last_voice: false,
        }
    }

    /// Feed raw samples; returns every segment completed by this push.
    ///
    /// A window is emitted when it is voice-active, or when it is the
    /// first silent window after a voice-active one (the hangover that
    /// finishes the phrase). Consecutive silent windows emit nothing.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioSegment> {
        self.buffer.extend_from_slice(samples);

        let target = self.config.target_samples();
        let mut completed = Vec::new();

        while self.buffer.len() >= target {
            let window: Vec<f32> = self.buffer.drain(..target).collect();
            let is_voice = rms(&window) >= self.config.vad_threshold;
            if is_voice || self.last_voice {
                completed.push(self.segment_from(&window, is_voice));
            }
            self.last_voice = is_voice;
        }
        completed
    }

    /// Drain the partial window on stop. Emitted only when it contains
    /// voice or closes a voice-active run.
    pub fn flush(&mut self) -> Option<AudioSegment> {
        if self.buffer.is_empty() {
            return None;
        }
        let window: Vec<f32> = self.buffer.drain(..).collect();
        let is_voice = rms(&window) >= self.config.vad_threshold;
        let emit = is_voice || self.last_voice;
        self.last_voice = false;
        if emit {
            Some(self.segment_from(&window, is_voice))
        } else {
            None
        }
    }

    fn segment_from(&self, window: &[f32], is_voice: bool) -> AudioSegment {
        AudioSegment {
            samples: window.iter().map(|s| to_i16(*s)).collect(),
            sample_rate: self.config.sample_rate,
            is_voice,
        }
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

fn to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // Small rate keeps test buffers readable: 100 samples per window.
    fn segmenter() -> VoiceSegmenter {
        VoiceSegmenter::new(SegmenterConfig::new(100))
    }

    fn silence(windows: usize) -> Vec<f32> {
        vec![0.0; windows * 100]
    }

    fn voice(windows: usize) -> Vec<f32> {
        // Alternating 0.5 amplitude: RMS 0.5, well above threshold.
        (0..windows * 100)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect()
    }

    #[test]
    fn test_silent_stream_emits_no_voice_segments() {
        let mut segmenter = segmenter();
        let segments = segmenter.push(&silence(10));
        assert!(segments.iter().all(|s| !s.is_voice));
        assert!(segments.is_empty());
    }

    #[test]
    fn test_voice_windows_are_emitted() {
        let mut segmenter = segmenter();
        let segments = segmenter.push(&voice(3));
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.is_voice));
        assert_eq!(segments[0].samples.len(), 100);
        assert_eq!(segments[0].duration_ms(), 1000);
    }

    #[test]
    fn test_exactly_one_trailing_silent_segment() {
        let mut segmenter = segmenter();

        let mut input = voice(2);
        input.extend(silence(4));
        let segments = segmenter.push(&input);

        // Two voice windows, then one silent hangover, then suppression.
        assert_eq!(segments.len(), 3);
        assert!(segments[0].is_voice);
        assert!(segments[1].is_voice);
        assert!(!segments[2].is_voice);
    }

    #[test]
    fn test_hangover_resets_when_voice_resumes() {
        let mut segmenter = segmenter();

        let mut input = voice(1);
        input.extend(silence(2));
        input.extend(voice(1));
        input.extend(silence(2));
        let segments = segmenter.push(&input);

        // voice, hangover, voice, hangover.
        let flags: Vec<bool> = segments.iter().map(|s| s.is_voice).collect();
        assert_eq!(flags, vec![true, false, true, false]);
    }

    #[test]
    fn test_partial_windows_accumulate_across_pushes() {
        let mut segmenter = segmenter();

        assert!(segmenter.push(&voice(1)[..60]).is_empty());
        let segments = segmenter.push(&voice(1)[..60]);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_voice);
    }

    #[test]
    fn test_flush_emits_trailing_voice() {
        let mut segmenter = segmenter();
        segmenter.push(&voice(1)[..50]);
        let segment = segmenter.flush().unwrap();
        assert!(segment.is_voice);
        assert_eq!(segment.samples.len(), 50);
        assert!(segmenter.flush().is_none());
    }

    #[test]
    fn test_flush_suppresses_plain_silence() {
        let mut segmenter = segmenter();
        segmenter.push(&silence(1)[..50]);
        assert!(segmenter.flush().is_none());
    }

    #[test]
    fn test_sample_conversion_clamps() {
        assert_eq!(to_i16(0.0), 0);
        assert_eq!(to_i16(1.0), i16::MAX);
        assert_eq!(to_i16(-1.0), i16::MIN);
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), i16::MIN);
    }

    #[test]
    fn test_segment_encodes_as_wav() {
        let mut segmenter = segmenter();
        let segments = segmenter.push(&voice(1));
        let container = segments[0].to_wav();
        let (sample_rate, samples) = crate::wav::decode_wav(&mut container.clone()).unwrap();
        assert_eq!(sample_rate, 100);
        assert_eq!(samples.len(), 100);
    }
}
