//! Fake directory, transcriber, and recording collaborators.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use session_core::errors::SessionError;
use session_core::media::{
    AudioSubmission, MeetingDirectory, MeetingMetadata, MeetingStatus, RecordingSink, Transcriber,
};

/// Canned meeting directory.
pub struct FakeDirectory {
    host_id: Option<String>,
    status: MeetingStatus,
    fail_get: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeDirectory {
    /// A live meeting with the given metadata host.
    pub fn new(host_id: Option<&str>) -> Self {
        Self {
            host_id: host_id.map(str::to_string),
            status: MeetingStatus::Active,
            fail_get: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A meeting that has already ended.
    pub fn ended(host_id: Option<&str>) -> Self {
        let mut directory = Self::new(host_id);
        directory.status = MeetingStatus::Ended;
        directory
    }

    /// A directory whose metadata fetch fails.
    pub fn unreachable() -> Self {
        let mut directory = Self::new(None);
        directory.fail_get = true;
        directory
    }

    /// Every persistence call made, in order (e.g. `join:m1:alice`).
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock poisoned").push(call);
    }
}

#[async_trait]
impl MeetingDirectory for FakeDirectory {
    async fn get_meeting(&self, meeting_id: &str) -> Result<MeetingMetadata, SessionError> {
        self.record(format!("get:{meeting_id}"));
        if self.fail_get {
            return Err(SessionError::Directory("503 from directory".to_string()));
        }
        Ok(MeetingMetadata {
            meeting_id: meeting_id.to_string(),
            title: "Weekly Sync".to_string(),
            host_id: self.host_id.clone(),
            status: self.status,
        })
    }

    async fn join_meeting(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<(), SessionError> {
        self.record(format!("join:{meeting_id}:{participant_id}"));
        Ok(())
    }

    async fn leave_meeting(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<(), SessionError> {
        self.record(format!("leave:{meeting_id}:{participant_id}"));
        Ok(())
    }

    async fn end_meeting(&self, meeting_id: &str) -> Result<(), SessionError> {
        self.record(format!("end:{meeting_id}"));
        Ok(())
    }
}

/// What a [`FakeTranscriber`] does with each submission.
#[derive(Debug, Clone)]
pub enum TranscriberScript {
    /// Return the same caption text every time.
    FixedText(String),
    /// Describe the submission (`"<speaker>: <bytes> bytes of <mime>"`).
    EchoSize,
    /// Fail every submission.
    Fail(String),
}

/// Canned transcription collaborator.
pub struct FakeTranscriber {
    script: TranscriberScript,
    delay: Option<Duration>,
    submissions: Mutex<Vec<AudioSubmission>>,
}

impl FakeTranscriber {
    pub fn new(script: TranscriberScript) -> Self {
        Self {
            script,
            delay: None,
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Add artificial latency to every transcription.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of submissions received.
    pub fn submission_count(&self) -> usize {
        self.submissions
            .lock()
            .expect("submissions lock poisoned")
            .len()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, submission: AudioSubmission) -> Result<String, SessionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = match &self.script {
            TranscriberScript::FixedText(text) => Ok(text.clone()),
            TranscriberScript::EchoSize => Ok(format!(
                "{}: {} bytes of {}",
                submission.speaker_name,
                submission.payload.len(),
                submission.mime_type
            )),
            TranscriberScript::Fail(message) => Err(SessionError::Captioning(message.clone())),
        };
        self.submissions
            .lock()
            .expect("submissions lock poisoned")
            .push(submission);
        result
    }
}

/// Recording sink that remembers what was uploaded.
#[derive(Default)]
pub struct MemoryRecordingSink {
    uploads: Mutex<Vec<(String, usize)>>,
}

impl MemoryRecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(meeting_id, container_len)` for every upload, in order.
    pub fn uploads(&self) -> Vec<(String, usize)> {
        self.uploads.lock().expect("uploads lock poisoned").clone()
    }
}

#[async_trait]
impl RecordingSink for MemoryRecordingSink {
    async fn upload(&self, meeting_id: &str, container: Bytes) -> Result<(), SessionError> {
        self.uploads
            .lock()
            .expect("uploads lock poisoned")
            .push((meeting_id.to_string(), container.len()));
        Ok(())
    }
}
