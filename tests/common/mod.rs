//! Shared test fixtures: hardware-free mock adapters

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use holo_assistant::voice::{
    PlaybackEvent, PlaybackHandle, RecognitionEvent, RecognitionHandle, SpeechInput, VoiceOutput,
};
use holo_assistant::{ChatTransport, Error, SessionId, StreamEvent, StreamHandle};

/// Scripted chat transport: records calls, emits nothing on its own
///
/// Tests feed `StreamEvent`s into the coordinator directly, tagged with the
/// coordinator's current stream generation.
#[derive(Default)]
pub struct MockTransport {
    /// Number of `open` calls observed
    pub open_calls: AtomicUsize,
    /// How many upcoming `open` calls should fail
    pub open_failures: AtomicUsize,
    /// Message text of every `stream` call
    pub streamed: Mutex<Vec<String>>,
    /// Cancellation token of every stream handle ever returned
    pub stream_tokens: Mutex<Vec<CancellationToken>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` open calls with a `SessionInit` error
    pub fn fail_opens(self: &Arc<Self>, n: usize) -> Arc<Self> {
        self.open_failures.store(n, Ordering::SeqCst);
        Arc::clone(self)
    }

    pub fn stream_count(&self) -> usize {
        self.streamed.lock().unwrap().len()
    }

    pub fn token(&self, index: usize) -> CancellationToken {
        self.stream_tokens.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn open(&self) -> holo_assistant::Result<SessionId> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.open_failures.load(Ordering::SeqCst) > 0 {
            self.open_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::SessionInit("mock init failure".to_string()));
        }
        Ok(SessionId::new("mock-session"))
    }

    fn stream(
        &self,
        _session: &SessionId,
        message: &str,
        _events: mpsc::Sender<StreamEvent>,
    ) -> StreamHandle {
        self.streamed.lock().unwrap().push(message.to_string());
        let token = CancellationToken::new();
        self.stream_tokens.lock().unwrap().push(token.clone());
        StreamHandle::new(token)
    }
}

/// Scripted voice output: records spoken text and exposes each playback's
/// event channel so tests can drive the lifecycle by hand
#[derive(Default)]
pub struct MockVoice {
    /// Every text passed to `speak`
    pub spoken: Mutex<Vec<String>>,
    /// Handle + event channel per dispatched playback
    pub playbacks: Mutex<Vec<(PlaybackHandle, mpsc::Sender<PlaybackEvent>)>>,
    /// Fail `speak` with a synthesis error
    pub fail: AtomicBool,
}

impl MockVoice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn playback_count(&self) -> usize {
        self.playbacks.lock().unwrap().len()
    }

    pub fn handle(&self, index: usize) -> PlaybackHandle {
        self.playbacks.lock().unwrap()[index].0.clone()
    }

    /// Emit a lifecycle event for playback `index`
    pub async fn emit(&self, index: usize, event: PlaybackEvent) {
        let sender = self.playbacks.lock().unwrap()[index].1.clone();
        let _ = sender.send(event).await;
    }
}

#[async_trait]
impl VoiceOutput for MockVoice {
    async fn speak(
        &self,
        text: &str,
        events: mpsc::Sender<PlaybackEvent>,
    ) -> holo_assistant::Result<PlaybackHandle> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Synthesis("mock synthesis failure".to_string()));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        let handle = PlaybackHandle::new();
        self.playbacks
            .lock()
            .unwrap()
            .push((handle.clone(), events));
        Ok(handle)
    }
}

/// Scripted speech input: records starts, never emits on its own
#[derive(Default)]
pub struct MockSpeech {
    /// Number of `start` calls observed
    pub starts: AtomicUsize,
    /// Refuse the microphone
    pub deny_permission: AtomicBool,
}

impl MockSpeech {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying() -> Arc<Self> {
        let mock = Self::default();
        mock.deny_permission.store(true, Ordering::SeqCst);
        Arc::new(mock)
    }
}

impl SpeechInput for MockSpeech {
    fn start(
        &self,
        _events: mpsc::Sender<RecognitionEvent>,
    ) -> holo_assistant::Result<RecognitionHandle> {
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied(
                "mock microphone refusal".to_string(),
            ));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(RecognitionHandle::new())
    }
}
