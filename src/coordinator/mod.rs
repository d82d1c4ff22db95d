//! Session coordinator
//!
//! Single-task state machine mediating between speech input, the chat
//! transport, and voice output. Owns the conversation history, the current
//! turn state, and the only live stream/audio/recognition handles. All
//! adapter callbacks re-enter through one event queue, so transitions never
//! race; stale events from superseded handles are dropped by comparing
//! generation counters before anything is applied.

mod signal;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

pub use signal::CoordinatorSignal;

use crate::config::TuningConfig;
use crate::history::ConversationHistory;
use crate::intent::IntentClassifier;
use crate::transport::{ChatTransport, SessionId, StreamEvent, StreamHandle};
use crate::voice::{
    PlaybackEvent, PlaybackHandle, RecognitionEvent, RecognitionHandle, SpeechInput, VoiceOutput,
};
use crate::{Error, Result};

/// Placeholder content for an assistant turn that has not streamed yet
const RESPONSE_PLACEHOLDER: &str = "…";

/// Event queue capacity
const EVENT_QUEUE_SIZE: usize = 64;

/// Signal fan-out capacity
const SIGNAL_QUEUE_SIZE: usize = 64;

/// Mutually-exclusive coordinator mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing in flight; accepting input
    Idle,
    /// Speech capture running
    Listening,
    /// Utterance sent, no response content yet
    AwaitingResponse,
    /// Response chunks arriving
    StreamingResponse,
    /// Reply audio pending or playing
    Speaking,
    /// A failure is being converted into recovery; transient
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::AwaitingResponse => write!(f, "awaiting-response"),
            Self::StreamingResponse => write!(f, "streaming-response"),
            Self::Speaking => write!(f, "speaking"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Event consumed by the coordinator's queue
///
/// Adapter tasks tag every event with the generation of the handle that
/// produced it; the coordinator ignores events whose generation is no
/// longer current.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// Submit a typed utterance or a picked suggested question
    Submit(String),

    /// Toggle speech capture (cancel semantics when already listening)
    ToggleListening,

    /// Speak the configured welcome line
    Greet,

    /// Event from the in-flight chat stream
    Stream {
        /// Stream generation the event belongs to
        generation: u64,
        /// Transport event
        event: StreamEvent,
    },

    /// The early-synthesis debounce elapsed
    SynthesisDue {
        /// Stream generation the prefix belongs to
        generation: u64,
        /// Accumulated text captured when the debounce was scheduled
        text: String,
    },

    /// Synthesis/playback dispatch produced a resource handle
    AudioReady {
        /// Audio generation the handle belongs to
        generation: u64,
        /// The playback resource
        handle: PlaybackHandle,
    },

    /// Synthesis or playback dispatch failed before the resource existed
    SpeechFailed {
        /// Audio generation the failure belongs to
        generation: u64,
        /// Failure description
        message: String,
    },

    /// Lifecycle event from the current playback resource
    Playback {
        /// Audio generation the event belongs to
        generation: u64,
        /// Playback lifecycle event
        event: PlaybackEvent,
    },

    /// Event from the speech-input adapter
    Recognition {
        /// Listen generation the event belongs to
        generation: u64,
        /// Recognition event
        event: RecognitionEvent,
    },

    /// Stop the event loop
    Shutdown,
}

/// Cloneable handle for feeding the coordinator's queue
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    events: mpsc::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    /// Submit an utterance
    pub async fn submit(&self, text: impl Into<String>) {
        let _ = self.events.send(CoordinatorEvent::Submit(text.into())).await;
    }

    /// Toggle speech capture
    pub async fn toggle_listening(&self) {
        let _ = self.events.send(CoordinatorEvent::ToggleListening).await;
    }

    /// Speak the welcome line
    pub async fn greet(&self) {
        let _ = self.events.send(CoordinatorEvent::Greet).await;
    }

    /// Stop the coordinator
    pub async fn shutdown(&self) {
        let _ = self.events.send(CoordinatorEvent::Shutdown).await;
    }
}

/// The session coordinator state machine
pub struct SessionCoordinator {
    tuning: TuningConfig,
    transport: Arc<dyn ChatTransport>,
    voice: Arc<dyn VoiceOutput>,
    speech: Option<Arc<dyn SpeechInput>>,
    classifier: Arc<dyn IntentClassifier>,

    state: SessionState,
    history: ConversationHistory,
    session: Option<SessionId>,

    // Generation counters; an event is applied only if its generation
    // matches the corresponding counter
    stream_generation: u64,
    audio_generation: u64,
    listen_generation: u64,

    current_stream: Option<StreamHandle>,
    current_audio: Option<PlaybackHandle>,
    current_listen: Option<RecognitionHandle>,

    // Per-turn bookkeeping, reset on submit
    synthesis_queued: bool,
    playback_started: bool,
    scene_fired: bool,

    // Outward avatar-is-speaking signal; distinct from `Speaking` state
    speaking: bool,
    transcript: String,

    events_tx: mpsc::Sender<CoordinatorEvent>,
    events_rx: mpsc::Receiver<CoordinatorEvent>,
    signals: broadcast::Sender<CoordinatorSignal>,
}

impl SessionCoordinator {
    /// Create a coordinator wired to the given adapters
    ///
    /// Pass `speech: None` for text-only operation (voice input disabled).
    #[must_use]
    pub fn new(
        tuning: TuningConfig,
        transport: Arc<dyn ChatTransport>,
        voice: Arc<dyn VoiceOutput>,
        speech: Option<Arc<dyn SpeechInput>>,
        classifier: Arc<dyn IntentClassifier>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let (signals, _) = broadcast::channel(SIGNAL_QUEUE_SIZE);

        Self {
            tuning,
            transport,
            voice,
            speech,
            classifier,
            state: SessionState::Idle,
            history: ConversationHistory::new(),
            session: None,
            stream_generation: 0,
            audio_generation: 0,
            listen_generation: 0,
            current_stream: None,
            current_audio: None,
            current_listen: None,
            synthesis_queued: false,
            playback_started: false,
            scene_fired: false,
            speaking: false,
            transcript: String::new(),
            events_tx,
            events_rx,
            signals,
        }
    }

    /// Handle for feeding events from the presentation layer
    #[must_use]
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Subscribe to presentation signals
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorSignal> {
        self.signals.subscribe()
    }

    /// Current session state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the avatar-is-speaking signal is raised
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Read-only conversation history
    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Generation of the current stream handle
    #[must_use]
    pub const fn stream_generation(&self) -> u64 {
        self.stream_generation
    }

    /// Generation of the current audio resource
    #[must_use]
    pub const fn audio_generation(&self) -> u64 {
        self.audio_generation
    }

    /// Generation of the current recognition
    #[must_use]
    pub const fn listen_generation(&self) -> u64 {
        self.listen_generation
    }

    /// Partial transcript while listening; empty otherwise
    #[must_use]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Run the event loop until shutdown
    pub async fn run(mut self) {
        tracing::info!("session coordinator running");

        while let Some(event) = self.events_rx.recv().await {
            if matches!(event, CoordinatorEvent::Shutdown) {
                break;
            }
            self.handle_event(event).await;
        }

        self.close_stream();
        self.cancel_audio();
        self.stop_listening();
        tracing::info!("session coordinator stopped");
    }

    /// Process one queued event; public so tests can drive the machine
    /// without running the loop
    pub async fn process_next(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(CoordinatorEvent::Shutdown) | None => false,
            Some(event) => {
                self.handle_event(event).await;
                true
            }
        }
    }

    /// Apply one event to the state machine
    pub async fn handle_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Submit(text) => {
                if let Err(e) = self.submit_utterance(&text).await {
                    tracing::error!(error = %e, "submit failed");
                }
            }
            CoordinatorEvent::ToggleListening => {
                if let Err(e) = self.toggle_listening() {
                    tracing::warn!(error = %e, "listening toggle failed");
                }
            }
            CoordinatorEvent::Greet => self.greet(),
            CoordinatorEvent::Stream { generation, event } => {
                self.on_stream_event(generation, event);
            }
            CoordinatorEvent::SynthesisDue { generation, text } => {
                self.on_synthesis_due(generation, &text);
            }
            CoordinatorEvent::AudioReady { generation, handle } => {
                self.on_audio_ready(generation, handle);
            }
            CoordinatorEvent::SpeechFailed { generation, message } => {
                self.on_speech_failed(generation, &message);
            }
            CoordinatorEvent::Playback { generation, event } => {
                self.on_playback_event(generation, &event);
            }
            CoordinatorEvent::Recognition { generation, event } => {
                self.on_recognition_event(generation, event).await;
            }
            CoordinatorEvent::Shutdown => {}
        }
    }

    /// Submit a user utterance, superseding anything in flight
    ///
    /// Valid from any state: a new utterance always closes the previous
    /// stream handle and cancels active audio first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionInit`] if the conversation cannot be opened
    /// even after one retry; all later failures are converted to a spoken
    /// apology instead of an error.
    pub async fn submit_utterance(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        self.stop_listening();
        self.close_stream();
        self.cancel_audio();

        self.synthesis_queued = false;
        self.playback_started = false;
        self.scene_fired = false;

        let session = match self.ensure_session().await {
            Ok(session) => session,
            Err(e) => {
                self.set_state(SessionState::Error);
                self.emit(CoordinatorSignal::Error(e.to_string()));
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        self.history.push_user(text);
        self.emit_last_turn();
        self.history.begin_assistant(RESPONSE_PLACEHOLDER);
        self.emit_last_turn();

        self.stream_generation += 1;
        let generation = self.stream_generation;
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let handle = self.transport.stream(&session, text, tx);
        self.current_stream = Some(handle);

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if events
                    .send(CoordinatorEvent::Stream { generation, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        self.set_state(SessionState::AwaitingResponse);
        Ok(())
    }

    /// Speak the configured welcome line as an assistant turn
    pub fn greet(&mut self) {
        let text = self.tuning.welcome_text.clone();
        if text.is_empty() {
            return;
        }
        self.history.push_assistant(&text);
        self.emit_last_turn();
        self.start_speaking(&text);
        self.set_state(SessionState::Speaking);
    }

    /// Toggle speech capture
    ///
    /// From `Idle`, starts listening; from `Listening`, stops and clears
    /// the partial transcript. Ignored in other states.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] if the microphone is refused
    /// (also emitted as a signal) and [`Error::Config`] when voice input
    /// is disabled.
    pub fn toggle_listening(&mut self) -> Result<()> {
        match self.state {
            SessionState::Listening => {
                self.stop_listening();
                self.set_state(SessionState::Idle);
                Ok(())
            }
            SessionState::Idle => self.start_listening(),
            other => {
                tracing::debug!(state = %other, "listening toggle ignored");
                Ok(())
            }
        }
    }

    /// Reset the conversation session; the next submit opens a fresh one
    pub fn reset_session(&mut self) {
        self.session = None;
    }

    // --- internal transitions ---

    fn start_listening(&mut self) -> Result<()> {
        let Some(speech) = self.speech.clone() else {
            return Err(Error::Config("voice input disabled".to_string()));
        };

        self.listen_generation += 1;
        let generation = self.listen_generation;
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_SIZE);

        let handle = match speech.start(tx) {
            Ok(handle) => handle,
            Err(e) => {
                if matches!(e, Error::PermissionDenied(_)) {
                    // Distinct signal, not a conversation turn: the
                    // presentation layer offers a text-only fallback
                    self.emit(CoordinatorSignal::PermissionDenied(e.to_string()));
                }
                return Err(e);
            }
        };
        self.current_listen = Some(handle);

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if events
                    .send(CoordinatorEvent::Recognition { generation, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        self.transcript.clear();
        self.emit(CoordinatorSignal::ListeningChanged(true));
        self.set_state(SessionState::Listening);
        Ok(())
    }

    /// Stop speech capture and discard any partial transcript
    fn stop_listening(&mut self) {
        if let Some(handle) = self.current_listen.take() {
            handle.stop();
            self.listen_generation += 1;
            self.transcript.clear();
            self.emit(CoordinatorSignal::Transcript(String::new()));
            self.emit(CoordinatorSignal::ListeningChanged(false));
        }
    }

    /// Close the current stream handle, if any
    fn close_stream(&mut self) {
        if let Some(handle) = self.current_stream.take() {
            handle.close();
            self.stream_generation += 1;
        }
    }

    /// Cancel the current audio resource and lower the speaking signal
    fn cancel_audio(&mut self) {
        self.audio_generation += 1;
        if let Some(handle) = self.current_audio.take() {
            handle.cancel();
        }
        if self.speaking {
            self.speaking = false;
            self.emit(CoordinatorSignal::SpeakingChanged(false));
        }
        self.playback_started = false;
    }

    async fn ensure_session(&mut self) -> Result<SessionId> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }

        match self.transport.open().await {
            Ok(session) => {
                self.session = Some(session.clone());
                Ok(session)
            }
            Err(first) if first.is_session_init() => {
                // One automatic retry with a fresh open before surfacing
                tracing::warn!(error = %first, "session open failed, retrying");
                let session = self.transport.open().await?;
                self.session = Some(session.clone());
                Ok(session)
            }
            Err(e) => Err(e),
        }
    }

    fn on_stream_event(&mut self, generation: u64, event: StreamEvent) {
        if generation != self.stream_generation {
            tracing::trace!(generation, "dropping event from superseded stream");
            return;
        }

        match event {
            StreamEvent::Chunk { accumulated, .. } => self.on_chunk(&accumulated),
            StreamEvent::Suggestions(questions) => {
                self.emit(CoordinatorSignal::Suggestions(questions));
            }
            StreamEvent::Done(final_text) => self.on_done(&final_text),
            StreamEvent::Error(message) => self.on_transport_error(&message),
        }
    }

    /// Accumulated response content grew
    fn on_chunk(&mut self, accumulated: &str) {
        if !matches!(
            self.state,
            SessionState::AwaitingResponse | SessionState::StreamingResponse | SessionState::Speaking
        ) {
            tracing::trace!(state = %self.state, "chunk ignored");
            return;
        }

        if self.state == SessionState::AwaitingResponse {
            self.set_state(SessionState::StreamingResponse);
        }

        self.history.update_streaming(accumulated);
        self.emit_last_turn();
        self.run_intent(accumulated);

        // Early-speech trade-off: once enough text has accumulated, start
        // speaking the prefix after a short debounce instead of waiting for
        // the full answer
        if accumulated.chars().count() > self.tuning.speech_trigger_chars
            && !self.synthesis_queued
            && !self.speaking
        {
            self.synthesis_queued = true;
            let generation = self.stream_generation;
            let text = accumulated.to_string();
            let delay = self.tuning.synthesis_debounce;
            let events = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events
                    .send(CoordinatorEvent::SynthesisDue { generation, text })
                    .await;
            });
        }
    }

    /// The early-synthesis debounce elapsed; speak the captured prefix
    /// unless the turn has already completed or been superseded
    fn on_synthesis_due(&mut self, generation: u64, text: &str) {
        if generation != self.stream_generation {
            tracing::trace!(generation, "stale synthesis timer dropped");
            return;
        }
        if self.history.last().is_some_and(|t| t.is_final) {
            // Done already dispatched the final text
            return;
        }
        self.start_speaking(text);
    }

    /// Response complete
    fn on_done(&mut self, final_text: &str) {
        if !matches!(
            self.state,
            SessionState::AwaitingResponse | SessionState::StreamingResponse | SessionState::Speaking
        ) {
            tracing::trace!(state = %self.state, "done ignored");
            return;
        }

        self.history.finalize_assistant(final_text);
        self.emit_last_turn();
        self.run_intent(final_text);
        self.current_stream = None;

        // Speak the final text unless the early prefix is already audible;
        // a scheduled-but-not-started prefix is superseded here, and a
        // prefix that already finished playing is replaced by the full reply
        if !self.synthesis_queued || !self.playback_started {
            self.start_speaking(final_text);
        }

        self.set_state(SessionState::Speaking);
    }

    /// Mid-conversation transport failure: apologize out loud, settle back
    fn on_transport_error(&mut self, message: &str) {
        tracing::warn!(error = message, "transport error");
        self.set_state(SessionState::Error);
        self.current_stream = None;
        self.speak_apology();
    }

    /// Convert a failure into the fixed apology turn plus spoken rendition
    fn speak_apology(&mut self) {
        let apology = self.tuning.apology_text.clone();
        if self.history.last().is_some_and(|t| !t.is_final) {
            self.history.finalize_assistant(&apology);
        } else {
            self.history.push_assistant(&apology);
        }
        self.emit_last_turn();
        self.start_speaking(&apology);
        self.set_state(SessionState::Speaking);
    }

    /// Dispatch synthesis + playback for `text`, superseding current audio
    fn start_speaking(&mut self, text: &str) {
        self.cancel_audio();
        self.synthesis_queued = true;

        let generation = self.audio_generation;
        let voice = Arc::clone(&self.voice);
        let events = self.events_tx.clone();
        let text = text.to_string();

        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel(8);
            match voice.speak(&text, tx).await {
                Ok(handle) => {
                    let _ = events
                        .send(CoordinatorEvent::AudioReady { generation, handle })
                        .await;
                    while let Some(event) = rx.recv().await {
                        if events
                            .send(CoordinatorEvent::Playback { generation, event })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = events
                        .send(CoordinatorEvent::SpeechFailed {
                            generation,
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });
    }

    fn on_audio_ready(&mut self, generation: u64, handle: PlaybackHandle) {
        if generation == self.audio_generation {
            self.current_audio = Some(handle);
        } else {
            // Superseded while synthesizing; release immediately
            handle.cancel();
        }
    }

    fn on_speech_failed(&mut self, generation: u64, message: &str) {
        if generation != self.audio_generation {
            return;
        }
        tracing::warn!(error = message, "speech dispatch failed");
        self.synthesis_queued = false;
        if self.state == SessionState::Speaking {
            self.set_state(SessionState::Idle);
        }
    }

    fn on_playback_event(&mut self, generation: u64, event: &PlaybackEvent) {
        if generation != self.audio_generation {
            tracing::trace!(generation, "dropping event from superseded audio");
            return;
        }

        match event {
            PlaybackEvent::Started => {
                self.playback_started = true;
                self.speaking = true;
                self.emit(CoordinatorSignal::SpeakingChanged(true));
                self.set_state(SessionState::Speaking);
            }
            PlaybackEvent::Ended => {
                self.finish_audio();
            }
            PlaybackEvent::Error(message) => {
                tracing::warn!(error = %message, "playback error");
                self.finish_audio();
            }
            PlaybackEvent::Paused => {
                if self.speaking {
                    self.speaking = false;
                    self.emit(CoordinatorSignal::SpeakingChanged(false));
                }
            }
        }
    }

    /// Release the audio resource and settle
    ///
    /// If the early-synthesis prefix finished while the response is still
    /// streaming, the machine returns to `StreamingResponse` so the final
    /// text can still be applied and spoken; otherwise it settles to idle.
    fn finish_audio(&mut self) {
        self.current_audio = None;
        self.playback_started = false;
        if self.speaking {
            self.speaking = false;
            self.emit(CoordinatorSignal::SpeakingChanged(false));
        }
        if self.current_stream.is_some() && self.history.last().is_some_and(|t| !t.is_final) {
            self.set_state(SessionState::StreamingResponse);
        } else if self.state == SessionState::Speaking {
            self.set_state(SessionState::Idle);
        }
    }

    async fn on_recognition_event(&mut self, generation: u64, event: RecognitionEvent) {
        if generation != self.listen_generation {
            tracing::trace!(generation, "dropping event from superseded recognition");
            return;
        }

        match event {
            RecognitionEvent::Result { text, is_final: false } => {
                self.transcript.clear();
                self.transcript.push_str(&text);
                self.emit(CoordinatorSignal::Transcript(text));
            }
            RecognitionEvent::Result { text, is_final: true } => {
                self.stop_listening();
                if text.trim().is_empty() {
                    self.set_state(SessionState::Idle);
                } else if let Err(e) = self.submit_utterance(&text).await {
                    tracing::error!(error = %e, "voice submit failed");
                }
            }
            RecognitionEvent::End => {
                if self.state == SessionState::Listening {
                    self.stop_listening();
                    self.set_state(SessionState::Idle);
                }
            }
            RecognitionEvent::Error(message) => {
                tracing::warn!(error = %message, "recognition error");
                self.stop_listening();
                self.set_state(SessionState::Error);
                self.speak_apology();
            }
        }
    }

    /// Fire-and-forget intent detection; never touches conversation or
    /// audio state, at most one scene effect per turn
    fn run_intent(&mut self, assistant_text: &str) {
        if self.scene_fired {
            return;
        }
        let Some(user_text) = self.history.last_user_text() else {
            return;
        };
        if let Some(scene) = self.classifier.classify(user_text, assistant_text) {
            self.scene_fired = true;
            self.emit(CoordinatorSignal::SceneChange(scene));
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "state transition");
            self.state = state;
            self.emit(CoordinatorSignal::StateChanged(state));
        }
    }

    fn emit(&self, signal: CoordinatorSignal) {
        // Broadcast send only fails when no subscriber exists; signals are
        // advisory, so that is fine
        let _ = self.signals.send(signal);
    }

    fn emit_last_turn(&self) {
        if let Some(turn) = self.history.last() {
            self.emit(CoordinatorSignal::TurnUpdated(turn.clone()));
        }
    }
}
