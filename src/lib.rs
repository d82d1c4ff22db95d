//! Holo Assistant - session core for a voice-driven avatar assistant
//!
//! This library provides the coordination core behind a talking avatar:
//! - Session coordinator (turn-taking state machine)
//! - Chat transport (session-based streaming or polling client)
//! - Voice output (TTS synthesis + cancelable playback)
//! - Speech input (microphone capture + HTTP transcription)
//! - Scene-change intent side channel
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Presentation                        │
//! │   conversation  │  avatar motion  │  scene  │  CLI  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ signals            events │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Session Coordinator                    │
//! │   history  │  turn state  │  one stream, one audio  │
//! └──────┬──────────────┬──────────────────┬────────────┘
//!        │              │                  │
//! ┌──────▼─────┐ ┌──────▼──────┐ ┌─────────▼──────────┐
//! │ Speech In  │ │ Chat Stream │ │    Voice Out       │
//! │ mic + STT  │ │  SSE / poll │ │  TTS + playback    │
//! └────────────┘ └─────────────┘ └────────────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod intent;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use coordinator::{
    CoordinatorEvent, CoordinatorHandle, CoordinatorSignal, SessionCoordinator, SessionState,
};
pub use error::{Error, Result};
pub use history::{ConversationHistory, ConversationRole, ConversationTurn};
pub use intent::{DisabledClassifier, IntentClassifier, RegexIntentClassifier, SceneSetting};
pub use transport::{
    ChatTransport, PollingChatTransport, SessionId, SseChatTransport, StreamEvent, StreamHandle,
};
pub use voice::{
    AudioPlayback, MicRecognizer, Microphone, PlaybackEvent, PlaybackHandle, RecognitionEvent,
    RecognitionHandle, SpeechInput, SpeechSynthesizer, Synthesizer, Transcriber, VoiceOutput,
    VoicePipeline,
};
