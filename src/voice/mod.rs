//! Voice input and output
//!
//! Speech input (microphone capture, utterance endpointing, HTTP
//! transcription) and voice output (HTTP synthesis, cancelable playback
//! with lifecycle events). The coordinator consumes both through the
//! [`SpeechInput`] and [`VoiceOutput`] seams so tests can substitute
//! hardware-free fakes.

mod microphone;
mod playback;
mod recognition;
mod synthesis;
mod transcribe;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use microphone::{Microphone, SAMPLE_RATE, samples_to_wav};
pub use playback::{AudioPlayback, PlaybackEvent, PlaybackHandle};
pub use recognition::{MicRecognizer, RecognitionEvent, RecognitionHandle};
pub use synthesis::SpeechSynthesizer;
pub use transcribe::Transcriber;

use crate::Result;

/// Produces playable audio bytes for a piece of text
///
/// Implementations call out to a TTS service and return encoded audio
/// (MP3). The configured voice identifier is part of the implementation.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize speech audio for `text`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Synthesis`] if audio cannot be produced.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Speaks text aloud: synthesize, then play
///
/// `speak` returns once playback is dispatched; lifecycle events
/// (`Started`, `Ended`, `Error`, `Paused`) arrive on the provided channel.
/// At most one playback resource should be live at a time — callers cancel
/// the previous handle before calling `speak` again.
#[async_trait]
pub trait VoiceOutput: Send + Sync {
    /// Synthesize `text` and start playing it
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Synthesis`] if audio cannot be produced or
    /// [`crate::Error::Audio`] if playback cannot start; failures after
    /// playback starts arrive as [`PlaybackEvent::Error`].
    async fn speak(
        &self,
        text: &str,
        events: mpsc::Sender<PlaybackEvent>,
    ) -> Result<PlaybackHandle>;
}

/// Captures user speech and reports transcripts
///
/// `start` may deliver any number of interim results (`is_final == false`)
/// before exactly one final result, after which the adapter self-terminates
/// and fires [`RecognitionEvent::End`]. Stopping the returned handle is
/// idempotent and safe after the adapter has already ended.
pub trait SpeechInput: Send + Sync {
    /// Begin capturing speech, delivering events into `events`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PermissionDenied`] if the microphone cannot
    /// be opened, [`crate::Error::Recognition`] for other capture failures.
    fn start(&self, events: mpsc::Sender<RecognitionEvent>) -> Result<RecognitionHandle>;
}

/// Default voice output: HTTP synthesis piped into speaker playback
pub struct VoicePipeline {
    synthesizer: SpeechSynthesizer,
    playback: AudioPlayback,
}

impl VoicePipeline {
    /// Wire a synthesizer to the default output device
    #[must_use]
    pub const fn new(synthesizer: SpeechSynthesizer, playback: AudioPlayback) -> Self {
        Self {
            synthesizer,
            playback,
        }
    }
}

#[async_trait]
impl VoiceOutput for VoicePipeline {
    async fn speak(
        &self,
        text: &str,
        events: mpsc::Sender<PlaybackEvent>,
    ) -> Result<PlaybackHandle> {
        let audio = self.synthesizer.synthesize(text).await?;
        tracing::debug!(bytes = audio.len(), "audio synthesized");
        self.playback.play(&audio, events)
    }
}
