//! Speech recognition
//!
//! Implements the speech-input contract: capture microphone audio, detect
//! the end of the utterance by trailing silence, transcribe it over HTTP,
//! deliver exactly one final result, then self-terminate.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::microphone::{Microphone, SAMPLE_RATE, samples_to_wav};
use super::transcribe::Transcriber;
use super::SpeechInput;
use crate::Result;

/// Minimum audio energy to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum utterance length (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Trailing silence that ends an utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Hard cap on a single utterance (in samples)
const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 15;

/// Capture poll interval
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// Event from an in-progress recognition
#[derive(Debug, Clone)]
pub enum RecognitionEvent {
    /// A transcript; interim results carry `is_final == false`, and exactly
    /// one final result arrives per recognition
    Result {
        /// Transcribed text
        text: String,
        /// Whether this is the final transcript
        is_final: bool,
    },

    /// The adapter has terminated (after a final result, a stop, or an
    /// error); fires exactly once
    End,

    /// Speech capture or transcription failure
    Error(String),
}

/// Cancelable reference to an in-progress recognition
#[derive(Debug, Clone)]
pub struct RecognitionHandle {
    cancel: CancellationToken,
}

impl RecognitionHandle {
    /// Create a fresh handle; exposed so tests can drive fake recognition
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    /// Stop listening; idempotent and safe on an already-ended recognition
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the recognition has been stopped
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for RecognitionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Microphone-backed speech input
pub struct MicRecognizer {
    transcriber: Arc<Transcriber>,
}

impl MicRecognizer {
    /// Create a recognizer that transcribes through the given backend
    #[must_use]
    pub fn new(transcriber: Arc<Transcriber>) -> Self {
        Self { transcriber }
    }
}

impl SpeechInput for MicRecognizer {
    fn start(&self, events: mpsc::Sender<RecognitionEvent>) -> Result<RecognitionHandle> {
        // Probe the device first so a permission refusal surfaces to the
        // caller rather than through the event channel
        drop(Microphone::open()?);

        let handle = RecognitionHandle::new();
        let cancel = handle.cancel.clone();
        let (segment_tx, mut segment_rx) = mpsc::channel::<Result<Vec<f32>>>(1);

        // The capture stream is not Send; it lives on a dedicated thread
        // that polls the buffer and hands one endpointed segment across
        std::thread::spawn(move || {
            let mut mic = match Microphone::open().and_then(|mut m| {
                m.start()?;
                Ok(m)
            }) {
                Ok(mic) => mic,
                Err(e) => {
                    let _ = segment_tx.blocking_send(Err(e));
                    return;
                }
            };

            let mut endpointer = Endpointer::new();
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);

                let samples = mic.take_buffer();
                if endpointer.feed(&samples) {
                    let _ = segment_tx.blocking_send(Ok(endpointer.take()));
                    break;
                }
            }
            mic.stop();
            // Dropping segment_tx with no segment signals a cancelled
            // capture
        });

        let transcriber = Arc::clone(&self.transcriber);
        tokio::spawn(async move {
            let segment = match segment_rx.recv().await {
                Some(Ok(segment)) => segment,
                Some(Err(e)) => {
                    let _ = events.send(RecognitionEvent::Error(e.to_string())).await;
                    let _ = events.send(RecognitionEvent::End).await;
                    return;
                }
                None => {
                    let _ = events.send(RecognitionEvent::End).await;
                    return;
                }
            };

            match transcribe_segment(&transcriber, &segment).await {
                Ok(text) => {
                    if !text.trim().is_empty() {
                        let _ = events
                            .send(RecognitionEvent::Result {
                                text,
                                is_final: true,
                            })
                            .await;
                    }
                }
                Err(e) => {
                    let _ = events.send(RecognitionEvent::Error(e.to_string())).await;
                }
            }
            let _ = events.send(RecognitionEvent::End).await;
        });

        Ok(handle)
    }
}

async fn transcribe_segment(transcriber: &Transcriber, segment: &[f32]) -> Result<String> {
    let wav = samples_to_wav(segment, SAMPLE_RATE)?;
    transcriber.transcribe(&wav).await
}

/// Energy-based utterance endpointing
///
/// Accumulates samples once speech energy is observed and reports the
/// utterance complete after enough speech followed by trailing silence,
/// or when the hard length cap is hit.
struct Endpointer {
    buffer: Vec<f32>,
    silence: usize,
    speaking: bool,
}

impl Endpointer {
    const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            silence: 0,
            speaking: false,
        }
    }

    /// Feed captured samples; returns true when the utterance is complete
    fn feed(&mut self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return false;
        }

        let is_speech = rms_energy(samples) > ENERGY_THRESHOLD;

        if !self.speaking {
            if !is_speech {
                return false;
            }
            self.speaking = true;
            self.silence = 0;
            tracing::trace!("speech detected");
        }

        self.buffer.extend_from_slice(samples);

        if is_speech {
            self.silence = 0;
        } else {
            self.silence += samples.len();
        }

        if self.buffer.len() >= MAX_UTTERANCE_SAMPLES {
            tracing::debug!(samples = self.buffer.len(), "utterance length cap hit");
            return true;
        }

        self.silence > SILENCE_SAMPLES && self.buffer.len() > MIN_SPEECH_SAMPLES
    }

    /// Take the accumulated utterance, resetting the endpointer
    fn take(&mut self) -> Vec<f32> {
        self.speaking = false;
        self.silence = 0;
        std::mem::take(&mut self.buffer)
    }
}

/// RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(duration_secs: f32, amplitude: f32) -> Vec<f32> {
        let n = (SAMPLE_RATE as f32 * duration_secs) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            })
            .collect()
    }

    fn silence(duration_secs: f32) -> Vec<f32> {
        vec![0.0; (SAMPLE_RATE as f32 * duration_secs) as usize]
    }

    #[test]
    fn energy_separates_speech_from_silence() {
        assert!(rms_energy(&silence(0.1)) < 0.001);
        assert!(rms_energy(&sine(0.1, 0.5)) > 0.3);
        assert!(rms_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn silence_alone_never_completes() {
        let mut ep = Endpointer::new();
        assert!(!ep.feed(&silence(0.5)));
        assert!(!ep.feed(&silence(1.0)));
        assert!(ep.buffer.is_empty());
    }

    #[test]
    fn speech_then_silence_completes() {
        let mut ep = Endpointer::new();
        assert!(!ep.feed(&sine(0.5, 0.3)));
        assert!(!ep.feed(&sine(0.3, 0.3)));
        assert!(ep.feed(&silence(0.6)));

        let segment = ep.take();
        assert!(segment.len() > MIN_SPEECH_SAMPLES);
        assert!(ep.buffer.is_empty());
    }

    #[test]
    fn short_blip_does_not_complete_on_silence() {
        let mut ep = Endpointer::new();
        // 0.1s of speech is under the minimum utterance length
        assert!(!ep.feed(&sine(0.1, 0.3)));
        assert!(!ep.feed(&silence(0.6)));
    }

    #[test]
    fn length_cap_forces_completion() {
        let mut ep = Endpointer::new();
        let mut done = false;
        for _ in 0..20 {
            if ep.feed(&sine(1.0, 0.3)) {
                done = true;
                break;
            }
        }
        assert!(done);
        assert!(ep.take().len() >= MAX_UTTERANCE_SAMPLES);
    }

    #[test]
    fn stop_is_idempotent() {
        let handle = RecognitionHandle::new();
        assert!(!handle.is_stopped());
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
    }
}
