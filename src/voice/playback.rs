//! Audio playback to speakers
//!
//! Plays synthesized MP3 audio on a background thread and reports lifecycle
//! events (`Started`, `Ended`, `Error`, `Paused`) through a channel. Each
//! playback is a cancelable resource: canceling, or reaching the end,
//! releases the decoded sample buffer. At most one resource should be live
//! per coordinator; callers cancel the previous handle before starting a
//! new one.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Lifecycle event for one playback resource
///
/// `Started`, `Ended`, `Error`, and `Paused` each fire at most once per
/// resource.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// Audio is audibly playing; drive the speaking signal from this
    Started,
    /// Playback ran to completion; the sample buffer has been released
    Ended,
    /// Playback failed; the sample buffer has been released
    Error(String),
    /// Playback was paused before completion
    Paused,
}

/// Cancelable reference to one in-flight playback
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    cancel: CancellationToken,
    pause: Arc<AtomicBool>,
}

impl PlaybackHandle {
    /// Create a fresh handle; exposed so tests can drive fake playback
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            pause: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop playback and release the sample buffer; idempotent
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Request a pause; the resource emits [`PlaybackEvent::Paused`] once
    pub fn pause(&self) {
        self.pause.store(true, Ordering::Release);
    }

    /// Whether the resource has been canceled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for PlaybackHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Start playing MP3 audio, reporting lifecycle events into `events`
    ///
    /// Returns immediately; playback runs on a dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns error if the MP3 data cannot be decoded; runtime playback
    /// failures are reported as [`PlaybackEvent::Error`] instead.
    pub fn play(
        &self,
        mp3_data: &[u8],
        events: mpsc::Sender<PlaybackEvent>,
    ) -> Result<PlaybackHandle> {
        let samples = decode_mp3(mp3_data)?;
        let handle = PlaybackHandle::new();

        let config = self.config.clone();
        let worker_handle = handle.clone();

        std::thread::spawn(move || {
            run_playback(samples, &config, &worker_handle, &events);
        });

        Ok(handle)
    }
}

/// Drive one playback to its terminal event on the current thread
fn run_playback(
    samples: Vec<f32>,
    config: &StreamConfig,
    handle: &PlaybackHandle,
    events: &mpsc::Sender<PlaybackEvent>,
) {
    if samples.is_empty() {
        let _ = events.blocking_send(PlaybackEvent::Ended);
        return;
    }

    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = events.blocking_send(PlaybackEvent::Error("no output device".to_string()));
        return;
    };

    let channels = config.channels as usize;
    let sample_count = samples.len();

    let shared = Arc::new(samples);
    let position = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let cb_samples = Arc::clone(&shared);
    let cb_position = Arc::clone(&position);
    let cb_finished = Arc::clone(&finished);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut pos = cb_position.load(Ordering::Acquire);
            for frame in data.chunks_mut(channels) {
                let sample = if pos < cb_samples.len() {
                    let s = cb_samples[pos];
                    pos += 1;
                    s
                } else {
                    cb_finished.store(true, Ordering::Release);
                    0.0
                };
                for out in frame.iter_mut() {
                    *out = sample;
                }
            }
            cb_position.store(pos, Ordering::Release);
        },
        |err| {
            tracing::error!(error = %err, "audio playback error");
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = events.blocking_send(PlaybackEvent::Error(e.to_string()));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = events.blocking_send(PlaybackEvent::Error(e.to_string()));
        return;
    }

    let _ = events.blocking_send(PlaybackEvent::Started);

    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let deadline =
        std::time::Instant::now() + std::time::Duration::from_millis(duration_ms + 500);
    let mut paused = false;

    loop {
        if handle.is_cancelled() {
            // Superseded: release without a terminal event; the coordinator
            // has already moved on to a newer generation
            tracing::debug!("playback cancelled");
            return;
        }

        if !paused && handle.pause.load(Ordering::Acquire) {
            paused = true;
            if let Err(e) = stream.pause() {
                tracing::warn!(error = %e, "pause failed");
            }
            let _ = events.blocking_send(PlaybackEvent::Paused);
        }

        if !paused && (finished.load(Ordering::Acquire) || std::time::Instant::now() > deadline) {
            // Small delay to let the device drain
            std::thread::sleep(std::time::Duration::from_millis(100));
            drop(stream);
            tracing::debug!(samples = sample_count, "playback complete");
            let _ = events.blocking_send(PlaybackEvent::Ended);
            return;
        }

        std::thread::sleep(std::time::Duration::from_millis(25));
    }
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                // Convert i16 samples to f32 and handle stereo to mono
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    // Stereo: average channels
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    // Mono
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_cancel_is_idempotent() {
        let handle = PlaybackHandle::new();
        assert!(!handle.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn decode_rejects_garbage() {
        // Valid MP3 sync words never appear in this buffer
        let garbage = vec![0u8; 64];
        let decoded = decode_mp3(&garbage);
        // minimp3 skips junk and reports EOF, yielding no samples
        assert!(decoded.map(|s| s.is_empty()).unwrap_or(true));
    }
}
