//! Configuration management for the Holo assistant
//!
//! Environment-first: service endpoints and API keys come from env vars; an
//! optional `holo.toml` in the XDG config directory tunes coordinator
//! behavior (early-speech threshold, debounce, voice, language).

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Default accumulated-response length that triggers early speech synthesis
pub const DEFAULT_SPEECH_TRIGGER_CHARS: usize = 50;

/// Default delay between crossing the trigger threshold and synthesizing
pub const DEFAULT_SYNTHESIS_DEBOUNCE_MS: u64 = 800;

/// Assistant configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat service endpoint and credentials
    pub chat: ChatConfig,

    /// Voice input/output configuration
    pub voice: VoiceConfig,

    /// Coordinator tuning
    pub tuning: TuningConfig,

    /// API keys for external services
    pub api_keys: ApiKeys,
}

/// Session-based chat service configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of the chat service
    pub base_url: String,

    /// API token sent as `Authorization: Token …`
    pub api_token: String,

    /// Polling fallback: attempts before giving up with a timeout error
    pub poll_attempts: u32,

    /// Polling fallback: fixed delay between attempts
    pub poll_delay: Duration,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable microphone capture
    pub enabled: bool,

    /// STT model (e.g. "whisper-1", "nova-2" for Deepgram)
    pub stt_model: String,

    /// TTS model (e.g. "tts-1", "eleven_monolingual_v1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// Spoken language tag for recognition (e.g. "en-US")
    pub language: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "onyx".to_string(),
            tts_speed: 1.0,
            language: "en-US".to_string(),
        }
    }
}

/// Coordinator tuning knobs
#[derive(Debug, Clone)]
pub struct TuningConfig {
    /// Accumulated-response length that triggers early speech synthesis
    pub speech_trigger_chars: usize,

    /// Delay between crossing the threshold and synthesizing the prefix
    pub synthesis_debounce: Duration,

    /// Text shown and spoken when response generation fails
    pub apology_text: String,

    /// Welcome line spoken when the session starts
    pub welcome_text: String,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            speech_trigger_chars: DEFAULT_SPEECH_TRIGGER_CHARS,
            synthesis_debounce: Duration::from_millis(DEFAULT_SYNTHESIS_DEBOUNCE_MS),
            apology_text:
                "Sorry, something went wrong while generating a response.".to_string(),
            welcome_text: "Hello, I am your avatar. How can I help you?".to_string(),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper STT and TTS)
    pub openai: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,
}

/// On-disk tuning file (`holo.toml`), all fields optional
#[derive(Debug, Default, Deserialize)]
struct TuningFile {
    speech_trigger_chars: Option<usize>,
    synthesis_debounce_ms: Option<u64>,
    tts_voice: Option<String>,
    tts_speed: Option<f32>,
    language: Option<String>,
    apology_text: Option<String>,
    welcome_text: Option<String>,
}

/// Return the XDG config directory for the assistant
///
/// Uses `~/.config/omni/holo/` on Linux
#[must_use]
pub fn config_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "omni", "holo").map_or_else(
        || PathBuf::from(".holo"),
        |d| d.config_dir().to_path_buf(),
    )
}

impl Config {
    /// Load configuration from environment variables plus the optional
    /// `holo.toml` tuning file
    ///
    /// # Errors
    ///
    /// Returns error if the chat service endpoint or token is missing, or
    /// if a tuning file exists but cannot be parsed
    pub fn load() -> Result<Self> {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit voice disable option
    ///
    /// # Errors
    ///
    /// Returns error if the chat service endpoint or token is missing, or
    /// if a tuning file exists but cannot be parsed
    pub fn load_with_options(disable_voice: bool) -> Result<Self> {
        let base_url = std::env::var("HOLO_CHAT_URL")
            .map_err(|_| Error::Config("HOLO_CHAT_URL not set".to_string()))?;
        let api_token = std::env::var("HOLO_CHAT_TOKEN")
            .map_err(|_| Error::Config("HOLO_CHAT_TOKEN not set".to_string()))?;

        let poll_attempts = std::env::var("HOLO_POLL_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let poll_delay_ms = std::env::var("HOLO_POLL_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);

        let chat = ChatConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            poll_attempts,
            poll_delay: Duration::from_millis(poll_delay_ms),
        };

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok(),
            elevenlabs: std::env::var("ELEVENLABS_API_KEY").ok(),
            deepgram: std::env::var("DEEPGRAM_API_KEY").ok(),
        };

        let tuning_file = Self::load_tuning_file()?;

        let mut voice = VoiceConfig {
            enabled: !disable_voice,
            stt_model: std::env::var("HOLO_STT_MODEL")
                .unwrap_or_else(|_| "whisper-1".to_string()),
            tts_model: std::env::var("HOLO_TTS_MODEL")
                .unwrap_or_else(|_| "tts-1".to_string()),
            ..VoiceConfig::default()
        };
        if let Some(v) = tuning_file.tts_voice {
            voice.tts_voice = v;
        }
        if let Some(s) = tuning_file.tts_speed {
            voice.tts_speed = s;
        }
        if let Some(lang) = tuning_file.language {
            voice.language = lang;
        }

        if disable_voice {
            tracing::info!("voice explicitly disabled");
        }

        let mut tuning = TuningConfig::default();
        if let Some(n) = tuning_file.speech_trigger_chars {
            tuning.speech_trigger_chars = n;
        }
        if let Some(ms) = tuning_file.synthesis_debounce_ms {
            tuning.synthesis_debounce = Duration::from_millis(ms);
        }
        if let Some(text) = tuning_file.apology_text {
            tuning.apology_text = text;
        }
        if let Some(text) = tuning_file.welcome_text {
            tuning.welcome_text = text;
        }

        Ok(Self {
            chat,
            voice,
            tuning,
            api_keys,
        })
    }

    /// Read `holo.toml` from the config directory, if present
    fn load_tuning_file() -> Result<TuningFile> {
        let path = std::env::var("HOLO_CONFIG")
            .map_or_else(|_| config_dir().join("holo.toml"), PathBuf::from);

        if !path.exists() {
            return Ok(TuningFile::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let parsed = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded tuning file");
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tuning_matches_documented_values() {
        let tuning = TuningConfig::default();
        assert_eq!(tuning.speech_trigger_chars, 50);
        assert_eq!(tuning.synthesis_debounce, Duration::from_millis(800));
    }

    #[test]
    fn default_voice_config() {
        let voice = VoiceConfig::default();
        assert!(voice.enabled);
        assert_eq!(voice.tts_voice, "onyx");
        assert_eq!(voice.language, "en-US");
    }

    #[test]
    fn tuning_file_accepts_partial_tables() {
        let parsed: TuningFile =
            toml::from_str("speech_trigger_chars = 80\n").expect("parses");
        assert_eq!(parsed.speech_trigger_chars, Some(80));
        assert_eq!(parsed.synthesis_debounce_ms, None);
    }
}
