//! Speech-to-text over HTTP STT services

use crate::{Error, Result};

/// Response from the OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from the Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug)]
enum SttProvider {
    Whisper,
    Deepgram,
}

/// Transcribes captured speech to text
pub struct Transcriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
    language: String,
    provider: SttProvider,
}

impl Transcriber {
    /// Create a transcriber using `OpenAI` Whisper
    ///
    /// `language` is a BCP-47 tag; only its primary subtag is sent
    /// (Whisper takes ISO-639-1).
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String, language: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a transcriber using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String, language: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
            provider: SttProvider::Deepgram,
        })
    }

    /// Primary language subtag ("en-US" → "en")
    fn language_subtag(&self) -> &str {
        self.language.split('-').next().unwrap_or(&self.language)
    }

    /// Transcribe WAV audio to text
    ///
    /// # Errors
    ///
    /// Returns [`Error::Recognition`] if transcription fails
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await,
        }
    }

    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Recognition(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", self.language_subtag().to_string());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Recognition(format!(
                "Whisper API error {status}: {body}"
            )));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&language={}&punctuate=true",
            self.model,
            self.language_subtag()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Recognition(format!(
                "Deepgram API error {status}: {body}"
            )));
        }

        let result: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whisper_requires_api_key() {
        let result = Transcriber::new_whisper(
            String::new(),
            "whisper-1".to_string(),
            "en-US".to_string(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn language_subtag_strips_region() {
        let t = Transcriber::new_whisper(
            "key".to_string(),
            "whisper-1".to_string(),
            "en-US".to_string(),
        )
        .unwrap();
        assert_eq!(t.language_subtag(), "en");

        let t = Transcriber::new_deepgram("key".to_string(), "nova-2".to_string(), "ko".to_string())
            .unwrap();
        assert_eq!(t.language_subtag(), "ko");
    }

    #[test]
    fn deepgram_response_parses_nested_transcript() {
        let json = r#"{"results":{"channels":[{"alternatives":[{"transcript":"hello there"}]}]}}"#;
        let parsed: DeepgramResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.results.channels[0].alternatives[0].transcript,
            "hello there"
        );
    }
}
